//! Per-call execution context.
//!
//! Carries what travels implicitly with a call through nested data sources:
//! primary/replica role selection, deadline, cancellation and, inside
//! `begin_tx`, the requested transaction strategy.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Execution context for one call (or one transaction).
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Route reads to the primary instead of a replica.
    pub use_master: bool,

    /// Absolute deadline for every underlying call.
    pub deadline: Option<Instant>,

    /// Cancellation signal shared with the caller.
    pub cancel: CancellationToken,

    /// Transaction request, read by `begin_tx`.
    pub transaction: Option<TxContext>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            use_master: false,
            deadline: None,
            cancel: CancellationToken::new(),
            transaction: None,
        }
    }
}

impl ExecContext {
    /// Create a context with no deadline that reads from replicas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from the primary.
    pub fn with_master(mut self) -> Self {
        self.use_master = true;
        self
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Request a transaction with the given strategy.
    pub fn with_transaction(mut self, tx: TxContext) -> Self {
        self.transaction = Some(tx);
        self
    }

    /// Fail if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Run an underlying call under this context.
    ///
    /// Short-circuits before polling `fut` when the context is already done,
    /// otherwise races it against cancellation and the deadline.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(Error::Cancelled),
                res = fut => res,
            }
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(Error::DeadlineExceeded)),
            None => guarded.await,
        }
    }
}

/// Transaction strategy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStrategy {
    /// One native transaction on exactly one target.
    Single,
    /// One native transaction per touched target, committed best effort.
    Delay,
}

impl FromStr for TxStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(TxStrategy::Single),
            "delay" => Ok(TxStrategy::Delay),
            _ => Err(Error::UnsupportedTransactionStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for TxStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStrategy::Single => write!(f, "single"),
            TxStrategy::Delay => write!(f, "delay"),
        }
    }
}

/// Isolation level requested for native transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Options forwarded to every native transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

/// Transaction request attached to an [`ExecContext`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxContext {
    /// Requested strategy; `None` is rejected by `begin_tx`.
    pub strategy: Option<TxStrategy>,
    pub options: TxOptions,
}

impl TxContext {
    /// Create a request for the given strategy.
    pub fn new(strategy: TxStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            options: TxOptions::default(),
        }
    }

    /// Parse the strategy from its tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        Ok(Self::new(tag.parse()?))
    }

    /// Set the native transaction options.
    pub fn with_options(mut self, options: TxOptions) -> Self {
        self.options = options;
        self
    }
}
