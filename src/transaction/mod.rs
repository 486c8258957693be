//! Logical transactions over the routing tree.
//!
//! A logical transaction opens native transactions lazily, on the first
//! statement that reaches each physical target.
//!
//! ```text
//!   Active ──commit──► Committed
//!     │
//!     └──rollback────► RolledBack        (every later call: TransactionFinished)
//!
//!   per target:  NotStarted ──first query/exec──► Open
//! ```
//!
//! - [`TxStrategy::Single`]: at most one target; touching a second one is
//!   [`Error::CrossTargetTransaction`].
//! - [`TxStrategy::Delay`]: one native transaction per touched target,
//!   committed one after another without two-phase commit. A failing target
//!   does not undo the others; every failure is reported together in
//!   [`Error::PartialFailure`].
//!
//! [`Error::CrossTargetTransaction`]: crate::error::Error::CrossTargetTransaction
//! [`Error::PartialFailure`]: crate::error::Error::PartialFailure

mod delay;
mod single;

pub use delay::DelayTx;
pub use single::SingleTx;

use crate::context::{ExecContext, TxOptions, TxStrategy};
use crate::datasource::DataSource;
use crate::error::Result;
use crate::metrics::AccessMetrics;
use crate::rows::BoxRows;
use crate::types::{ExecResult, Query};
use async_trait::async_trait;
use std::sync::Arc;

/// A logical transaction.
#[async_trait]
pub trait Tx: Send + Sync {
    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows>;

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult>;

    /// Commit every opened native transaction. A no-op when none was opened.
    async fn commit(&self, ctx: &ExecContext) -> Result<()>;

    /// Roll back every opened native transaction. A no-op when none was
    /// opened.
    async fn rollback(&self, ctx: &ExecContext) -> Result<()>;
}

/// Lifecycle of a logical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn is_finished(self) -> bool {
        self != TxState::Active
    }
}

pub(crate) fn begin(
    strategy: TxStrategy,
    resolver: Arc<dyn DataSource>,
    options: TxOptions,
    metrics: Arc<AccessMetrics>,
) -> Box<dyn Tx> {
    match strategy {
        TxStrategy::Single => Box::new(SingleTx::new(resolver, options, metrics)),
        TxStrategy::Delay => Box::new(DelayTx::new(resolver, options, metrics)),
    }
}
