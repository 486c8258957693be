//! Delay strategy: one native transaction per touched target.
//!
//! ```text
//!   exec(db_1) ─► begin db_1 ─┐
//!   exec(db_0) ─► begin db_0 ─┤  open: [db_1, db_0]
//!   exec(db_1) ─► reuse ──────┘
//!   commit ─► db_1.commit ─► db_0.commit   (failures collected)
//! ```

use super::{Tx, TxState};
use crate::context::{ExecContext, TxOptions};
use crate::datasource::{DataSource, NativeTx};
use crate::error::{Error, Result, TargetFailure};
use crate::metrics::AccessMetrics;
use crate::rows::BoxRows;
use crate::types::{ExecResult, Query};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Inner {
    state: TxState,
    /// Opened native transactions in the order their targets were touched.
    open: Vec<(String, Arc<dyn NativeTx>)>,
}

/// Transaction spanning every target it touches.
///
/// Commit and rollback walk the opened targets in first-touch order and
/// keep going past failures.
pub struct DelayTx {
    resolver: Arc<dyn DataSource>,
    options: TxOptions,
    metrics: Arc<AccessMetrics>,
    inner: Mutex<Inner>,
}

impl DelayTx {
    pub(crate) fn new(
        resolver: Arc<dyn DataSource>,
        options: TxOptions,
        metrics: Arc<AccessMetrics>,
    ) -> Self {
        Self {
            resolver,
            options,
            metrics,
            inner: Mutex::new(Inner {
                state: TxState::Active,
                open: Vec::new(),
            }),
        }
    }

    /// Names of the targets with an open native transaction.
    pub async fn targets(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .open
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Find or open the native transaction for the target of `query`.
    async fn native(&self, ctx: &ExecContext, query: &Query) -> Result<Arc<dyn NativeTx>> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_finished() {
            return Err(Error::TransactionFinished);
        }
        let target = self.resolver.find_target(query)?;
        if let Some((_, tx)) = inner.open.iter().find(|(name, _)| *name == target.name) {
            return Ok(tx.clone());
        }
        let tx: Arc<dyn NativeTx> = Arc::from(target.source.begin(ctx, &self.options).await?);
        self.metrics.native_tx_opened.inc();
        debug!(
            target_name = %target.name,
            open = inner.open.len() + 1,
            "Opened native transaction"
        );
        inner.open.push((target.name, tx.clone()));
        Ok(tx)
    }

    /// Commit or roll back every open native transaction in first-touch
    /// order.
    ///
    /// A context that has already ended changes nothing. Targets the
    /// context stopped from finishing stay open and the transaction stays
    /// active, so a later rollback reaches exactly those targets.
    async fn finish(&self, ctx: &ExecContext, commit: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_finished() {
            return Err(Error::TransactionFinished);
        }
        ctx.check()?;
        let op = if commit { "commit" } else { "rollback" };
        let open = std::mem::take(&mut inner.open);
        let targets = open.len();

        let mut failures = Vec::new();
        let mut unfinished = Vec::new();
        for (name, tx) in open {
            let res = if commit {
                ctx.run(tx.commit(ctx)).await
            } else {
                ctx.run(tx.rollback(ctx)).await
            };
            let Err(e) = res else {
                continue;
            };
            warn!(target_name = %name, error = %e, op, "Target failed to finish");
            failures.push(TargetFailure::new(name.clone(), e));
            if ctx.check().is_err() {
                unfinished.push((name, tx));
            }
        }

        if !unfinished.is_empty() {
            warn!(open = unfinished.len(), op, "Context ended with targets still open");
            inner.open = unfinished;
            return Err(Error::PartialFailure { op, failures });
        }
        inner.state = if commit {
            TxState::Committed
        } else {
            TxState::RolledBack
        };
        let failed: Vec<String> = failures.iter().map(|f| f.target.clone()).collect();
        self.metrics.record_tx_end(commit, &failed);
        if failures.is_empty() {
            if targets > 0 {
                info!(targets, op, "Transaction finished on every target");
            }
            return Ok(());
        }
        Err(Error::PartialFailure { op, failures })
    }
}

#[async_trait]
impl Tx for DelayTx {
    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows> {
        let tx = self.native(ctx, query).await?;
        ctx.run(tx.query(ctx, query)).await
    }

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult> {
        let tx = self.native(ctx, query).await?;
        ctx.run(tx.exec(ctx, query)).await
    }

    async fn commit(&self, ctx: &ExecContext) -> Result<()> {
        self.finish(ctx, true).await
    }

    async fn rollback(&self, ctx: &ExecContext) -> Result<()> {
        self.finish(ctx, false).await
    }
}
