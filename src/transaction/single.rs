//! Single-target strategy: one native transaction, bound to the first
//! target touched.

use super::{Tx, TxState};
use crate::context::{ExecContext, TxOptions};
use crate::datasource::{DataSource, NativeTx};
use crate::error::{Error, Result};
use crate::metrics::AccessMetrics;
use crate::rows::BoxRows;
use crate::types::{ExecResult, Query};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct Inner {
    state: TxState,
    open: Option<(String, Arc<dyn NativeTx>)>,
}

/// Transaction bound to the first target it touches.
pub struct SingleTx {
    resolver: Arc<dyn DataSource>,
    options: TxOptions,
    metrics: Arc<AccessMetrics>,
    inner: Mutex<Inner>,
}

impl SingleTx {
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
                open: None,
            }),
        }
    }

    /// Name of the target the transaction is bound to, once opened.
    pub async fn target(&self) -> Option<String> {
        self.inner.lock().await.open.as_ref().map(|(name, _)| name.clone())
    }

    async fn native(&self, ctx: &ExecContext, query: &Query) -> Result<Arc<dyn NativeTx>> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_finished() {
            return Err(Error::TransactionFinished);
        }
        let target = self.resolver.find_target(query)?;
        if let Some((first, tx)) = &inner.open {
            if *first != target.name {
                return Err(Error::CrossTargetTransaction {
                    first: first.clone(),
                    attempted: target.name,
                });
            }
            return Ok(tx.clone());
        }
        let tx: Arc<dyn NativeTx> = Arc::from(target.source.begin(ctx, &self.options).await?);
        self.metrics.native_tx_opened.inc();
        debug!(target_name = %target.name, "Opened native transaction");
        inner.open = Some((target.name, tx.clone()));
        Ok(tx)
    }

    /// Commit or roll back the open native transaction.
    ///
    /// A context that has already ended changes nothing. When the context
    /// ends while the driver call is in flight the transaction stays
    /// active and bound, so a rollback with a fresh context can reach it.
    async fn finish(&self, ctx: &ExecContext, commit: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_finished() {
            return Err(Error::TransactionFinished);
        }
        ctx.check()?;
        let res = match &inner.open {
            None => Ok(()),
            Some((_, tx)) if commit => ctx.run(tx.commit(ctx)).await,
            Some((_, tx)) => ctx.run(tx.rollback(ctx)).await,
        };
        if let Err(e) = &res {
            if ctx.check().is_err() {
                warn!(error = %e, commit, "Context ended before the transaction finished");
                return res;
            }
        }

        inner.state = if commit {
            TxState::Committed
        } else {
            TxState::RolledBack
        };
        let failed: Vec<String> = match (&res, inner.open.take()) {
            (Err(e), Some((name, _))) => {
                warn!(target_name = %name, error = %e, commit, "Failed to finish transaction");
                vec![name]
            }
            _ => Vec::new(),
        };
        self.metrics.record_tx_end(commit, &failed);
        res
    }
}

#[async_trait]
impl Tx for SingleTx {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{ReplicaAwareConnection, Router};
    use crate::testing::{Call, MockConnection};
    use std::collections::HashMap;

    fn single(mock: &Arc<MockConnection>) -> SingleTx {
        let leaf: Arc<dyn DataSource> = Arc::new(ReplicaAwareConnection::new("main", mock.clone()));
        let router = Router::new(HashMap::from([("main".to_string(), leaf)]));
        SingleTx::new(
            Arc::new(router),
            TxOptions::default(),
            Arc::new(AccessMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_commit_without_statements_is_noop() {
        let mock = Arc::new(MockConnection::new("main"));
        let tx = single(&mock);
        tx.commit(&ExecContext::new()).await.unwrap();
        assert!(mock.calls().is_empty());
        assert_eq!(
            tx.exec(&ExecContext::new(), &Query::new("UPDATE t SET a = 1"))
                .await
                .err(),
            Some(Error::TransactionFinished)
        );
        assert_eq!(tx.rollback(&ExecContext::new()).await, Err(Error::TransactionFinished));
    }

    #[tokio::test]
    async fn test_opens_lazily_once() {
        let mock = Arc::new(MockConnection::new("main"));
        let tx = single(&mock);
        let ctx = ExecContext::new();
        tx.exec(&ctx, &Query::new("INSERT INTO t VALUES (1)")).await.unwrap();
        tx.query(&ctx, &Query::new("SELECT * FROM t")).await.unwrap();
        assert_eq!(tx.target().await.as_deref(), Some("main"));
        tx.rollback(&ctx).await.unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                Call::Begin,
                Call::TxExec("INSERT INTO t VALUES (1)".to_string()),
                Call::TxQuery("SELECT * FROM t".to_string()),
                Call::Rollback,
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_commit_leaves_transaction_open() {
        let mock = Arc::new(MockConnection::new("main"));
        let tx = single(&mock);
        let ctx = ExecContext::new();
        tx.exec(&ctx, &Query::new("DELETE FROM t")).await.unwrap();

        let cancelled = ExecContext::new();
        cancelled.cancel.cancel();
        assert_eq!(tx.commit(&cancelled).await, Err(Error::Cancelled));
        assert_eq!(tx.target().await.as_deref(), Some("main"));

        tx.rollback(&ctx).await.unwrap();
        assert_eq!(mock.calls().last(), Some(&Call::Rollback));
        assert!(!mock.calls().contains(&Call::Commit));
        assert_eq!(tx.commit(&ctx).await, Err(Error::TransactionFinished));
    }

    #[tokio::test]
    async fn test_failed_begin_leaves_transaction_unopened() {
        let mock = Arc::new(MockConnection::new("main"));
        mock.plan().fail_begin = Some(Error::driver("too many connections"));
        let tx = single(&mock);
        let ctx = ExecContext::new();
        assert_eq!(
            tx.exec(&ctx, &Query::new("DELETE FROM t")).await.err(),
            Some(Error::driver("too many connections"))
        );
        assert_eq!(tx.target().await, None);
        tx.commit(&ctx).await.unwrap();
    }
}
