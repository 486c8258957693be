//! Leaf of the routing tree: one primary plus an optional replica pool.
//!
//! ```text
//!   query ── use_master? ──yes──► primary
//!              │no
//!              ▼
//!         pool.next() ──► replica
//!   exec / begin ───────────────► primary
//! ```

use super::replica::ReplicaPool;
use super::{Connection, DataSource, NativeTx, Target, TxBeginner};
use crate::context::{ExecContext, TxOptions};
use crate::error::{Error, Result};
use crate::metrics::AccessMetrics;
use crate::rows::BoxRows;
use crate::types::{ExecResult, Query};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// A primary connection with an optional replica pool for reads.
///
/// Reads go to the next replica unless the context asks for the primary or
/// there is no pool; writes and transactions always use the primary.
/// Cloning is cheap and shares the underlying connections and the metrics
/// binding.
#[derive(Clone)]
pub struct ReplicaAwareConnection {
    name: String,
    primary: Arc<dyn Connection>,
    pool: Option<Arc<dyn ReplicaPool>>,
    metrics: Arc<RwLock<Arc<AccessMetrics>>>,
}

impl ReplicaAwareConnection {
    pub fn new(name: impl Into<String>, primary: Arc<dyn Connection>) -> Self {
        Self {
            name: name.into(),
            primary,
            pool: None,
            metrics: Arc::new(RwLock::new(Arc::new(AccessMetrics::new()))),
        }
    }

    /// Serve reads from `pool`.
    pub fn with_pool(mut self, pool: Arc<dyn ReplicaPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Record into a shared metrics instance.
    ///
    /// A router rebinds its own metrics when this connection is registered.
    pub fn with_metrics(self, metrics: Arc<AccessMetrics>) -> Self {
        *self.metrics.write() = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<AccessMetrics> {
        self.metrics.read().clone()
    }

    pub fn primary(&self) -> &Arc<dyn Connection> {
        &self.primary
    }

    pub fn pool(&self) -> Option<&Arc<dyn ReplicaPool>> {
        self.pool.as_ref()
    }
}

impl std::fmt::Debug for ReplicaAwareConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaAwareConnection")
            .field("name", &self.name)
            .field("pool", &self.pool.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

#[async_trait]
impl DataSource for ReplicaAwareConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows> {
        let pool = match &self.pool {
            Some(pool) if !ctx.use_master => pool,
            _ => {
                self.metrics().record_read(true);
                debug!(datasource = %self.name, "Read routed to primary");
                return ctx.run(self.primary.query(ctx, query)).await;
            }
        };
        let replica = pool.next()?;
        self.metrics().record_read(false);
        debug!(datasource = %self.name, replica = %replica.name, "Read routed to replica");
        ctx.run(replica.connection.query(ctx, query)).await
    }

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult> {
        self.metrics().record_write();
        ctx.run(self.primary.exec(ctx, query)).await
    }

    fn find_target(&self, _query: &Query) -> Result<Target> {
        Ok(Target {
            name: self.name.clone(),
            source: Arc::new(self.clone()),
        })
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.primary.close().await {
            errors.push(e);
        }
        if let Some(pool) = &self.pool {
            if let Err(e) = pool.close().await {
                errors.push(e);
            }
        }
        match Error::combine(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn bind_metrics(&self, metrics: &Arc<AccessMetrics>) {
        *self.metrics.write() = metrics.clone();
    }
}

#[async_trait]
impl TxBeginner for ReplicaAwareConnection {
    async fn begin(&self, ctx: &ExecContext, options: &TxOptions) -> Result<Box<dyn NativeTx>> {
        ctx.run(self.primary.begin(ctx, options)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::replica::{Replica, RoundRobinPool};
    use crate::testing::{Call, MockConnection};

    fn setup(replicas: usize) -> (Arc<MockConnection>, Vec<Arc<MockConnection>>, ReplicaAwareConnection) {
        let primary = Arc::new(MockConnection::new("primary"));
        let mocks: Vec<Arc<MockConnection>> = (0..replicas)
            .map(|i| Arc::new(MockConnection::new(format!("r{}", i))))
            .collect();
        let pool = RoundRobinPool::new(
            "users",
            mocks
                .iter()
                .enumerate()
                .map(|(i, m)| Replica::new(format!("r{}", i), m.clone()))
                .collect(),
        );
        let conn = ReplicaAwareConnection::new("users", primary.clone()).with_pool(Arc::new(pool));
        (primary, mocks, conn)
    }

    #[tokio::test]
    async fn test_reads_rotate_over_replicas() {
        let (primary, replicas, conn) = setup(2);
        let ctx = ExecContext::new();
        for _ in 0..3 {
            conn.query(&ctx, &Query::new("SELECT 1")).await.unwrap();
        }
        assert_eq!(replicas[0].calls().len(), 2);
        assert_eq!(replicas[1].calls().len(), 1);
        assert!(primary.calls().is_empty());
    }

    #[tokio::test]
    async fn test_use_master_and_writes_hit_primary() {
        let (primary, replicas, conn) = setup(2);
        conn.query(&ExecContext::new().with_master(), &Query::new("SELECT 1"))
            .await
            .unwrap();
        conn.exec(&ExecContext::new(), &Query::new("UPDATE t SET a = 1"))
            .await
            .unwrap();
        assert_eq!(
            primary.calls(),
            vec![
                Call::Query("SELECT 1".to_string()),
                Call::Exec("UPDATE t SET a = 1".to_string())
            ]
        );
        assert!(replicas.iter().all(|r| r.calls().is_empty()));
    }

    #[tokio::test]
    async fn test_empty_pool_fails_read() {
        let (_, _, conn) = setup(0);
        let err = conn
            .query(&ExecContext::new(), &Query::new("SELECT 1"))
            .await
            .err();
        assert!(matches!(err, Some(Error::NoReplicaAvailable { .. })));
    }

    #[tokio::test]
    async fn test_no_pool_reads_from_primary() {
        let primary = Arc::new(MockConnection::new("primary"));
        let conn = ReplicaAwareConnection::new("users", primary.clone());
        conn.query(&ExecContext::new(), &Query::new("SELECT 1"))
            .await
            .unwrap();
        assert_eq!(primary.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bound_metrics_shared_by_clones() {
        let (_, _, conn) = setup(1);
        let registered = conn.clone();
        let metrics = Arc::new(AccessMetrics::new());
        registered.bind_metrics(&metrics);

        conn.query(&ExecContext::new(), &Query::new("SELECT 1"))
            .await
            .unwrap();
        conn.exec(&ExecContext::new(), &Query::new("UPDATE t SET a = 1"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&conn.metrics(), &metrics));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.replica_reads, 1);
        assert_eq!(snapshot.writes, 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_io() {
        let (primary, _, conn) = setup(1);
        let ctx = ExecContext::new().with_master();
        ctx.cancel.cancel();
        let err = conn.query(&ctx, &Query::new("SELECT 1")).await.err();
        assert_eq!(err, Some(Error::Cancelled));
        assert!(primary.calls().is_empty());
    }
}
