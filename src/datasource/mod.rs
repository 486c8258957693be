//! Routing tree from a query to a physical database connection.
//!
//! # Architecture
//!
//! ```text
//!                          ┌──────────────────────┐
//!   Query{group, db} ─────►│        Router        │  shard_group → source
//!                          └──────────┬───────────┘
//!                    ┌────────────────┴────────────────┐
//!                    ▼                                 ▼
//!          ┌───────────────────┐             ┌───────────────────┐
//!          │     ShardMap      │  db → conn  │ ReplicaAware      │ (non-sharded
//!          └─────────┬─────────┘             │ Connection        │  group)
//!                    ▼                       └───────────────────┘
//!          ┌───────────────────┐
//!          │ ReplicaAware      │  use_master? primary : pool.next()
//!          │ Connection        │
//!          └────┬─────────┬────┘
//!               ▼         ▼
//!          ┌────────┐ ┌─────────────────────────────────┐
//!          │primary │ │ ReplicaPool (round-robin / DNS) │
//!          └────────┘ └─────────────────────────────────┘
//! ```
//!
//! Every level implements [`DataSource`], so a group may map to a shard
//! map or straight to a single replica-aware connection.

pub mod dispatch;
pub mod replica;
mod replica_aware;
mod router;
mod shard_map;

pub use dispatch::{Destination, Dispatcher, ShardingAlgorithm};
pub use replica::{
    Connector, DnsReplicaPool, Replica, ReplicaPool, Resolver, RoundRobinPool, SystemResolver,
};
pub use replica_aware::ReplicaAwareConnection;
pub use router::Router;
pub use shard_map::ShardMap;

use crate::context::{ExecContext, TxOptions};
use crate::error::Result;
use crate::metrics::AccessMetrics;
use crate::rows::BoxRows;
use crate::types::{ExecResult, Query};
use async_trait::async_trait;
use std::sync::Arc;

/// A driver connection to one physical database.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows>;

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult>;

    /// Open a native transaction on this connection.
    async fn begin(&self, ctx: &ExecContext, options: &TxOptions) -> Result<Box<dyn NativeTx>>;

    async fn close(&self) -> Result<()>;
}

/// A driver transaction on one physical database.
#[async_trait]
pub trait NativeTx: Send + Sync {
    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows>;

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult>;

    async fn commit(&self, ctx: &ExecContext) -> Result<()>;

    async fn rollback(&self, ctx: &ExecContext) -> Result<()>;
}

/// Something that can open native transactions.
#[async_trait]
pub trait TxBeginner: Send + Sync {
    async fn begin(&self, ctx: &ExecContext, options: &TxOptions) -> Result<Box<dyn NativeTx>>;
}

/// A resolved physical target.
#[derive(Clone)]
pub struct Target {
    /// Fully qualified name: `group/db` for sharded routes, the shard group
    /// otherwise. Names are unique within one router.
    pub name: String,
    pub source: Arc<dyn TxBeginner>,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target").field("name", &self.name).finish()
    }
}

/// A node of the routing tree.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows>;

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult>;

    /// Resolve the physical target of `query` without issuing any I/O.
    fn find_target(&self, query: &Query) -> Result<Target>;

    async fn close(&self) -> Result<()>;

    /// Record into `metrics` from now on. Nodes without counters ignore it.
    fn bind_metrics(&self, _metrics: &Arc<AccessMetrics>) {}
}
