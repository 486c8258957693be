//! Sharded SQL access layer.
//!
//! This crate sits between application code and a fleet of relational
//! databases and provides:
//! - **Primary/replica routing** with round-robin and DNS-refreshed replica pools
//! - **Shard routing** from `(shard group, logical database)` to a connection
//! - **Logical transactions** spanning one (`single`) or many (`delay`) targets
//! - **Streaming merges** of per-shard cursors: concatenation, k-way sort,
//!   distinct, aggregates, group-by and paging
//!
//! SQL parsing, query rewriting and shard-key computation are left to the
//! caller; every [`Query`] arrives already routed.
//!
//! # Example
//!
//! ```rust,no_run
//! use shardkit::testing::MockConnection;
//! use shardkit::{
//!     collect, DataSource, ExecContext, Query, ReplicaAwareConnection, Router, ShardMap,
//!     SortColumn, SortMerger, TxContext, TxStrategy,
//! };
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Two logical databases in the "orders" shard group
//!     let shards = (0..2)
//!         .map(|i| {
//!             let db = format!("orders_{}", i);
//!             let primary = Arc::new(MockConnection::new(db.clone()));
//!             (db.clone(), ReplicaAwareConnection::new(db, primary))
//!         })
//!         .collect();
//!     let group: Arc<dyn DataSource> = Arc::new(ShardMap::new("orders", shards));
//!     let router = Router::new(HashMap::from([("orders".to_string(), group)]));
//!
//!     // Scatter a read and merge the sorted shard results
//!     let ctx = ExecContext::new();
//!     let mut cursors = Vec::new();
//!     for db in ["orders_0", "orders_1"] {
//!         let q = Query::new("SELECT id FROM orders ORDER BY id")
//!             .in_group("orders")
//!             .on_db(db);
//!         cursors.push(router.query(&ctx, &q).await?);
//!     }
//!     let merged = SortMerger::new(ctx, cursors, vec![SortColumn::asc("id")]).await?;
//!     let rows = collect(&merged).await?;
//!     println!("{} rows", rows.len());
//!
//!     // Write to two shards in one logical transaction
//!     let ctx = ExecContext::new().with_transaction(TxContext::new(TxStrategy::Delay));
//!     let tx = router.begin_tx(&ctx).await?;
//!     for db in ["orders_0", "orders_1"] {
//!         let q = Query::new("UPDATE orders SET paid = 1").in_group("orders").on_db(db);
//!         tx.exec(&ctx, &q).await?;
//!     }
//!     tx.commit(&ctx).await?;
//!
//!     router.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Application Layer                │
//! └─────────────────────────────────────────────┘
//!          │ query / exec / begin_tx      ▲ Rows
//!          ▼                              │
//! ┌─────────────────────┐      ┌─────────────────────┐
//! │  Router             │      │  Mergers            │
//! │  • shard group      │      │  • Batch / Sort     │
//! │  • Tx (single/delay)│      │  • Distinct         │
//! └─────────────────────┘      │  • Aggregate/GroupBy│
//!          │                   │  • Paging           │
//!          ▼                   └─────────────────────┘
//! ┌─────────────────────┐                 ▲
//! │  ShardMap           │                 │ per-shard cursors
//! │  • logical db       │─────────────────┘
//! └─────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────┐      ┌─────────────────────┐
//! │ ReplicaAware        │─────►│ ReplicaPool         │
//! │ Connection (primary)│      │ round-robin / DNS   │
//! └─────────────────────┘      └─────────────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Reads**: replicas by default, the primary when `use_master` is set
//! - **Single**: one native transaction, atomic on its target
//! - **Delay**: one native transaction per target, committed in order with
//!   no two-phase commit; a failed target does not undo the others

pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod merger;
pub mod metrics;
pub mod rows;
pub mod testing;
pub mod transaction;
pub mod types;
pub mod value;

// Re-export main types for convenience
pub use config::{DnsPoolConfig, RouterConfig};
pub use context::{ExecContext, IsolationLevel, TxContext, TxOptions, TxStrategy};
pub use error::{Error, Result, TargetFailure};
pub use types::{ExecResult, Query};
pub use value::{Column, ColumnType, FromValue, Row, Value};

// Re-export routing types
pub use datasource::{
    Connection, Connector, DataSource, Destination, Dispatcher, DnsReplicaPool, NativeTx,
    Replica, ReplicaAwareConnection, ReplicaPool, Resolver, RoundRobinPool, Router, ShardMap,
    ShardingAlgorithm, SystemResolver, Target, TxBeginner,
};

// Re-export transaction types
pub use transaction::{DelayTx, SingleTx, Tx, TxState};

// Re-export cursor and merge types
pub use merger::{
    AggregateMerger, Aggregator, BatchMerger, ComparatorRegistry, DistinctMerger, GroupByMerger,
    Order, Paging, RowComparator, SortColumn, SortMerger,
};
pub use rows::{close_all, collect, BoxRows, MemoryRows, Rows};

// Re-export metrics types
pub use metrics::{AccessMetrics, Counter, Gauge, MetricsSnapshot, TargetCounter};
