//! Testing utilities for the access layer.
//!
//! This module provides driver doubles and cursor fixtures so routing,
//! transactions and merges can be exercised without a database:
//! - [`MockConnection`] records every call and fails on demand through its
//!   [`FailurePlan`]
//! - [`MockConnector`] and [`StaticResolver`] drive the DNS replica pool
//! - [`ScriptedRows`] wraps an in-memory cursor with iteration and close
//!   failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Testing Framework                          │
//! │                                                                 │
//! │  ┌──────────────────────────┐   ┌────────────────────────────┐ │
//! │  │     MockConnection       │   │      ScriptedRows          │ │
//! │  │  - call log (Call)       │   │  - fail_after(n, err)      │ │
//! │  │  - FailurePlan           │   │  - fail_close(err)         │ │
//! │  │  - MockTx / cursors      │   └────────────────────────────┘ │
//! │  └──────────────────────────┘                                   │
//! │  ┌──────────────────────────┐   ┌────────────────────────────┐ │
//! │  │     MockConnector        │   │      StaticResolver        │ │
//! │  │  - one conn per address  │   │  - set(addrs) / fail(err)  │ │
//! │  └──────────────────────────┘   └────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use shardkit::testing::{Call, MockConnection};
//! use shardkit::{Connection, Error, ExecContext, Query};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let conn = MockConnection::new("primary");
//! conn.plan().fail_exec = Some(Error::driver("deadlock"));
//!
//! let res = conn.exec(&ExecContext::new(), &Query::new("UPDATE t SET a = 1")).await;
//! assert_eq!(res, Err(Error::driver("deadlock")));
//! assert_eq!(conn.calls(), vec![Call::Exec("UPDATE t SET a = 1".to_string())]);
//! # }
//! ```

mod mock;
mod rows;

#[cfg(test)]
mod routing_tests;
#[cfg(test)]
mod transaction_tests;

pub use mock::{Call, FailurePlan, MockConnection, MockConnector, StaticResolver};
pub use rows::{int_rows, user_rows, ScriptedRows};

use crate::datasource::{DataSource, ReplicaAwareConnection, Router, ShardMap};
use std::collections::HashMap;
use std::sync::Arc;

/// A router over one sharded group backed by mock primaries.
#[derive(Clone)]
pub struct TestShards {
    pub router: Router,
    /// Mock primary per logical database, in index order.
    pub primaries: Vec<Arc<MockConnection>>,
    pub group: String,
}

impl TestShards {
    /// One group named `group` with databases `db_0 .. db_{count-1}`.
    pub fn new(group: &str, count: usize) -> Self {
        let primaries: Vec<Arc<MockConnection>> = (0..count)
            .map(|i| Arc::new(MockConnection::new(Self::db(i))))
            .collect();
        let shards = primaries
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let db = Self::db(i);
                (db.clone(), ReplicaAwareConnection::new(db, m.clone()))
            })
            .collect();
        let source: Arc<dyn DataSource> = Arc::new(ShardMap::new(group, shards));
        Self {
            router: Router::new(HashMap::from([(group.to_string(), source)])),
            primaries,
            group: group.to_string(),
        }
    }

    /// Logical database name of shard `index`.
    pub fn db(index: usize) -> String {
        format!("db_{}", index)
    }

    /// Fully qualified target name of shard `index`.
    pub fn target(&self, index: usize) -> String {
        format!("{}/{}", self.group, Self::db(index))
    }
}
