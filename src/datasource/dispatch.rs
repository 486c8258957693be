//! Fan-out of one logical statement to many shards.
//!
//! A [`ShardingAlgorithm`] turns sharding keys into [`Destination`]s; the
//! [`Dispatcher`] runs the routed statements concurrently through the
//! router and hands the per-shard cursors to a merger.

use super::DataSource;
use crate::context::ExecContext;
use crate::error::{Error, Result, TargetFailure};
use crate::rows::{close_all, BoxRows};
use crate::types::{ExecResult, Query};
use crate::value::Value;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where one routed statement goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub shard_group: String,
    pub logical_db: String,
    pub table: String,
}

impl Destination {
    pub fn new(
        shard_group: impl Into<String>,
        logical_db: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            shard_group: shard_group.into(),
            logical_db: logical_db.into(),
            table: table.into(),
        }
    }

    /// `query` aimed at this destination.
    pub fn route(&self, query: &Query) -> Query {
        query
            .clone()
            .in_group(self.shard_group.clone())
            .on_db(self.logical_db.clone())
    }
}

/// Maps sharding keys to destinations.
pub trait ShardingAlgorithm: Send + Sync {
    /// Destinations holding the rows for `keys`.
    fn sharding(&self, keys: &[Value]) -> Result<Vec<Destination>>;

    /// Every destination, for statements without a usable key.
    fn broadcast(&self) -> Vec<Destination>;
}

/// Runs routed statements concurrently against a data source.
#[derive(Clone)]
pub struct Dispatcher {
    source: Arc<dyn DataSource>,
}

impl Dispatcher {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }

    /// Route `query` with `algorithm`: to the key's shards when `keys` is
    /// non-empty, otherwise to every shard.
    pub fn plan(
        algorithm: &dyn ShardingAlgorithm,
        query: &Query,
        keys: &[Value],
    ) -> Result<Vec<Query>> {
        let destinations = if keys.is_empty() {
            algorithm.broadcast()
        } else {
            algorithm.sharding(keys)?
        };
        Ok(destinations.iter().map(|d| d.route(query)).collect())
    }

    /// Open one cursor per query.
    ///
    /// If any query fails, every cursor that did open is closed and the
    /// first error in input order is returned.
    pub async fn query_all(&self, ctx: &ExecContext, queries: &[Query]) -> Result<Vec<BoxRows>> {
        debug!(queries = queries.len(), "Dispatching queries");
        let results = join_all(queries.iter().map(|q| self.source.query(ctx, q))).await;

        let mut cursors = Vec::with_capacity(results.len());
        let mut first_err = None;
        for res in results {
            match res {
                Ok(cursor) => cursors.push(cursor),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(err) = first_err {
            if let Err(close_err) = close_all(&cursors).await {
                warn!(error = %close_err, "Failed to close cursors after dispatch error");
            }
            return Err(err);
        }
        Ok(cursors)
    }

    /// Run every write and combine the results.
    ///
    /// Writes are not atomic across shards: on failure the successful
    /// writes stand and every failing target is reported.
    pub async fn exec_all(&self, ctx: &ExecContext, queries: &[Query]) -> Result<ExecResult> {
        debug!(queries = queries.len(), "Dispatching writes");
        let results = join_all(queries.iter().map(|q| self.source.exec(ctx, q))).await;

        let mut done = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (query, res) in queries.iter().zip(results) {
            match res {
                Ok(r) => done.push(r),
                Err(e) => {
                    let target = self
                        .source
                        .find_target(query)
                        .map(|t| t.name)
                        .unwrap_or_else(|_| {
                            format!("{}/{}", query.shard_group, query.logical_db)
                        });
                    failures.push(TargetFailure::new(target, e));
                }
            }
        }
        if !failures.is_empty() {
            warn!(failed = failures.len(), succeeded = done.len(), "Dispatched writes failed");
            return Err(Error::PartialFailure {
                op: "exec",
                failures,
            });
        }
        Ok(ExecResult::combine(&done))
    }
}
