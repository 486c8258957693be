//! Shard group node: logical database to replica-aware connection.
//!
//! Targets are named `group/db`; an unknown logical database is a
//! `TargetNotFound` carrying that name.

use super::{DataSource, ReplicaAwareConnection, Target};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::metrics::AccessMetrics;
use crate::rows::BoxRows;
use crate::types::{ExecResult, Query};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The physical databases of one shard group, keyed by logical database.
pub struct ShardMap {
    name: String,
    shards: HashMap<String, ReplicaAwareConnection>,
}

impl ShardMap {
    pub fn new(name: impl Into<String>, shards: HashMap<String, ReplicaAwareConnection>) -> Self {
        Self {
            name: name.into(),
            shards,
        }
    }

    /// Logical databases in this group, sorted.
    pub fn databases(&self) -> Vec<String> {
        let mut dbs: Vec<String> = self.shards.keys().cloned().collect();
        dbs.sort();
        dbs
    }

    fn shard(&self, query: &Query) -> Result<&ReplicaAwareConnection> {
        self.shards
            .get(&query.logical_db)
            .ok_or_else(|| Error::TargetNotFound {
                name: format!("{}/{}", self.name, query.logical_db),
            })
    }
}

#[async_trait]
impl DataSource for ShardMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows> {
        let shard = self.shard(query)?;
        debug!(group = %self.name, db = %query.logical_db, "Routing query");
        shard.query(ctx, query).await
    }

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult> {
        let shard = self.shard(query)?;
        debug!(group = %self.name, db = %query.logical_db, "Routing exec");
        shard.exec(ctx, query).await
    }

    fn find_target(&self, query: &Query) -> Result<Target> {
        let shard = self.shard(query)?;
        Ok(Target {
            name: format!("{}/{}", self.name, query.logical_db),
            source: Arc::new(shard.clone()),
        })
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        for db in self.databases() {
            if let Some(shard) = self.shards.get(&db) {
                if let Err(e) = shard.close().await {
                    errors.push(e);
                }
            }
        }
        match Error::combine(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn bind_metrics(&self, metrics: &Arc<AccessMetrics>) {
        for shard in self.shards.values() {
            shard.bind_metrics(metrics);
        }
    }
}
