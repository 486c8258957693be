//! Top of the routing tree.
//!
//! Maps a shard group name to its data source and names every resolved
//! target by that group, so two groups whose leaves share a name still
//! resolve to distinct targets.

use super::{DataSource, Target};
use crate::config::RouterConfig;
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::metrics::AccessMetrics;
use crate::rows::BoxRows;
use crate::transaction::{self, Tx};
use crate::types::{ExecResult, Query};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_GROUP: &str = "<default>";

/// Top of the routing tree: shard group name to data source.
///
/// A query with an empty shard group goes to the configured default group,
/// or to the only registered group when there is exactly one. Cloning is
/// cheap and shares the registered sources.
///
/// The router's metrics are bound into every registered source, so leaf
/// reads and writes are counted alongside routing and transaction events.
#[derive(Clone)]
pub struct Router {
    sources: Arc<HashMap<String, Arc<dyn DataSource>>>,
    config: RouterConfig,
    metrics: Arc<AccessMetrics>,
}

impl Router {
    pub fn new(sources: HashMap<String, Arc<dyn DataSource>>) -> Self {
        let router = Self {
            sources: Arc::new(sources),
            config: RouterConfig::default(),
            metrics: Arc::new(AccessMetrics::new()),
        };
        router.bind_sources();
        router
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Record into a shared metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<AccessMetrics>) -> Self {
        self.metrics = metrics;
        self.bind_sources();
        self
    }

    fn bind_sources(&self) {
        for source in self.sources.values() {
            source.bind_metrics(&self.metrics);
        }
    }

    pub fn metrics(&self) -> &Arc<AccessMetrics> {
        &self.metrics
    }

    /// Registered shard groups, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.sources.keys().cloned().collect();
        groups.sort();
        groups
    }

    /// The registered group key and source serving `query`.
    fn source(&self, query: &Query) -> Result<(&str, &Arc<dyn DataSource>)> {
        let found = if query.shard_group.is_empty() {
            match &self.config.default_group {
                Some(group) => self.sources.get_key_value(group),
                None if self.sources.len() == 1 => self.sources.iter().next(),
                None => None,
            }
        } else {
            self.sources.get_key_value(&query.shard_group)
        };
        found.map(|(group, source)| (group.as_str(), source)).ok_or_else(|| {
            self.metrics.record_routing_failure();
            let name = if query.shard_group.is_empty() {
                self.config
                    .default_group
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string())
            } else {
                query.shard_group.clone()
            };
            debug!(group = %name, "No data source for shard group");
            Error::TargetNotFound { name }
        })
    }

    /// Begin a logical transaction using the strategy in `ctx.transaction`.
    pub async fn begin_tx(&self, ctx: &ExecContext) -> Result<Box<dyn Tx>> {
        let tx_ctx = ctx
            .transaction
            .as_ref()
            .ok_or_else(|| Error::UnsupportedTransactionStrategy("none".to_string()))?;
        let strategy = tx_ctx
            .strategy
            .ok_or_else(|| Error::UnsupportedTransactionStrategy("none".to_string()))?;
        ctx.check()?;
        self.metrics.tx_begun.inc();
        debug!(strategy = %strategy, "Beginning transaction");
        Ok(transaction::begin(
            strategy,
            Arc::new(self.clone()),
            tx_ctx.options,
            self.metrics.clone(),
        ))
    }
}

#[async_trait]
impl DataSource for Router {
    fn name(&self) -> &str {
        "router"
    }

    async fn query(&self, ctx: &ExecContext, query: &Query) -> Result<BoxRows> {
        self.source(query)?.1.query(ctx, query).await
    }

    async fn exec(&self, ctx: &ExecContext, query: &Query) -> Result<ExecResult> {
        self.source(query)?.1.exec(ctx, query).await
    }

    fn find_target(&self, query: &Query) -> Result<Target> {
        let (group, source) = self.source(query)?;
        match source.find_target(query) {
            Ok(mut target) => {
                target.name = qualify(group, source.name(), &target.name);
                Ok(target)
            }
            Err(Error::TargetNotFound { name }) => {
                self.metrics.record_routing_failure();
                Err(Error::TargetNotFound {
                    name: qualify(group, source.name(), &name),
                })
            }
            Err(e) => {
                self.metrics.record_routing_failure();
                Err(e)
            }
        }
    }

    fn bind_metrics(&self, metrics: &Arc<AccessMetrics>) {
        for source in self.sources.values() {
            source.bind_metrics(metrics);
        }
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        for group in self.groups() {
            if let Some(source) = self.sources.get(&group) {
                if let Err(e) = source.close().await {
                    errors.push(e);
                }
            }
        }
        info!(groups = self.sources.len(), "Router closed");
        match Error::combine(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Re-root a name produced by `source` under the router key `group`.
///
/// `orders/db_1` from a source named `orders` keeps its `db_1` suffix; a
/// leaf's bare name becomes the group itself.
fn qualify(group: &str, source: &str, name: &str) -> String {
    match name
        .strip_prefix(source)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        Some(rest) => format!("{}/{}", group, rest),
        None => group.to_string(),
    }
}
