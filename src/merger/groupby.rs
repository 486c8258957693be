//! Grouped-aggregate merger.
//!
//! Shards return one partial row per group they hold, and a group may live
//! on several shards. Every row is read up front into a map ordered by the
//! group-by tuple, so the output is sorted by the group columns ascending.
//! Memory use is proportional to the total number of partial rows.

use super::aggregate::{bind_all, Aggregator, BoundAggregator};
use super::comparator::{ComparatorRegistry, KeyedRow, RowComparator, SortColumn};
use super::{or_close, shared_columns, Core};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::rows::{BoxRows, Rows};
use crate::value::{column_index, Column, Row, Value};
use async_trait::async_trait;
use std::collections::{btree_map, BTreeMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct State {
    core: Core,
    input: Vec<Column>,
    group_index: Vec<usize>,
    key: Arc<RowComparator>,
    aggregators: Vec<BoundAggregator>,
    groups: Option<btree_map::IntoIter<KeyedRow, Vec<Row>>>,
}

/// Merges per-shard grouped partial aggregates.
///
/// Output columns are the group columns followed by the aggregator outputs.
pub struct GroupByMerger {
    state: Mutex<State>,
}

impl GroupByMerger {
    pub async fn new(
        ctx: ExecContext,
        cursors: Vec<BoxRows>,
        group_columns: Vec<String>,
        aggregators: Vec<Aggregator>,
    ) -> Result<Self> {
        Self::with_registry(
            ctx,
            cursors,
            group_columns,
            aggregators,
            &ComparatorRegistry::standard(),
        )
        .await
    }

    /// Create a grouped-aggregate merger with custom per-type comparators.
    pub async fn with_registry(
        ctx: ExecContext,
        cursors: Vec<BoxRows>,
        group_columns: Vec<String>,
        aggregators: Vec<Aggregator>,
        registry: &ComparatorRegistry,
    ) -> Result<Self> {
        let setup = async {
            let input = shared_columns(&ctx, &cursors).await?;
            let mut group_index = Vec::with_capacity(group_columns.len());
            for name in &group_columns {
                let idx =
                    column_index(&input, name).ok_or_else(|| Error::UnknownColumn(name.clone()))?;
                group_index.push(idx);
            }
            let sort: Vec<SortColumn> = group_columns.iter().map(SortColumn::asc).collect();
            let key = RowComparator::new(registry, &input, &sort)?;
            let bound = bind_all(&aggregators, &input, registry)?;
            Ok::<_, Error>((input, group_index, key, bound))
        }
        .await;
        let (input, group_index, key, aggregators) = or_close(&cursors, setup).await?;

        let output: Vec<Column> = group_index
            .iter()
            .map(|&i| input[i].clone())
            .chain(aggregators.iter().map(|a| a.output().clone()))
            .collect();
        Ok(Self {
            state: Mutex::new(State {
                core: Core::new(ctx, output, cursors),
                input,
                group_index,
                key: Arc::new(key),
                aggregators,
                groups: None,
            }),
        })
    }
}

impl State {
    /// Drain every cursor into the group map and release them.
    async fn load(&mut self) -> Result<()> {
        let mut groups: BTreeMap<KeyedRow, Vec<Row>> = BTreeMap::new();
        let mut total = 0usize;
        for cursor in &self.core.cursors {
            while let Some(row) =
                super::read_row(&self.core.ctx, cursor.as_ref(), &self.input).await?
            {
                total += 1;
                groups
                    .entry(KeyedRow::new(row.clone(), self.key.clone()))
                    .or_default()
                    .push(row);
            }
        }
        debug!(rows = total, groups = groups.len(), "Loaded grouped partials");
        self.core.release().await;
        self.groups = Some(groups.into_iter());
        Ok(())
    }

    async fn advance(&mut self) -> Result<Option<Row>> {
        if self.groups.is_none() {
            self.load().await?;
        }
        let Some((key, rows)) = self.groups.as_mut().and_then(|g| g.next()) else {
            return Ok(None);
        };
        let mut values: Vec<Value> = self
            .group_index
            .iter()
            .map(|&i| key.row.values()[i].clone())
            .collect();
        for aggregator in &self.aggregators {
            values.push(aggregator.aggregate(&rows)?);
        }
        Ok(Some(Row::new(values)))
    }
}

#[async_trait]
impl Rows for GroupByMerger {
    async fn next(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.core.guard().await {
            return false;
        }
        match state.advance().await {
            Ok(Some(row)) => {
                state.core.current = Some(row);
                true
            }
            Ok(None) => {
                state.core.exhaust().await;
                false
            }
            Err(e) => {
                state.core.fail(e).await;
                false
            }
        }
    }

    async fn scan(&self) -> Result<Row> {
        self.state.lock().await.core.scan().await
    }

    async fn columns(&self) -> Result<Vec<Column>> {
        self.state.lock().await.core.columns()
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.core.close().await
    }

    async fn err(&self) -> Option<Error> {
        self.state.lock().await.core.err()
    }
}
