//! Scalar aggregate merger: one partial row per shard, one output row.

use super::{bind_all, Aggregator, BoundAggregator};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::merger::comparator::ComparatorRegistry;
use crate::merger::{or_close, read_row, shared_columns, Core};
use crate::rows::{BoxRows, Rows};
use crate::value::{Column, Row};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

struct State {
    core: Core,
    /// Shard columns; `core.columns` holds the output columns.
    input: Vec<Column>,
    aggregators: Vec<BoundAggregator>,
    produced: bool,
}

/// Combines the single partial-aggregate row of every shard into one row.
///
/// Output columns are the aggregators' outputs, in order. If every shard
/// returns no row the result is empty; if only some do, iteration fails
/// with [`Error::AggregateSourceEmpty`] naming the first empty shard. A
/// shard with a second row fails with
/// [`Error::AggregateSourceMultipleRows`].
pub struct AggregateMerger {
    state: Mutex<State>,
}

impl AggregateMerger {
    pub async fn new(
        ctx: ExecContext,
        cursors: Vec<BoxRows>,
        aggregators: Vec<Aggregator>,
    ) -> Result<Self> {
        let setup = async {
            let columns = shared_columns(&ctx, &cursors).await?;
            let bound = bind_all(&aggregators, &columns, &ComparatorRegistry::standard())?;
            Ok::<_, Error>((columns, bound))
        }
        .await;
        let (input, aggregators) = or_close(&cursors, setup).await?;

        let output: Vec<Column> = aggregators.iter().map(|a| a.output().clone()).collect();
        Ok(Self {
            state: Mutex::new(State {
                core: Core::new(ctx, output, cursors),
                input,
                aggregators,
                produced: false,
            }),
        })
    }
}

impl State {
    async fn compute(&self) -> Result<Option<Row>> {
        let mut partials = Vec::with_capacity(self.core.cursors.len());
        let mut empty = None;
        for (index, cursor) in self.core.cursors.iter().enumerate() {
            match read_row(&self.core.ctx, cursor.as_ref(), &self.input).await? {
                Some(row) => {
                    if read_row(&self.core.ctx, cursor.as_ref(), &self.input)
                        .await?
                        .is_some()
                    {
                        return Err(Error::AggregateSourceMultipleRows { index });
                    }
                    partials.push(row);
                }
                None => {
                    empty.get_or_insert(index);
                }
            }
        }
        match empty {
            Some(_) if partials.is_empty() => return Ok(None),
            Some(index) => return Err(Error::AggregateSourceEmpty { index }),
            None => {}
        }
        debug!(shards = partials.len(), "Merging partial aggregates");
        let values = self
            .aggregators
            .iter()
            .map(|a| a.aggregate(&partials))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Row::new(values)))
    }
}

#[async_trait]
impl Rows for AggregateMerger {
    async fn next(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.core.guard().await {
            return false;
        }
        if state.produced {
            state.core.exhaust().await;
            return false;
        }
        state.produced = true;
        match state.compute().await {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{collect, MemoryRows};
    use crate::value::{ColumnType, Value};
    use rust_decimal::Decimal;
    fn partial(rows: &[(i64, i64, i64)]) -> BoxRows {
        Box::new(MemoryRows::new(
            vec![
                Column::new("SUM(amount)", ColumnType::Int),
                Column::new("COUNT(amount)", ColumnType::Int),
                Column::new("MAX(amount)", ColumnType::Int),
            ],
            rows.iter()
                .map(|(s, c, m)| Row::new(vec![Value::Int(*s), Value::Int(*c), Value::Int(*m)]))
                .collect(),
        ))
    }

    fn aggregators() -> Vec<Aggregator> {
        vec![
            Aggregator::sum("SUM(amount)"),
            Aggregator::count("COUNT(amount)"),
            Aggregator::max("MAX(amount)"),
            Aggregator::avg("SUM(amount)", "COUNT(amount)"),
        ]
    }

    #[tokio::test]
    async fn test_combines_partial_aggregates() {
        let cursors = vec![partial(&[(100, 10, 40)]), partial(&[(50, 5, 25)])];
        let merger = AggregateMerger::new(ExecContext::new(), cursors, aggregators())
            .await
            .unwrap();

        let names: Vec<String> = merger
            .columns()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            vec!["SUM(amount)", "COUNT(amount)", "MAX(amount)", "AVG(amount)"]
        );

        let rows = collect(&merger).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].values(),
            &[
                Value::Int(150),
                Value::Int(15),
                Value::Int(40),
                Value::Decimal(Decimal::from(10)),
            ]
        );
    }

    #[tokio::test]
    async fn test_all_shards_empty_yields_no_row() {
        let cursors = vec![partial(&[]), partial(&[])];
        let merger = AggregateMerger::new(ExecContext::new(), cursors, aggregators())
            .await
            .unwrap();
        assert!(!merger.next().await);
        assert_eq!(merger.err().await, None);
    }

    #[tokio::test]
    async fn test_some_shards_empty_is_an_error() {
        let cursors = vec![partial(&[(1, 1, 1)]), partial(&[]), partial(&[])];
        let merger = AggregateMerger::new(ExecContext::new(), cursors, aggregators())
            .await
            .unwrap();
        assert!(!merger.next().await);
        assert_eq!(
            merger.err().await,
            Some(Error::AggregateSourceEmpty { index: 1 })
        );
    }

    #[tokio::test]
    async fn test_extra_partial_row_is_an_error() {
        let cursors = vec![partial(&[(1, 1, 1)]), partial(&[(2, 1, 2), (3, 1, 3)])];
        let merger = AggregateMerger::new(ExecContext::new(), cursors, aggregators())
            .await
            .unwrap();
        assert!(!merger.next().await);
        assert_eq!(
            merger.err().await,
            Some(Error::AggregateSourceMultipleRows { index: 1 })
        );
        assert_eq!(
            merger.scan().await,
            Err(Error::AggregateSourceMultipleRows { index: 1 })
        );
    }

    #[tokio::test]
    async fn test_single_productive_next() {
        let cursors = vec![partial(&[(1, 1, 1)])];
        let merger = AggregateMerger::new(ExecContext::new(), cursors, aggregators())
            .await
            .unwrap();
        assert!(merger.next().await);
        assert!(!merger.next().await);
        assert_eq!(merger.scan().await, Err(Error::CursorClosed));
    }

    #[tokio::test]
    async fn test_invalid_aggregator_closes_cursors() {
        let shard = MemoryRows::new(vec![Column::new("name", ColumnType::Text)], vec![]);
        let res = AggregateMerger::new(
            ExecContext::new(),
            vec![Box::new(shard)],
            vec![Aggregator::sum("name")],
        )
        .await;
        assert!(matches!(res, Err(Error::InvalidAggregator(_))));
    }
}
