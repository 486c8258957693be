//! Distinct merger: cross-shard deduplication.
//!
//! Rows are merged through the same heap as the sort merger. All heads
//! sharing the current sort key are drained as one batch into an ordered
//! set keyed by the distinct columns, duplicates collapse, and the batch is
//! emitted before the heap advances. Because the sort key is a subset of
//! the distinct columns, equal distinct tuples always land in the same
//! batch.
//!
//! Without an explicit ordering the key is every distinct column
//! ascending, and the shard cursors must be sorted by it.

use super::comparator::{ComparatorRegistry, KeyedRow, RowComparator, SortColumn};
use super::sort::MergeHeap;
use super::{or_close, shared_columns, Core};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::rows::{BoxRows, Rows};
use crate::value::{column_index, Column, Row};
use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

struct State {
    core: Core,
    heap: MergeHeap,
    /// Sort columns followed by the remaining distinct columns.
    batch_key: Arc<RowComparator>,
    pending: VecDeque<Row>,
}

/// Emits each distinct tuple exactly once across all shard cursors.
pub struct DistinctMerger {
    state: Mutex<State>,
}

impl DistinctMerger {
    /// Create a distinct merger.
    ///
    /// `distinct_columns` empty means every column. `sort_columns` empty
    /// means the cursors are sorted by the distinct columns ascending.
    pub async fn new(
        ctx: ExecContext,
        cursors: Vec<BoxRows>,
        distinct_columns: Vec<String>,
        sort_columns: Vec<SortColumn>,
    ) -> Result<Self> {
        Self::with_registry(
            ctx,
            cursors,
            distinct_columns,
            sort_columns,
            &ComparatorRegistry::standard(),
        )
        .await
    }

    /// Create a distinct merger with custom per-type comparators.
    pub async fn with_registry(
        ctx: ExecContext,
        cursors: Vec<BoxRows>,
        distinct_columns: Vec<String>,
        sort_columns: Vec<SortColumn>,
        registry: &ComparatorRegistry,
    ) -> Result<Self> {
        let setup = async {
            let columns = shared_columns(&ctx, &cursors).await?;
            let keys = build_keys(registry, &columns, distinct_columns, sort_columns)?;
            Ok::<_, Error>((columns, keys))
        }
        .await;
        let (columns, (sort_key, batch_key)) = or_close(&cursors, setup).await?;

        Ok(Self {
            state: Mutex::new(State {
                core: Core::new(ctx, columns, cursors),
                heap: MergeHeap::new(Arc::new(sort_key)),
                batch_key: Arc::new(batch_key),
                pending: VecDeque::new(),
            }),
        })
    }
}

/// The heap ordering and the batch ordering.
fn build_keys(
    registry: &ComparatorRegistry,
    columns: &[Column],
    distinct_columns: Vec<String>,
    sort_columns: Vec<SortColumn>,
) -> Result<(RowComparator, RowComparator)> {
    let distinct: Vec<String> = if distinct_columns.is_empty() {
        columns.iter().map(|c| c.name.clone()).collect()
    } else {
        distinct_columns
    };
    for name in &distinct {
        if column_index(columns, name).is_none() {
            return Err(Error::UnknownColumn(name.clone()));
        }
    }
    for sc in &sort_columns {
        if column_index(columns, &sc.name).is_none() {
            return Err(Error::UnknownSortColumn(sc.name.clone()));
        }
        if !distinct.contains(&sc.name) {
            return Err(Error::SortKeyNotInDistinctColumns(sc.name.clone()));
        }
    }

    let sort_columns = if sort_columns.is_empty() {
        distinct.iter().map(SortColumn::asc).collect()
    } else {
        sort_columns
    };
    let mut batch_key = sort_columns.clone();
    for name in &distinct {
        if !sort_columns.iter().any(|sc| &sc.name == name) {
            batch_key.push(SortColumn::asc(name));
        }
    }
    Ok((
        RowComparator::new(registry, columns, &sort_columns)?,
        RowComparator::new(registry, columns, &batch_key)?,
    ))
}

impl State {
    async fn advance(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.pending.pop_front() {
            return Ok(Some(row));
        }
        let core = &self.core;
        self.heap.prime(core).await?;
        let Some(first) = self.heap.pop(core).await? else {
            return Ok(None);
        };
        let mut batch = BTreeSet::new();
        batch.insert(KeyedRow::new(first.clone(), self.batch_key.clone()));
        while self.heap.peek_equals(&first) {
            if let Some(row) = self.heap.pop(core).await? {
                batch.insert(KeyedRow::new(row, self.batch_key.clone()));
            }
        }
        self.pending.extend(batch.into_iter().map(|k| k.row));
        Ok(self.pending.pop_front())
    }
}

#[async_trait]
impl Rows for DistinctMerger {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{collect, MemoryRows};
    use crate::testing::int_rows;
    use crate::value::{ColumnType, Value};

    fn pair_columns() -> Vec<Column> {
        vec![
            Column::new("user_id", ColumnType::Int),
            Column::new("city", ColumnType::Text),
        ]
    }

    fn pairs(rows: &[(i64, &str)]) -> BoxRows {
        Box::new(MemoryRows::new(
            pair_columns(),
            rows.iter()
                .map(|(id, city)| Row::new(vec![Value::Int(*id), Value::from(*city)]))
                .collect(),
        ))
    }

    fn as_pairs(rows: &[Row]) -> Vec<(i64, String)> {
        rows.iter()
            .map(|r| (r.get::<i64>(0).unwrap(), r.get::<String>(1).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_sorted_distinct_across_and_within_cursors() {
        let cursors = vec![
            pairs(&[(1, "oslo"), (1, "oslo"), (2, "rome"), (3, "lima")]),
            pairs(&[(1, "bonn"), (1, "oslo"), (3, "lima")]),
            pairs(&[]),
            pairs(&[(2, "rome"), (2, "kyiv")]),
        ];
        let merger = DistinctMerger::new(
            ExecContext::new(),
            cursors,
            vec![],
            vec![SortColumn::asc("user_id")],
        )
        .await
        .unwrap();

        assert_eq!(
            as_pairs(&collect(&merger).await.unwrap()),
            vec![
                (1, "bonn".to_string()),
                (1, "oslo".to_string()),
                (2, "kyiv".to_string()),
                (2, "rome".to_string()),
                (3, "lima".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_descending_order_is_preserved() {
        let cursors: Vec<BoxRows> = vec![
            Box::new(int_rows("id", &[5, 5, 3, 1])),
            Box::new(int_rows("id", &[4, 3, 3])),
        ];
        let merger = DistinctMerger::new(
            ExecContext::new(),
            cursors,
            vec![],
            vec![SortColumn::desc("id")],
        )
        .await
        .unwrap();
        let ids: Vec<i64> = collect(&merger)
            .await
            .unwrap()
            .iter()
            .map(|r| r.get::<i64>(0).unwrap())
            .collect();
        assert_eq!(ids, vec![5, 4, 3, 1]);
    }

    #[tokio::test]
    async fn test_default_key_is_every_distinct_column_ascending() {
        let cursors = vec![
            pairs(&[(1, "oslo"), (3, "lima"), (3, "lima")]),
            pairs(&[(1, "oslo"), (2, "rome")]),
            pairs(&[(2, "rome"), (9, "bern")]),
        ];
        let merger = DistinctMerger::new(ExecContext::new(), cursors, vec![], vec![])
            .await
            .unwrap();
        assert_eq!(
            as_pairs(&collect(&merger).await.unwrap()),
            vec![
                (1, "oslo".to_string()),
                (2, "rome".to_string()),
                (3, "lima".to_string()),
                (9, "bern".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_subset_of_columns_without_ordering() {
        let cursors = vec![
            pairs(&[(1, "oslo"), (2, "oslo"), (7, "rome")]),
            pairs(&[(4, "bonn"), (5, "oslo")]),
        ];
        let merger = DistinctMerger::new(
            ExecContext::new(),
            cursors,
            vec!["city".to_string()],
            vec![],
        )
        .await
        .unwrap();
        let cities: Vec<String> = collect(&merger)
            .await
            .unwrap()
            .iter()
            .map(|r| r.get::<String>(1).unwrap())
            .collect();
        assert_eq!(cities, vec!["bonn", "oslo", "rome"]);
    }

    #[tokio::test]
    async fn test_sort_key_must_be_distinct_column() {
        let res = DistinctMerger::new(
            ExecContext::new(),
            vec![pairs(&[(1, "oslo")])],
            vec!["city".to_string()],
            vec![SortColumn::asc("user_id")],
        )
        .await;
        assert!(matches!(
            res,
            Err(Error::SortKeyNotInDistinctColumns(ref c)) if c == "user_id"
        ));
    }

    #[tokio::test]
    async fn test_unknown_distinct_column() {
        let res = DistinctMerger::new(
            ExecContext::new(),
            vec![pairs(&[(1, "oslo")])],
            vec!["zip".to_string()],
            vec![],
        )
        .await;
        assert!(matches!(res, Err(Error::UnknownColumn(ref c)) if c == "zip"));
    }
}
