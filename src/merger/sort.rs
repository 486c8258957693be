//! Sort merger: k-way merge of locally sorted shard cursors.

use super::comparator::{ComparatorRegistry, RowComparator, SortColumn};
use super::{or_close, shared_columns, Core};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::rows::{BoxRows, Rows};
use crate::value::{Column, Row};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Head row of one cursor inside the merge heap.
pub(crate) struct HeapEntry {
    pub(crate) row: Row,
    pub(crate) source: usize,
    comparator: Arc<RowComparator>,
}

impl HeapEntry {
    pub(crate) fn new(row: Row, source: usize, comparator: Arc<RowComparator>) -> Self {
        Self {
            row,
            source,
            comparator,
        }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed: `BinaryHeap` is a max-heap and we pop the smallest key.
    // Ties go to the lower source index so equal keys keep input order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator
            .compare(&other.row, &self.row)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Heap of cursor heads shared by the sort and distinct mergers.
pub(crate) struct MergeHeap {
    heap: BinaryHeap<HeapEntry>,
    comparator: Arc<RowComparator>,
    primed: bool,
}

impl MergeHeap {
    pub(crate) fn new(comparator: Arc<RowComparator>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            comparator,
            primed: false,
        }
    }

    pub(crate) fn comparator(&self) -> &Arc<RowComparator> {
        &self.comparator
    }

    /// Read the first row of every cursor, once.
    pub(crate) async fn prime(&mut self, core: &Core) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;
        for source in 0..core.cursors.len() {
            self.refill(core, source).await?;
        }
        Ok(())
    }

    /// Push the next row of `source`, if it has one.
    pub(crate) async fn refill(&mut self, core: &Core, source: usize) -> Result<()> {
        if let Some(row) = core.read(source).await? {
            self.heap
                .push(HeapEntry::new(row, source, self.comparator.clone()));
        }
        Ok(())
    }

    /// Pop the smallest head and replace it with the next row of its cursor.
    pub(crate) async fn pop(&mut self, core: &Core) -> Result<Option<Row>> {
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        self.refill(core, entry.source).await?;
        Ok(Some(entry.row))
    }

    /// Whether the smallest head compares equal to `row`.
    pub(crate) fn peek_equals(&self, row: &Row) -> bool {
        self.heap
            .peek()
            .map(|head| self.comparator.compare(&head.row, row) == Ordering::Equal)
            .unwrap_or(false)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

struct State {
    core: Core,
    heap: MergeHeap,
}

/// Merges cursors that are each sorted by the same key into one globally
/// sorted stream.
///
/// Holds at most one buffered row per cursor. The caller guarantees that
/// every cursor is sorted by `sort_columns`; the merger does not re-check.
pub struct SortMerger {
    state: Mutex<State>,
}

impl SortMerger {
    /// Create a sort merger with the standard comparators.
    pub async fn new(
        ctx: ExecContext,
        cursors: Vec<BoxRows>,
        sort_columns: Vec<SortColumn>,
    ) -> Result<Self> {
        Self::with_registry(ctx, cursors, sort_columns, &ComparatorRegistry::standard()).await
    }

    /// Create a sort merger with custom per-type comparators.
    pub async fn with_registry(
        ctx: ExecContext,
        cursors: Vec<BoxRows>,
        sort_columns: Vec<SortColumn>,
        registry: &ComparatorRegistry,
    ) -> Result<Self> {
        let setup = async {
            let columns = shared_columns(&ctx, &cursors).await?;
            let comparator = RowComparator::new(registry, &columns, &sort_columns)?;
            Ok::<_, Error>((columns, comparator))
        }
        .await;
        let (columns, comparator) = or_close(&cursors, setup).await?;

        Ok(Self {
            state: Mutex::new(State {
                core: Core::new(ctx, columns, cursors),
                heap: MergeHeap::new(Arc::new(comparator)),
            }),
        })
    }
}

#[async_trait]
impl Rows for SortMerger {
    async fn next(&self) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.core.guard().await {
            return false;
        }
        let popped = match state.heap.prime(&state.core).await {
            Ok(()) => state.heap.pop(&state.core).await,
            Err(e) => Err(e),
        };
        match popped {
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
