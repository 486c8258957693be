//! Result-merging engine.
//!
//! Mergers combine the independent cursors returned by each shard into one
//! logical cursor. Every merger implements [`Rows`](crate::rows::Rows), so
//! they nest: a [`Paging`] over a [`SortMerger`] is the usual shape of a
//! sharded `ORDER BY ... LIMIT` query.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Paging (offset/limit)                  │
//! └───────────────────────────────────────────────────────────────┘
//!                                │
//!   ┌──────────────┬─────────────┼─────────────┬──────────────────┐
//!   ▼              ▼             ▼             ▼                  ▼
//! ┌───────┐   ┌─────────┐   ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │ Batch │   │  Sort   │   │ Distinct │   │ Aggregate │   │  GroupBy  │
//! │concat │   │ k-way   │   │ k-way +  │   │ one row   │   │ buffered  │
//! │       │   │ heap    │   │ dedup    │   │           │   │ sorted map│
//! └───────┘   └─────────┘   └──────────┘   └───────────┘   └───────────┘
//!       │          │              │              │               │
//!       └──────────┴──────────────┴──────────────┴───────────────┘
//!                                │
//!                     shard cursors (BoxRows × N)
//! ```
//!
//! # Lifecycle
//!
//! Each merger keeps its state behind one async mutex held for the whole of
//! every public call, so `close` from another task is safe mid-iteration.
//! The first iteration error is sticky: later `next` calls return `false`
//! and `scan` returns that error. `close` is idempotent; the first call
//! reports every underlying close failure, later calls return `Ok`.

pub mod aggregate;
mod batch;
pub mod comparator;
mod distinct;
mod groupby;
mod paging;
mod sort;

pub use aggregate::{AggregateMerger, Aggregator};
pub use batch::BatchMerger;
pub use comparator::{ComparatorRegistry, Order, RowComparator, SortColumn};
pub use distinct::DistinctMerger;
pub use groupby::GroupByMerger;
pub use paging::Paging;
pub use sort::SortMerger;

use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::rows::{close_all, BoxRows, Rows};
use crate::value::{column_names, Column, Row};
use tracing::warn;

/// Shared lifecycle state of a merger.
pub(crate) struct Core {
    pub(crate) ctx: ExecContext,
    pub(crate) columns: Vec<Column>,
    pub(crate) cursors: Vec<BoxRows>,
    pub(crate) current: Option<Row>,
    pub(crate) closed: bool,
    pub(crate) last_err: Option<Error>,
    released: bool,
    close_err: Option<Error>,
}

impl Core {
    pub(crate) fn new(ctx: ExecContext, columns: Vec<Column>, cursors: Vec<BoxRows>) -> Self {
        Self {
            ctx,
            columns,
            cursors,
            current: None,
            closed: false,
            last_err: None,
            released: false,
            close_err: None,
        }
    }

    /// Whether iteration is over for good.
    pub(crate) fn is_done(&self) -> bool {
        self.closed || self.last_err.is_some()
    }

    /// Close the underlying cursors exactly once, keeping the outcome for
    /// the first explicit `close`.
    pub(crate) async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = close_all(&self.cursors).await {
            warn!(error = %e, "Failed to close underlying cursors");
            self.close_err = Some(e);
        }
    }

    /// Record an iteration error and shut the merger down.
    pub(crate) async fn fail(&mut self, err: Error) {
        if self.last_err.is_none() {
            self.last_err = Some(err);
        }
        self.current = None;
        self.closed = true;
        self.release().await;
    }

    /// Normal end of iteration.
    pub(crate) async fn exhaust(&mut self) {
        self.current = None;
        self.closed = true;
        self.release().await;
    }

    /// Check the execution context before doing any work.
    pub(crate) async fn guard(&mut self) -> bool {
        if self.is_done() {
            return false;
        }
        if let Err(e) = self.ctx.check() {
            self.fail(e).await;
            return false;
        }
        true
    }

    /// Read one checked row from cursor `idx`.
    pub(crate) async fn read(&self, idx: usize) -> Result<Option<Row>> {
        read_row(&self.ctx, self.cursors[idx].as_ref(), &self.columns).await
    }

    pub(crate) async fn scan(&mut self) -> Result<Row> {
        if let Some(e) = &self.last_err {
            return Err(e.clone());
        }
        if self.closed {
            return Err(Error::CursorClosed);
        }
        if let Err(e) = self.ctx.check() {
            self.fail(e.clone()).await;
            return Err(e);
        }
        self.current.clone().ok_or(Error::ScanWithoutNext)
    }

    pub(crate) fn columns(&self) -> Result<Vec<Column>> {
        if self.closed {
            return Err(Error::CursorClosed);
        }
        Ok(self.columns.clone())
    }

    pub(crate) async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = None;
        self.release().await;
        match self.close_err.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn err(&self) -> Option<Error> {
        self.last_err.clone()
    }
}

/// Advance `cursor` under `ctx` and return its next row, checked against
/// the declared columns. `None` means the cursor is exhausted.
pub(crate) async fn read_row(
    ctx: &ExecContext,
    cursor: &dyn Rows,
    columns: &[Column],
) -> Result<Option<Row>> {
    let has_row = ctx.run(async { Ok::<_, Error>(cursor.next().await) }).await?;
    if !has_row {
        return match cursor.err().await {
            Some(e) => Err(e),
            None => Ok(None),
        };
    }
    let row = ctx.run(cursor.scan()).await?;
    row.check(columns)?;
    Ok(Some(row))
}

/// Fetch the columns of every cursor and require the same ordered names
/// and types. Nullability is merged: a column is nullable if any shard
/// reports it nullable.
pub(crate) async fn shared_columns(ctx: &ExecContext, cursors: &[BoxRows]) -> Result<Vec<Column>> {
    let first = cursors.first().ok_or(Error::NoCursors)?;
    let mut columns = ctx.run(first.columns()).await?;
    for cursor in &cursors[1..] {
        let other = ctx.run(cursor.columns()).await?;
        let same = other.len() == columns.len()
            && other
                .iter()
                .zip(columns.iter())
                .all(|(a, b)| a.name == b.name && a.ty == b.ty);
        if !same {
            return Err(Error::ColumnSetMismatch {
                expected: column_names(&columns),
                actual: column_names(&other),
            });
        }
        for (merged, col) in columns.iter_mut().zip(other.iter()) {
            merged.nullable |= col.nullable;
        }
    }
    Ok(columns)
}

/// Run a fallible constructor step; on failure close the cursors the
/// merger would have owned before returning the error.
pub(crate) async fn or_close<T>(cursors: &[BoxRows], res: Result<T>) -> Result<T> {
    if res.is_err() {
        if let Err(e) = close_all(cursors).await {
            warn!(error = %e, "Failed to close cursors after merger construction error");
        }
    }
    res
}
