//! Result cursor abstraction.
//!
//! [`Rows`] is the streaming interface shared by raw per-shard cursors
//! returned from a driver and every merger built on top of them, so mergers
//! can be nested freely.
//!
//! ```text
//!   next() ──► true ──► scan() ──► Row
//!     │
//!     └──► false ──► err() ──► None (exhausted) | Some(e) (failed)
//! ```
//!
//! Contract:
//! - `scan` before the first successful `next` is [`Error::ScanWithoutNext`].
//! - after `close`, `next` is `false` and `scan` is [`Error::CursorClosed`].
//! - iteration errors are sticky.

mod memory;

pub use memory::MemoryRows;

use crate::error::{Error, Result};
use crate::value::{Column, Row};
use async_trait::async_trait;

/// A streaming result cursor.
#[async_trait]
pub trait Rows: Send + Sync {
    /// Advance to the next row. `false` means exhausted, failed or closed.
    async fn next(&self) -> bool;

    /// The current row.
    async fn scan(&self) -> Result<Row>;

    /// The result columns with their declared types.
    async fn columns(&self) -> Result<Vec<Column>>;

    /// Release the cursor. Idempotent.
    async fn close(&self) -> Result<()>;

    /// The error that stopped iteration, if any.
    async fn err(&self) -> Option<Error>;
}

/// Owned, type-erased cursor.
pub type BoxRows = Box<dyn Rows>;

/// Drain a cursor into memory and close it.
///
/// Returns the iteration error if the cursor stopped early, otherwise the
/// close error, if any.
pub async fn collect(rows: &dyn Rows) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    while rows.next().await {
        match rows.scan().await {
            Ok(row) => out.push(row),
            Err(e) => {
                let _ = rows.close().await;
                return Err(e);
            }
        }
    }
    if let Some(e) = rows.err().await {
        let _ = rows.close().await;
        return Err(e);
    }
    rows.close().await?;
    Ok(out)
}

/// Close every cursor, collecting all failures instead of stopping at the
/// first one.
pub async fn close_all(cursors: &[BoxRows]) -> Result<()> {
    let mut errors = Vec::new();
    for cursor in cursors {
        if let Err(e) = cursor.close().await {
            errors.push(e);
        }
    }
    match Error::combine(errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
