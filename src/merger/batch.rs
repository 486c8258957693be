//! Batch merger: plain concatenation of shard cursors.

use super::{or_close, shared_columns, Core};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::rows::{BoxRows, Rows};
use crate::value::{Column, Row};
use async_trait::async_trait;
use tokio::sync::Mutex;

struct State {
    core: Core,
    position: usize,
}

/// Yields every row of the first cursor, then of the second, and so on.
///
/// Exhausted cursors are skipped silently; no ordering beyond input order
/// is guaranteed.
pub struct BatchMerger {
    state: Mutex<State>,
}

impl BatchMerger {
    /// Create a batch merger. All cursors must share the same columns.
    pub async fn new(ctx: ExecContext, cursors: Vec<BoxRows>) -> Result<Self> {
        let columns = or_close(&cursors, shared_columns(&ctx, &cursors).await).await?;
        Ok(Self {
            state: Mutex::new(State {
                core: Core::new(ctx, columns, cursors),
                position: 0,
            }),
        })
    }
}

#[async_trait]
impl Rows for BatchMerger {
    async fn next(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.core.guard().await {
            return false;
        }
        while state.position < state.core.cursors.len() {
            let position = state.position;
            match state.core.read(position).await {
                Ok(Some(row)) => {
                    state.core.current = Some(row);
                    return true;
                }
                Ok(None) => state.position += 1,
                Err(e) => {
                    state.core.fail(e).await;
                    return false;
                }
            }
        }
        state.core.exhaust().await;
        false
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
