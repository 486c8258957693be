//! In-memory cursor over owned rows.

use super::Rows;
use crate::error::{Error, Result};
use crate::value::{Column, Row};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug)]
struct State {
    pending: VecDeque<Row>,
    current: Option<Row>,
    closed: bool,
}

/// A cursor over rows already held in memory.
///
/// Used by drivers that buffer whole results and as the output of eager
/// merges.
#[derive(Debug)]
pub struct MemoryRows {
    columns: Vec<Column>,
    state: Mutex<State>,
}

impl MemoryRows {
    /// Create a cursor over `rows`.
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            state: Mutex::new(State {
                pending: rows.into(),
                current: None,
                closed: false,
            }),
        }
    }

    /// Create a cursor with no rows.
    pub fn empty(columns: Vec<Column>) -> Self {
        Self::new(columns, Vec::new())
    }

    /// Rows not yet returned by `next`.
    pub fn remaining(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Rows for MemoryRows {
    async fn next(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.current = state.pending.pop_front();
        state.current.is_some()
    }

    async fn scan(&self) -> Result<Row> {
        let state = self.state.lock();
        if state.closed {
            return Err(Error::CursorClosed);
        }
        state.current.clone().ok_or(Error::ScanWithoutNext)
    }

    async fn columns(&self) -> Result<Vec<Column>> {
        if self.state.lock().closed {
            return Err(Error::CursorClosed);
        }
        Ok(self.columns.clone())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.current = None;
        state.pending.clear();
        Ok(())
    }

    async fn err(&self) -> Option<Error> {
        None
    }
}
