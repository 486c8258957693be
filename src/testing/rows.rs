//! Cursor fixtures.

use crate::error::{Error, Result};
use crate::rows::{MemoryRows, Rows};
use crate::value::{Column, ColumnType, Row, Value};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A single non-null integer column named `name` holding `values`.
pub fn int_rows(name: &str, values: &[i64]) -> MemoryRows {
    MemoryRows::new(
        vec![Column::new(name, ColumnType::Int)],
        values.iter().map(|&v| Row::new(vec![Value::Int(v)])).collect(),
    )
}

/// Rows from `(i64, &str)` pairs under the columns `id` and `name`.
pub fn user_rows(rows: &[(i64, &str)]) -> MemoryRows {
    MemoryRows::new(
        vec![
            Column::new("id", ColumnType::Int),
            Column::new("name", ColumnType::Text),
        ],
        rows.iter()
            .map(|(id, name)| Row::new(vec![Value::Int(*id), Value::from(*name)]))
            .collect(),
    )
}

#[derive(Default)]
struct Script {
    /// Rows still allowed before `fail_after` kicks in.
    budget: Option<usize>,
    failure: Option<Error>,
    failed: Option<Error>,
    close_failure: Option<Error>,
    latency: Option<Duration>,
}

/// A [`MemoryRows`] wrapper that fails on cue.
///
/// - `fail_after(n, e)`: yield `n` rows, then `next` is `false` and `err`
///   returns `e`.
/// - `fail_close(e)`: the first `close` returns `e`; later ones succeed.
/// - `with_latency(d)`: every `next` sleeps `d` first.
pub struct ScriptedRows {
    inner: Arc<MemoryRows>,
    script: Mutex<Script>,
}

impl ScriptedRows {
    pub fn new(inner: MemoryRows) -> Self {
        Self {
            inner: Arc::new(inner),
            script: Mutex::new(Script::default()),
        }
    }

    pub fn fail_after(self, rows: usize, err: Error) -> Self {
        {
            let mut script = self.script.lock();
            script.budget = Some(rows);
            script.failure = Some(err);
        }
        self
    }

    pub fn fail_close(self, err: Error) -> Self {
        self.script.lock().close_failure = Some(err);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.script.lock().latency = Some(latency);
        self
    }

    /// The wrapped cursor, observable after this one is handed off.
    pub fn shared(&self) -> Arc<MemoryRows> {
        self.inner.clone()
    }
}

#[async_trait]
impl Rows for ScriptedRows {
    async fn next(&self) -> bool {
        let latency = self.script.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        {
            let mut script = self.script.lock();
            if script.failed.is_some() {
                return false;
            }
            if let Some(budget) = script.budget.as_mut() {
                if *budget == 0 {
                    script.failed = script.failure.take();
                    return false;
                }
                *budget -= 1;
            }
        }
        self.inner.next().await
    }

    async fn scan(&self) -> Result<Row> {
        if let Some(e) = self.script.lock().failed.clone() {
            return Err(e);
        }
        self.inner.scan().await
    }

    async fn columns(&self) -> Result<Vec<Column>> {
        self.inner.columns().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await?;
        match self.script.lock().close_failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn err(&self) -> Option<Error> {
        self.script.lock().failed.clone()
    }
}
