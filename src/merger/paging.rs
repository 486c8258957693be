//! Offset/limit over any cursor.

use super::{or_close, shared_columns, Core};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::rows::{BoxRows, Rows};
use crate::value::{Column, Row};
use async_trait::async_trait;
use tokio::sync::Mutex;

struct State {
    /// Holds the single paged cursor.
    core: Core,
    offset: u64,
    limit: u64,
    skipped: bool,
    emitted: u64,
}

impl State {
    async fn advance(&mut self) -> Result<Option<Row>> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        if !self.skipped {
            self.skipped = true;
            for _ in 0..self.offset {
                if self.core.read(0).await?.is_none() {
                    return Ok(None);
                }
            }
        }
        let row = self.core.read(0).await?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }
}

/// Skips `offset` rows of the inner cursor, then yields at most `limit`.
///
/// Once the limit is reached the inner cursor is closed without draining
/// the rest.
pub struct Paging {
    state: Mutex<State>,
}

impl Paging {
    /// Wrap `inner`. Fails with [`Error::InvalidLimitOrOffset`] (closing
    /// `inner`) if `offset < 0` or `limit <= 0`.
    pub async fn new(ctx: ExecContext, inner: BoxRows, offset: i64, limit: i64) -> Result<Self> {
        let cursors = vec![inner];
        let setup = async {
            if offset < 0 || limit <= 0 {
                return Err(Error::InvalidLimitOrOffset { offset, limit });
            }
            shared_columns(&ctx, &cursors).await
        }
        .await;
        let columns = or_close(&cursors, setup).await?;

        Ok(Self {
            state: Mutex::new(State {
                core: Core::new(ctx, columns, cursors),
                offset: offset as u64,
                limit: limit as u64,
                skipped: false,
                emitted: 0,
            }),
        })
    }
}

#[async_trait]
impl Rows for Paging {
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
    use crate::merger::{SortColumn, SortMerger};
    use crate::rows::{collect, MemoryRows};
    use crate::testing::{int_rows, ScriptedRows};
    use std::sync::Arc;

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r.get::<i64>(0).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_offset_and_limit() {
        let paging = Paging::new(
            ExecContext::new(),
            Box::new(int_rows("id", &[1, 2, 3, 4, 5])),
            1,
            2,
        )
        .await
        .unwrap();
        assert_eq!(ids(&collect(&paging).await.unwrap()), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_output_length_matches_window() {
        for total in 0..6i64 {
            for offset in 0..7i64 {
                for limit in 1..7i64 {
                    let values: Vec<i64> = (0..total).collect();
                    let paging = Paging::new(
                        ExecContext::new(),
                        Box::new(int_rows("id", &values)),
                        offset,
                        limit,
                    )
                    .await
                    .unwrap();
                    let got = collect(&paging).await.unwrap().len() as i64;
                    assert_eq!(
                        got,
                        limit.min((total - offset).max(0)),
                        "total={} offset={} limit={}",
                        total,
                        offset,
                        limit
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_window() {
        for (offset, limit) in [(-1, 10), (0, 0), (3, -2)] {
            let res = Paging::new(ExecContext::new(), Box::new(int_rows("id", &[1])), offset, limit).await;
            assert_eq!(
                res.err(),
                Some(Error::InvalidLimitOrOffset { offset, limit })
            );
        }
    }

    #[tokio::test]
    async fn test_limit_reached_closes_inner() {
        let inner = Arc::new(int_rows("id", &[1, 2, 3]));
        let paging = Paging::new(ExecContext::new(), Box::new(SharedRows(inner.clone())), 0, 1)
            .await
            .unwrap();
        assert!(paging.next().await);
        assert!(!inner.is_closed());
        assert!(!paging.next().await);
        assert!(inner.is_closed());
    }

    #[tokio::test]
    async fn test_pages_a_sort_merger() {
        let cursors: Vec<BoxRows> = vec![
            Box::new(int_rows("id", &[1, 4, 7])),
            Box::new(int_rows("id", &[2, 5, 8])),
            Box::new(int_rows("id", &[3, 6, 9])),
        ];
        let sorted = SortMerger::new(ExecContext::new(), cursors, vec![SortColumn::asc("id")])
            .await
            .unwrap();
        let paging = Paging::new(ExecContext::new(), Box::new(sorted), 3, 4)
            .await
            .unwrap();
        assert_eq!(ids(&collect(&paging).await.unwrap()), vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_inner_error_is_sticky() {
        let inner = ScriptedRows::new(int_rows("id", &[1, 2, 3])).fail_after(1, Error::driver("eof"));
        let paging = Paging::new(ExecContext::new(), Box::new(inner), 0, 10)
            .await
            .unwrap();
        assert!(paging.next().await);
        assert!(!paging.next().await);
        assert_eq!(paging.err().await, Some(Error::driver("eof")));
        assert_eq!(paging.scan().await, Err(Error::driver("eof")));
    }

    #[tokio::test]
    async fn test_close_reports_inner_close_failure_once() {
        let inner = ScriptedRows::new(int_rows("id", &[1, 2])).fail_close(Error::driver("busy"));
        let paging = Paging::new(ExecContext::new(), Box::new(inner), 0, 5)
            .await
            .unwrap();
        assert!(paging.next().await);
        assert_eq!(paging.close().await, Err(Error::driver("busy")));
        assert_eq!(paging.close().await, Ok(()));
        assert_eq!(paging.scan().await, Err(Error::CursorClosed));
    }

    /// Lets a test observe a cursor after handing it to `Paging`.
    struct SharedRows(Arc<MemoryRows>);

    #[async_trait]
    impl Rows for SharedRows {
        async fn next(&self) -> bool {
            self.0.next().await
        }
        async fn scan(&self) -> Result<Row> {
            self.0.scan().await
        }
        async fn columns(&self) -> Result<Vec<Column>> {
            self.0.columns().await
        }
        async fn close(&self) -> Result<()> {
            self.0.close().await
        }
        async fn err(&self) -> Option<Error> {
            self.0.err().await
        }
    }
}
