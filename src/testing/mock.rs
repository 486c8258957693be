//! In-memory driver doubles with failure injection.

use crate::context::{ExecContext, TxOptions};
use crate::datasource::{Connection, Connector, NativeTx, Resolver};
use crate::error::{Error, Result};
use crate::rows::{BoxRows, MemoryRows, Rows};
use crate::types::{ExecResult, Query};
use crate::value::{Column, ColumnType, Row};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A driver call observed by a [`MockConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Query(String),
    Exec(String),
    Begin,
    TxQuery(String),
    TxExec(String),
    Commit,
    Rollback,
    Close,
}

/// Failures to inject into the next calls of a [`MockConnection`].
///
/// A set failure stays in place until cleared, and applies to the native
/// transactions of the connection as well.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub fail_query: Option<Error>,
    pub fail_exec: Option<Error>,
    pub fail_begin: Option<Error>,
    pub fail_commit: Option<Error>,
    pub fail_rollback: Option<Error>,
    pub fail_close: Option<Error>,

    /// Delay applied to every call before it completes.
    pub latency: Option<Duration>,
}

struct Shared {
    name: String,
    calls: Mutex<Vec<Call>>,
    plan: Mutex<FailurePlan>,
    result: Mutex<(Vec<Column>, Vec<Row>)>,
    exec_result: Mutex<ExecResult>,
    open_cursors: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl Shared {
    /// Record `call`, wait out the latency, then apply `pick`'s failure.
    async fn enter(&self, call: Call, pick: fn(&FailurePlan) -> &Option<Error>) -> Result<()> {
        self.calls.lock().push(call);
        let (latency, failure) = {
            let plan = self.plan.lock();
            (plan.latency, pick(&plan).clone())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn rows(&self) -> BoxRows {
        let (columns, rows) = self.result.lock().clone();
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Box::new(TrackedRows {
            inner: MemoryRows::new(columns, rows),
            open: self.open_cursors.clone(),
            released: AtomicBool::new(false),
        })
    }
}

/// A scripted connection that records every call.
///
/// Queries return the configured result set (a single empty `id` column by
/// default); writes return the configured [`ExecResult`].
pub struct MockConnection {
    shared: Arc<Shared>,
}

impl MockConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                calls: Mutex::new(Vec::new()),
                plan: Mutex::new(FailurePlan::default()),
                result: Mutex::new((vec![Column::new("id", ColumnType::Int)], Vec::new())),
                exec_result: Mutex::new(ExecResult::default()),
                open_cursors: Arc::new(AtomicUsize::new(0)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Return `rows` from every query.
    pub fn with_rows(self, columns: Vec<Column>, rows: Vec<Row>) -> Self {
        self.set_rows(columns, rows);
        self
    }

    pub fn set_rows(&self, columns: Vec<Column>, rows: Vec<Row>) {
        *self.shared.result.lock() = (columns, rows);
    }

    pub fn set_exec_result(&self, result: ExecResult) {
        *self.shared.exec_result.lock() = result;
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Failure plan, editable in place.
    pub fn plan(&self) -> MutexGuard<'_, FailurePlan> {
        self.shared.plan.lock()
    }

    /// Every call so far, in order. `close` is not recorded.
    pub fn calls(&self) -> Vec<Call> {
        self.shared
            .calls
            .lock()
            .iter()
            .filter(|c| **c != Call::Close)
            .cloned()
            .collect()
    }

    /// Number of returned cursors not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.shared.open_cursors.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, _ctx: &ExecContext, query: &Query) -> Result<BoxRows> {
        self.shared
            .enter(Call::Query(query.sql.clone()), |p| &p.fail_query)
            .await?;
        Ok(self.shared.rows())
    }

    async fn exec(&self, _ctx: &ExecContext, query: &Query) -> Result<ExecResult> {
        self.shared
            .enter(Call::Exec(query.sql.clone()), |p| &p.fail_exec)
            .await?;
        Ok(*self.shared.exec_result.lock())
    }

    async fn begin(&self, _ctx: &ExecContext, _options: &TxOptions) -> Result<Box<dyn NativeTx>> {
        self.shared.enter(Call::Begin, |p| &p.fail_begin).await?;
        Ok(Box::new(MockTx {
            shared: self.shared.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.calls.lock().push(Call::Close);
        self.shared.closed.store(true, Ordering::SeqCst);
        match self.shared.plan.lock().fail_close.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Native transaction of a [`MockConnection`], recording into its call log.
struct MockTx {
    shared: Arc<Shared>,
}

#[async_trait]
impl NativeTx for MockTx {
    async fn query(&self, _ctx: &ExecContext, query: &Query) -> Result<BoxRows> {
        self.shared
            .enter(Call::TxQuery(query.sql.clone()), |p| &p.fail_query)
            .await?;
        Ok(self.shared.rows())
    }

    async fn exec(&self, _ctx: &ExecContext, query: &Query) -> Result<ExecResult> {
        self.shared
            .enter(Call::TxExec(query.sql.clone()), |p| &p.fail_exec)
            .await?;
        Ok(*self.shared.exec_result.lock())
    }

    async fn commit(&self, _ctx: &ExecContext) -> Result<()> {
        self.shared.enter(Call::Commit, |p| &p.fail_commit).await
    }

    async fn rollback(&self, _ctx: &ExecContext) -> Result<()> {
        self.shared.enter(Call::Rollback, |p| &p.fail_rollback).await
    }
}

/// Cursor that reports its release back to the connection.
struct TrackedRows {
    inner: MemoryRows,
    open: Arc<AtomicUsize>,
    released: AtomicBool,
}

#[async_trait]
impl Rows for TrackedRows {
    async fn next(&self) -> bool {
        self.inner.next().await
    }

    async fn scan(&self) -> Result<Row> {
        self.inner.scan().await
    }

    async fn columns(&self) -> Result<Vec<Column>> {
        self.inner.columns().await
    }

    async fn close(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.close().await
    }

    async fn err(&self) -> Option<Error> {
        self.inner.err().await
    }
}

/// Resolver returning a settable address list.
pub struct StaticResolver {
    state: Mutex<std::result::Result<Vec<SocketAddr>, Error>>,
}

impl StaticResolver {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self {
            state: Mutex::new(Ok(addrs)),
        }
    }

    /// Answer later lookups with `addrs`, clearing any injected failure.
    pub fn set(&self, addrs: Vec<SocketAddr>) {
        *self.state.lock() = Ok(addrs);
    }

    /// Fail later lookups with `err`.
    pub fn fail(&self, err: Error) {
        *self.state.lock() = Err(err);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup(&self, _target: &str) -> Result<Vec<SocketAddr>> {
        self.state.lock().clone()
    }
}

/// Connector that hands out a fresh [`MockConnection`] per address.
#[derive(Default)]
pub struct MockConnector {
    opened: Mutex<Vec<(SocketAddr, Arc<MockConnection>)>>,
    refuse: Mutex<Vec<SocketAddr>>,
    latency: Mutex<Option<Duration>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail connection attempts to `addr`.
    pub fn refuse(&self, addr: SocketAddr) {
        self.refuse.lock().push(addr);
    }

    /// Delay every connect attempt by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Every successful connect, in order.
    pub fn connected(&self) -> Vec<SocketAddr> {
        self.opened.lock().iter().map(|(a, _)| *a).collect()
    }

    /// Every connection handed out, in order.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.opened.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    /// The most recent connection opened to `addr`.
    pub fn connection(&self, addr: SocketAddr) -> Option<Arc<MockConnection>> {
        self.opened
            .lock()
            .iter()
            .rev()
            .find(|(a, _)| *a == addr)
            .map(|(_, c)| c.clone())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn Connection>> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.refuse.lock().contains(&addr) {
            return Err(Error::driver(format!("connection refused: {}", addr)));
        }
        let conn = Arc::new(MockConnection::new(addr.to_string()));
        self.opened.lock().push((addr, conn.clone()));
        Ok(conn)
    }
}
