//! Scriptable in-memory driver used by the controller tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::context::{AppContext, Settings};
use crate::dispatcher::{self, UiEvent, UiQueue};
use crate::driver::{
    ColumnMeta, Connector, Driver, DriverConnection, DriverError, DriverRegistry, RowCursor,
    ScanKind, SqlValue,
};
use crate::profiles::{ConnectionProfile, EngineKind};

#[derive(Debug, Clone)]
pub(crate) enum FakeResponse {
    Rows {
        columns: Vec<ColumnMeta>,
        rows: Vec<Vec<SqlValue>>,
    },
    FailExecute(String),
    FailRow {
        columns: Vec<ColumnMeta>,
        message: String,
    },
    /// `query` never resolves.
    Block,
    /// Columns resolve, the first row never does.
    BlockRows(Vec<ColumnMeta>),
}

impl FakeResponse {
    pub(crate) fn rows(columns: Vec<ColumnMeta>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    pub(crate) fn names(column: &str, values: &[&str]) -> Self {
        Self::Rows {
            columns: vec![ColumnMeta::new(column, "TEXT", ScanKind::Text)],
            rows: values
                .iter()
                .map(|value| vec![SqlValue::Text((*value).to_string())])
                .collect(),
        }
    }

    pub(crate) fn fail_execute(message: &str) -> Self {
        Self::FailExecute(message.to_string())
    }

    pub(crate) fn fail_row(columns: Vec<ColumnMeta>, message: &str) -> Self {
        Self::FailRow {
            columns,
            message: message.to_string(),
        }
    }

    pub(crate) fn block_rows(columns: Vec<ColumnMeta>) -> Self {
        Self::BlockRows(columns)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecutedQuery {
    pub database: Option<String>,
    pub sql: String,
    pub params: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    responses: Mutex<Vec<(String, FakeResponse)>>,
    executed: Mutex<Vec<ExecutedQuery>>,
    connect_failure: Mutex<Option<String>>,
    descriptor_failure: Mutex<Option<String>>,
    connects: AtomicUsize,
    connection_closes: AtomicUsize,
    cursor_closes: AtomicUsize,
    server_cancels: AtomicUsize,
    close_delay: Mutex<Duration>,
    query_started: Notify,
}

#[derive(Clone)]
pub(crate) struct FakeDriver {
    engine: EngineKind,
    state: Arc<FakeState>,
}

impl FakeDriver {
    pub(crate) fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            state: Arc::new(FakeState::default()),
        }
    }

    /// Answers any query whose text contains `needle`. Earlier
    /// registrations win.
    pub(crate) fn respond(&self, needle: &str, response: FakeResponse) {
        self.state
            .responses
            .lock()
            .expect("responses lock")
            .push((needle.to_string(), response));
    }

    pub(crate) fn fail_connect(&self, message: &str) {
        *self.state.connect_failure.lock().expect("connect lock") = Some(message.to_string());
    }

    pub(crate) fn reject_descriptor(&self, message: &str) {
        *self.state.descriptor_failure.lock().expect("descriptor lock") =
            Some(message.to_string());
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn connection_closes(&self) -> usize {
        self.state.connection_closes.load(Ordering::SeqCst)
    }

    pub(crate) fn cursor_closes(&self) -> usize {
        self.state.cursor_closes.load(Ordering::SeqCst)
    }

    /// Statements aborted through `cancel_query`.
    pub(crate) fn server_cancels(&self) -> usize {
        self.state.server_cancels.load(Ordering::SeqCst)
    }

    /// Makes every connection close take `delay`.
    pub(crate) fn delay_close(&self, delay: Duration) {
        *self.state.close_delay.lock().expect("close delay lock") = delay;
    }

    pub(crate) fn executed(&self) -> Vec<ExecutedQuery> {
        self.state.executed.lock().expect("executed lock").clone()
    }

    pub(crate) fn executed_matching(&self, needle: &str) -> usize {
        self.executed()
            .iter()
            .filter(|query| query.sql.contains(needle))
            .count()
    }

    pub(crate) async fn wait_for_query(&self) {
        self.state.query_started.notified().await;
    }

    fn response_for(&self, sql: &str) -> FakeResponse {
        self.state
            .responses
            .lock()
            .expect("responses lock")
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map_or_else(
                || FakeResponse::rows(Vec::new(), Vec::new()),
                |(_, response)| response.clone(),
            )
    }
}

impl Driver for FakeDriver {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn connector(
        &self,
        _profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Box<dyn Connector>, DriverError> {
        if let Some(message) = self
            .state
            .descriptor_failure
            .lock()
            .expect("descriptor lock")
            .clone()
        {
            return Err(DriverError::new(message));
        }
        Ok(Box::new(FakeConnector {
            driver: self.clone(),
            database: database.map(str::to_string),
        }))
    }
}

struct FakeConnector {
    driver: FakeDriver,
    database: Option<String>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        let failure = self
            .driver
            .state
            .connect_failure
            .lock()
            .expect("connect lock")
            .clone();
        if let Some(message) = failure {
            return Err(DriverError::new(message));
        }
        self.driver.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            driver: self.driver.clone(),
            database: self.database.clone(),
            statement_running: false,
        }))
    }
}

/// A blocked statement keeps `statement_running` set until `cancel_query`;
/// closing the connection meanwhile waits for it, like a server draining an
/// unfinished result.
struct FakeConnection {
    driver: FakeDriver,
    database: Option<String>,
    statement_running: bool,
}

#[async_trait]
impl DriverConnection for FakeConnection {
    async fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Box<dyn RowCursor + 'a>, DriverError> {
        self.driver
            .state
            .executed
            .lock()
            .expect("executed lock")
            .push(ExecutedQuery {
                database: self.database.clone(),
                sql: sql.to_string(),
                params: params.to_vec(),
            });
        self.driver.state.query_started.notify_one();

        let cursor = match self.driver.response_for(sql) {
            FakeResponse::Rows { columns, rows } => FakeCursor::new(&self.driver, columns, rows),
            FakeResponse::FailExecute(message) => return Err(DriverError::new(message)),
            FakeResponse::FailRow { columns, message } => {
                let mut cursor = FakeCursor::new(&self.driver, columns, Vec::new());
                cursor.row_failure = Some(message);
                cursor
            }
            FakeResponse::Block => {
                self.statement_running = true;
                std::future::pending::<()>().await;
                return Err(DriverError::new("unreachable"));
            }
            FakeResponse::BlockRows(columns) => {
                self.statement_running = true;
                let mut cursor = FakeCursor::new(&self.driver, columns, Vec::new());
                cursor.block_rows = true;
                cursor
            }
        };
        Ok(Box::new(cursor))
    }

    async fn cancel_query(&mut self) -> Result<(), DriverError> {
        if std::mem::take(&mut self.statement_running) {
            self.driver
                .state
                .server_cancels
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        let delay = *self.driver.state.close_delay.lock().expect("close delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.statement_running {
            std::future::pending::<()>().await;
        }
        self.driver
            .state
            .connection_closes
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeCursor {
    driver: FakeDriver,
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Vec<SqlValue>>,
    row_failure: Option<String>,
    block_rows: bool,
}

impl FakeCursor {
    fn new(driver: &FakeDriver, columns: Vec<ColumnMeta>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            driver: driver.clone(),
            columns,
            rows: rows.into(),
            row_failure: None,
            block_rows: false,
        }
    }
}

#[async_trait]
impl RowCursor for FakeCursor {
    async fn columns(&mut self) -> Result<Vec<ColumnMeta>, DriverError> {
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, DriverError> {
        if self.block_rows {
            std::future::pending::<()>().await;
        }
        if let Some(message) = self.row_failure.take() {
            return Err(DriverError::new(message));
        }
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.driver
            .state
            .cursor_closes
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn profile(engine: EngineKind) -> ConnectionProfile {
    let mut profile = ConnectionProfile::new(engine, "local", "127.0.0.1", "tester");
    profile.password = "secret".to_string();
    profile
}

/// Context on the current runtime with `driver` registered.
pub(crate) fn context(driver: &FakeDriver, settings: Settings) -> (Arc<AppContext>, UiQueue) {
    let (dispatcher, queue) = dispatcher::channel();
    let registry = DriverRegistry::new().with(Arc::new(driver.clone()));
    let context = AppContext::new(
        dispatcher,
        registry,
        tokio::runtime::Handle::current(),
        settings,
    );
    (context, queue)
}

/// Waits for the next queued event, failing the test after five seconds.
pub(crate) async fn next_event(queue: &mut UiQueue) -> UiEvent {
    tokio::time::timeout(Duration::from_secs(5), queue.next())
        .await
        .expect("timed out waiting for ui event")
        .expect("ui queue closed")
}

/// Pulls events until one satisfies `accept`, returning the skipped ones too.
pub(crate) async fn next_matching(
    queue: &mut UiQueue,
    mut accept: impl FnMut(&UiEvent) -> bool,
) -> (UiEvent, Vec<UiEvent>) {
    let mut skipped = Vec::new();
    loop {
        let event = next_event(queue).await;
        if accept(&event) {
            return (event, skipped);
        }
        skipped.push(event);
    }
}
