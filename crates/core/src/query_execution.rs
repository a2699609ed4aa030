use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::driver::{DriverConnection, DriverError, RowCursor};
use crate::error::{ControllerError, QueryPhase};
use crate::tabular::{Cell, ColumnHeader, TabularResult};

pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on the server-side abort of an interrupted statement.
pub const SERVER_CANCEL_TIMEOUT: Duration = Duration::from_secs(3);

/// Cancellation token plus optional deadline shared by every step of one
/// operation (connect, execute, fetch).
#[derive(Debug, Clone)]
pub struct Interrupt {
    cancellation: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl Interrupt {
    #[must_use]
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    /// Starts the deadline clock now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Runs `operation` until it finishes, the token fires, or the deadline
    /// passes. Cancellation takes precedence over the other two.
    pub async fn guard<T, F>(&self, phase: QueryPhase, operation: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        let expiry = async {
            match self.deadline {
                Some((at, _)) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => {
                tracing::debug!(%phase, "operation canceled");
                Err(ControllerError::Cancelled { phase })
            }
            () = expiry => {
                let after = self.deadline.map_or(Duration::ZERO, |(_, after)| after);
                tracing::debug!(%phase, after_secs = after.as_secs(), "operation timed out");
                Err(ControllerError::TimedOut { phase, after })
            }
            result = operation => result.map_err(|error| ControllerError::query(phase, error)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Rows(TabularResult),
    EmptyResultSet { columns: Vec<ColumnHeader> },
}

impl QueryOutcome {
    #[must_use]
    pub fn columns(&self) -> &[ColumnHeader] {
        match self {
            Self::Rows(result) => result.columns(),
            Self::EmptyResultSet { columns } => columns,
        }
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        match self {
            Self::Rows(result) => result.rows(),
            Self::EmptyResultSet { .. } => &[],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::EmptyResultSet { .. })
    }
}

/// One query run: consumed by [`QueryExecution::run`].
#[derive(Debug)]
pub struct QueryExecution {
    sql: String,
    params: Vec<String>,
    interrupt: Interrupt,
}

impl QueryExecution {
    #[must_use]
    pub fn new(sql: impl Into<String>, interrupt: Interrupt) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            interrupt,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Executes the query on `connection`, reporting elapsed whole seconds to
    /// `on_progress` once per second until the query finishes.
    pub async fn run<F>(
        self,
        connection: &mut dyn DriverConnection,
        mut on_progress: F,
    ) -> Result<QueryOutcome, ControllerError>
    where
        F: FnMut(u64) + Send,
    {
        let started_at = Instant::now();
        let work = self.fetch(connection);
        tokio::pin!(work);

        let mut ticker = interval_at(started_at + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                result = &mut work => return result,
                _ = ticker.tick() => on_progress(started_at.elapsed().as_secs()),
            }
        }
    }

    async fn fetch(
        &self,
        connection: &mut dyn DriverConnection,
    ) -> Result<QueryOutcome, ControllerError> {
        tracing::debug!(sql = %self.sql, params = self.params.len(), "executing query");
        let outcome = {
            let started = self
                .interrupt
                .guard(
                    QueryPhase::Executing,
                    connection.query(&self.sql, &self.params),
                )
                .await;

            match started {
                Ok(mut cursor) => {
                    let outcome = self.read(cursor.as_mut()).await;
                    if let Err(error) = cursor.close().await {
                        tracing::warn!(%error, "failed to close cursor");
                    }
                    outcome
                }
                Err(error) => Err(error),
            }
        };

        if matches!(&outcome, Err(error) if error.is_interrupted()) {
            cancel_on_server(connection).await;
        }
        outcome
    }

    async fn read(
        &self,
        cursor: &mut (dyn RowCursor + '_),
    ) -> Result<QueryOutcome, ControllerError> {
        let columns = self
            .interrupt
            .guard(QueryPhase::ReadingColumns, cursor.columns())
            .await?;
        let mut result = TabularResult::new(&columns);

        while let Some(values) = self
            .interrupt
            .guard(QueryPhase::ScanningRow, cursor.next_row())
            .await?
        {
            result.push_row(values);
        }

        self.interrupt
            .guard(QueryPhase::ReadingTrailer, cursor.finish())
            .await?;

        tracing::debug!(rows = result.row_count(), "query finished");
        if result.is_empty() {
            Ok(QueryOutcome::EmptyResultSet {
                columns: result.into_columns(),
            })
        } else {
            Ok(QueryOutcome::Rows(result))
        }
    }
}

async fn cancel_on_server(connection: &mut dyn DriverConnection) {
    match tokio::time::timeout(SERVER_CANCEL_TIMEOUT, connection.cancel_query()).await {
        Ok(Ok(())) => tracing::debug!("statement canceled on server"),
        Ok(Err(error)) => tracing::warn!(%error, "server-side cancel failed"),
        Err(_) => tracing::warn!(
            after_secs = SERVER_CANCEL_TIMEOUT.as_secs(),
            "server-side cancel timed out"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{Interrupt, QueryExecution, QueryOutcome};
    use crate::driver::{ColumnMeta, Connector, Driver, ScanKind, SqlValue};
    use crate::error::{ControllerError, QueryPhase};
    use crate::profiles::{ConnectionProfile, EngineKind};
    use crate::testing::{FakeDriver, FakeResponse};

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(EngineKind::Postgres, "local", "127.0.0.1", "me")
    }

    async fn connect(driver: &FakeDriver) -> Box<dyn crate::driver::DriverConnection> {
        let connector: Box<dyn Connector> = driver
            .connector(&profile(), Some("app"))
            .expect("connector should build");
        connector.connect().await.expect("connect should succeed")
    }

    #[tokio::test]
    async fn collects_rows_and_closes_cursor() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond(
            "from users",
            FakeResponse::rows(
                vec![
                    ColumnMeta::new("id", "INT4", ScanKind::Integer),
                    ColumnMeta::new("name", "TEXT", ScanKind::Text),
                ],
                vec![
                    vec![SqlValue::Int(1), SqlValue::Text("ada".to_string())],
                    vec![SqlValue::Int(2), SqlValue::Null],
                ],
            ),
        );
        let mut connection = connect(&driver).await;

        let outcome = QueryExecution::new(
            "select * from users",
            Interrupt::new(CancellationToken::new()),
        )
        .run(connection.as_mut(), |_| {})
        .await
        .expect("query should succeed");

        let QueryOutcome::Rows(result) = outcome else {
            panic!("expected rows");
        };
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows()[1][1].display(), "NULL");
        assert_eq!(driver.cursor_closes(), 1);
        assert_eq!(driver.server_cancels(), 0);
    }

    #[tokio::test]
    async fn zero_rows_is_an_empty_resultset_not_an_error() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond(
            "from empty",
            FakeResponse::rows(vec![ColumnMeta::new("id", "INT4", ScanKind::Integer)], vec![]),
        );
        let mut connection = connect(&driver).await;

        let outcome = QueryExecution::new(
            "select * from empty",
            Interrupt::new(CancellationToken::new()),
        )
        .run(connection.as_mut(), |_| {})
        .await
        .expect("query should succeed");

        assert!(outcome.is_empty());
        assert_eq!(outcome.columns()[0].name, "id");
        assert!(outcome.rows().is_empty());
    }

    #[tokio::test]
    async fn driver_failures_carry_the_phase() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond("bad sql", FakeResponse::fail_execute("syntax error at or near"));
        driver.respond(
            "bad row",
            FakeResponse::fail_row(
                vec![ColumnMeta::new("id", "INT4", ScanKind::Integer)],
                "invalid input",
            ),
        );
        let mut connection = connect(&driver).await;

        let error = QueryExecution::new("bad sql", Interrupt::new(CancellationToken::new()))
            .run(connection.as_mut(), |_| {})
            .await
            .expect_err("query should fail");
        assert_eq!(error.phase(), Some(QueryPhase::Executing));

        let error = QueryExecution::new("bad row", Interrupt::new(CancellationToken::new()))
            .run(connection.as_mut(), |_| {})
            .await
            .expect_err("query should fail");
        assert_eq!(
            error,
            ControllerError::Query {
                phase: QueryPhase::ScanningRow,
                message: "invalid input".to_string()
            }
        );
        assert_eq!(driver.cursor_closes(), 1);
    }

    #[tokio::test]
    async fn cancel_during_fetch_closes_cursor_and_reports_phase() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond(
            "slow",
            FakeResponse::block_rows(vec![ColumnMeta::new("id", "INT4", ScanKind::Integer)]),
        );
        let mut connection = connect(&driver).await;
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            let driver = driver.clone();
            tokio::spawn(async move {
                driver.wait_for_query().await;
                token.cancel();
            })
        };

        let error = QueryExecution::new("select slow", Interrupt::new(token))
            .run(connection.as_mut(), |_| {})
            .await
            .expect_err("query should be canceled");
        canceller.await.expect("canceller task failed");

        assert_eq!(
            error,
            ControllerError::Cancelled {
                phase: QueryPhase::ScanningRow
            }
        );
        assert!(error.is_interrupted());
        assert_eq!(driver.cursor_closes(), 1);
        assert_eq!(driver.server_cancels(), 1);

        connection.close().await.expect("close should not wait for the statement");
        assert_eq!(driver.connection_closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_reported_as_timeout() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond("hang", FakeResponse::Block);
        let mut connection = connect(&driver).await;

        let interrupt =
            Interrupt::new(CancellationToken::new()).with_timeout(Duration::from_secs(15));
        let error = QueryExecution::new("hang", interrupt)
            .run(connection.as_mut(), |_| {})
            .await
            .expect_err("query should time out");

        assert_eq!(
            error,
            ControllerError::TimedOut {
                phase: QueryPhase::Executing,
                after: Duration::from_secs(15)
            }
        );
        assert_eq!(driver.cursor_closes(), 0);
        assert_eq!(driver.server_cancels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_progress_every_second_until_done() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond("hang", FakeResponse::Block);
        let mut connection = connect(&driver).await;

        let ticks = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&ticks);
        let interrupt =
            Interrupt::new(CancellationToken::new()).with_timeout(Duration::from_millis(3_500));
        let _ = QueryExecution::new("hang", interrupt)
            .run(connection.as_mut(), move |elapsed| {
                recorded.lock().expect("progress lock").push(elapsed);
            })
            .await;

        assert_eq!(*ticks.lock().expect("progress lock"), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn parameters_reach_the_driver() {
        let driver = FakeDriver::new(EngineKind::Mysql);
        let mut connection = connect(&driver).await;

        let _ = QueryExecution::new(
            "select column_name from information_schema.columns where table_schema = ?",
            Interrupt::new(CancellationToken::new()),
        )
        .with_params(vec!["shop".to_string()])
        .run(connection.as_mut(), |_| {})
        .await
        .expect("query should succeed");

        let executed = driver.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].params, vec!["shop".to_string()]);
    }
}
