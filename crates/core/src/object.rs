use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::dispatcher::{EventReporter, Origin, Payload, SessionId};
use crate::driver::Driver;
use crate::error::ControllerError;
use crate::introspection;
use crate::profiles::ConnectionProfile;
use crate::query_execution::{Interrupt, QueryExecution, QueryOutcome};
use crate::session::Session;

/// Name shown for the synthetic ad-hoc SQL entry.
pub const AD_HOC_ENTRY_NAME: &str = "<sql>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    AdHocSql,
    Table,
    View,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, is_view: bool) -> Self {
        Self {
            kind: if is_view {
                ObjectKind::View
            } else {
                ObjectKind::Table
            },
            name: name.into(),
        }
    }

    #[must_use]
    pub fn ad_hoc() -> Self {
        Self {
            kind: ObjectKind::AdHocSql,
            name: AD_HOC_ENTRY_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn is_view(&self) -> bool {
        self.kind == ObjectKind::View
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub default_value: Option<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStructure {
    pub columns: Vec<ColumnInfo>,
    /// Present for views only.
    pub definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLoad {
    pub rows: QueryOutcome,
    pub structure: ObjectStructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Uninitialized,
    Loading,
    Loaded,
    Failed,
}

impl ObjectState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Loading,
            2 => Self::Loaded,
            3 => Self::Failed,
            _ => Self::Uninitialized,
        }
    }

    fn raw(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Loading => 1,
            Self::Loaded => 2,
            Self::Failed => 3,
        }
    }
}

/// Lazily loads one table or view: its rows and its structure.
#[derive(Debug)]
pub struct ObjectController {
    context: Arc<AppContext>,
    profile: Arc<ConnectionProfile>,
    session: SessionId,
    database: String,
    descriptor: ObjectDescriptor,
    state: AtomicU8,
    cancellation: Mutex<Option<CancellationToken>>,
    status: Option<String>,
    progress: Option<u64>,
    error: Option<ControllerError>,
    load: Option<ObjectLoad>,
}

impl ObjectController {
    #[must_use]
    pub fn new(
        context: Arc<AppContext>,
        profile: Arc<ConnectionProfile>,
        session: SessionId,
        database: impl Into<String>,
        descriptor: ObjectDescriptor,
    ) -> Self {
        Self {
            context,
            profile,
            session,
            database: database.into(),
            descriptor,
            state: AtomicU8::new(ObjectState::Uninitialized.raw()),
            cancellation: Mutex::new(None),
            status: None,
            progress: None,
            error: None,
            load: None,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &ObjectDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> ObjectState {
        ObjectState::from_raw(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    #[must_use]
    pub fn progress(&self) -> Option<u64> {
        self.progress
    }

    #[must_use]
    pub fn error(&self) -> Option<&ControllerError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn rows(&self) -> Option<&QueryOutcome> {
        self.load.as_ref().map(|load| &load.rows)
    }

    #[must_use]
    pub fn structure(&self) -> Option<&ObjectStructure> {
        self.load.as_ref().map(|load| &load.structure)
    }

    /// Starts loading on first call; later calls are no-ops. Safe to race.
    pub fn init(&self) -> bool {
        self.start_from(ObjectState::Uninitialized)
    }

    /// Restarts a failed load.
    pub fn retry(&self) -> bool {
        self.start_from(ObjectState::Failed)
    }

    pub fn cancel(&self) -> bool {
        let token = self
            .cancellation
            .lock()
            .ok()
            .and_then(|mut cancellation| cancellation.take());
        if let Some(token) = token {
            token.cancel();
            tracing::info!(object = %self.descriptor.name, "load canceled");
            true
        } else {
            tracing::info!(object = %self.descriptor.name, "nothing to cancel, already canceled");
            false
        }
    }

    fn start_from(&self, expected: ObjectState) -> bool {
        if self
            .state
            .compare_exchange(
                expected.raw(),
                ObjectState::Loading.raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        let cancellation = CancellationToken::new();
        if let Ok(mut slot) = self.cancellation.lock() {
            *slot = Some(cancellation.clone());
        }

        let reporter = self.context.dispatcher().reporter(
            self.session,
            Origin::Object {
                database: self.database.clone(),
                object: self.descriptor.name.clone(),
            },
        );
        let target = LoadTarget {
            profile: Arc::clone(&self.profile),
            database: self.database.clone(),
            descriptor: self.descriptor.clone(),
        };
        let driver = self.context.drivers().driver(self.profile.engine);
        tracing::debug!(object = %self.descriptor.name, database = %self.database, "loading object");

        self.context.spawn(async move {
            let result = match driver {
                Ok(driver) => load_object(driver.as_ref(), &target, cancellation, &reporter).await,
                Err(error) => Err(error),
            };
            match result {
                Ok(load) => reporter.send(Payload::ObjectLoaded(load)),
                Err(error) => {
                    tracing::warn!(object = %target.descriptor.name, %error, "object load failed");
                    reporter.error(error);
                }
            }
        });
        true
    }

    /// Applies an event addressed to this object. UI thread only.
    pub fn apply(&mut self, payload: Payload) {
        match payload {
            Payload::Status(message) => self.status = Some(message),
            Payload::Progress(elapsed) => {
                self.progress = Some(elapsed);
                self.status = Some(format!("loading... {elapsed}s"));
            }
            Payload::ObjectLoaded(load) => {
                self.status = load.rows.is_empty().then(|| "empty resultset".to_string());
                self.progress = None;
                self.error = None;
                self.load = Some(load);
                self.finish(ObjectState::Loaded);
            }
            Payload::Error(error) => {
                self.status = Some(error.to_string());
                self.progress = None;
                self.error = Some(error);
                self.finish(ObjectState::Failed);
            }
            other => tracing::debug!(?other, "unexpected payload for object"),
        }
    }

    fn finish(&mut self, state: ObjectState) {
        if let Ok(mut slot) = self.cancellation.lock() {
            slot.take();
        }
        self.state.store(state.raw(), Ordering::SeqCst);
    }
}

struct LoadTarget {
    profile: Arc<ConnectionProfile>,
    database: String,
    descriptor: ObjectDescriptor,
}

/// Loads rows and structure concurrently on separate connections. The
/// first failure cancels the other half and is the one reported.
async fn load_object(
    driver: &dyn Driver,
    target: &LoadTarget,
    cancellation: CancellationToken,
    reporter: &EventReporter,
) -> Result<ObjectLoad, ControllerError> {
    let interrupt = Interrupt::new(cancellation.clone());
    let failure = FirstFailure::new(cancellation);

    let progress = reporter.clone();
    let (rows, structure) = tokio::join!(
        load_rows(driver, target, &interrupt, &failure, move |elapsed| {
            progress.progress(elapsed);
        }),
        load_structure(driver, target, &interrupt, &failure),
    );

    if let Some(error) = failure.into_inner() {
        return Err(error);
    }
    Ok(ObjectLoad {
        rows: rows?,
        structure: structure?,
    })
}

/// Keeps the first error of a load and cancels the sibling half as soon as
/// it is recorded, before the failing half closes its connection.
struct FirstFailure {
    error: OnceLock<ControllerError>,
    cancellation: CancellationToken,
}

impl FirstFailure {
    fn new(cancellation: CancellationToken) -> Self {
        Self {
            error: OnceLock::new(),
            cancellation,
        }
    }

    fn check<T>(&self, result: Result<T, ControllerError>) -> Result<T, ControllerError> {
        if let Err(error) = &result {
            let _ = self.error.set(error.clone());
            self.cancellation.cancel();
        }
        result
    }

    fn into_inner(self) -> Option<ControllerError> {
        self.error.into_inner()
    }
}

async fn load_rows<F>(
    driver: &dyn Driver,
    target: &LoadTarget,
    interrupt: &Interrupt,
    failure: &FirstFailure,
    on_progress: F,
) -> Result<QueryOutcome, ControllerError>
where
    F: FnMut(u64) + Send,
{
    let mut session = failure.check(
        Session::open(
            driver,
            Arc::clone(&target.profile),
            Some(target.database.clone()),
            interrupt,
        )
        .await,
    )?;
    let result = failure.check(
        QueryExecution::new(
            introspection::select_all(&target.descriptor.name),
            interrupt.clone(),
        )
        .run(session.connection_mut(), on_progress)
        .await,
    );
    session.close().await;
    result
}

async fn load_structure(
    driver: &dyn Driver,
    target: &LoadTarget,
    interrupt: &Interrupt,
    failure: &FirstFailure,
) -> Result<ObjectStructure, ControllerError> {
    let mut session = failure.check(
        Session::open(
            driver,
            Arc::clone(&target.profile),
            Some(target.database.clone()),
            interrupt,
        )
        .await,
    )?;
    let result = failure.check(read_structure(&mut session, target, interrupt).await);
    session.close().await;
    result
}

async fn read_structure(
    session: &mut Session,
    target: &LoadTarget,
    interrupt: &Interrupt,
) -> Result<ObjectStructure, ControllerError> {
    let engine = target.profile.engine;
    let name = &target.descriptor.name;

    let outcome = session
        .run_catalog(
            introspection::columns(engine, &target.database, name),
            interrupt,
            |_| {},
        )
        .await?;
    let columns = outcome
        .rows()
        .iter()
        .filter_map(|row| {
            Some(ColumnInfo {
                name: row.first()?.as_text()?.to_string(),
                data_type: row.get(1)?.display().to_string(),
                default_value: row.get(2)?.as_text().map(str::to_string),
                nullable: row.get(3)?.is_truthy(),
            })
        })
        .collect();

    let definition = if target.descriptor.is_view() {
        let outcome = session
            .run_catalog(
                introspection::view_definition(engine, &target.database, name),
                interrupt,
                |_| {},
            )
            .await?;
        outcome
            .rows()
            .first()
            .and_then(|row| row.first())
            .and_then(|cell| cell.as_text())
            .map(str::to_string)
    } else {
        None
    };

    Ok(ObjectStructure {
        columns,
        definition,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{ObjectController, ObjectDescriptor, ObjectState};
    use crate::context::Settings;
    use crate::dispatcher::{Payload, SessionId, UiQueue};
    use crate::driver::{ColumnMeta, Driver, ScanKind, SqlValue};
    use crate::error::ControllerError;
    use crate::profiles::EngineKind;
    use crate::testing::{self, FakeDriver, FakeResponse};

    fn structure_response() -> FakeResponse {
        FakeResponse::rows(
            vec![
                ColumnMeta::new("column_name", "TEXT", ScanKind::Text),
                ColumnMeta::new("udt_name", "TEXT", ScanKind::Text),
                ColumnMeta::new("column_default", "TEXT", ScanKind::Text),
                ColumnMeta::new("is_nullable", "BOOL", ScanKind::Boolean),
            ],
            vec![
                vec![
                    SqlValue::Text("id".to_string()),
                    SqlValue::Text("int4".to_string()),
                    SqlValue::Text("nextval('users_id_seq')".to_string()),
                    SqlValue::Bool(false),
                ],
                vec![
                    SqlValue::Text("email".to_string()),
                    SqlValue::Text("text".to_string()),
                    SqlValue::Null,
                    SqlValue::Bool(true),
                ],
            ],
        )
    }

    fn object_controller(
        driver: &FakeDriver,
        descriptor: ObjectDescriptor,
    ) -> (ObjectController, UiQueue) {
        let (context, queue) = testing::context(driver, Settings::default());
        let profile = Arc::new(testing::profile(driver.engine()));
        let controller =
            ObjectController::new(context, profile, SessionId::new(1), "app", descriptor);
        (controller, queue)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_inits_start_exactly_one_load() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond(
            "from public.users",
            FakeResponse::names("email", &["a@example.com"]),
        );
        driver.respond("information_schema.columns", structure_response());
        let (controller, mut queue) =
            object_controller(&driver, ObjectDescriptor::new("public.users", false));

        let started: usize = std::thread::scope(|scope| {
            let first = scope.spawn(|| controller.init());
            let second = scope.spawn(|| controller.init());
            [first, second]
                .into_iter()
                .map(|handle| usize::from(handle.join().expect("init thread panicked")))
                .sum()
        });
        assert_eq!(started, 1);
        assert_eq!(controller.state(), ObjectState::Loading);

        let (event, _) = testing::next_matching(&mut queue, |event| event.payload.is_terminal()).await;
        assert!(matches!(event.payload, Payload::ObjectLoaded(_)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.try_next().is_none());
        assert_eq!(driver.executed_matching("select * from public.users"), 1);
        assert_eq!(driver.connects(), 2);
        assert_eq!(driver.connection_closes(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loads_rows_and_structure() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond(
            "from public.users",
            FakeResponse::names("email", &["a@example.com", ""]),
        );
        driver.respond("information_schema.columns", structure_response());
        let (mut controller, mut queue) =
            object_controller(&driver, ObjectDescriptor::new("public.users", false));

        assert!(controller.init());
        assert!(!controller.init());
        let (event, _) = testing::next_matching(&mut queue, |event| event.payload.is_terminal()).await;
        controller.apply(event.payload);

        assert_eq!(controller.state(), ObjectState::Loaded);
        let rows = controller.rows().expect("rows loaded");
        assert_eq!(rows.rows().len(), 2);
        assert_eq!(rows.rows()[1][0].display(), "");

        let structure = controller.structure().expect("structure loaded");
        assert_eq!(structure.columns.len(), 2);
        assert_eq!(structure.columns[0].name, "id");
        assert!(!structure.columns[0].nullable);
        assert_eq!(structure.columns[1].default_value, None);
        assert!(structure.columns[1].nullable);
        assert_eq!(structure.definition, None);
        assert!(!controller.retry());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn views_include_their_definition() {
        let driver = FakeDriver::new(EngineKind::Mysql);
        driver.respond("information_schema.views", FakeResponse::names("view_definition", &["select 1"]));
        let (mut controller, mut queue) =
            object_controller(&driver, ObjectDescriptor::new("active_users", true));

        controller.init();
        let (event, _) = testing::next_matching(&mut queue, |event| event.payload.is_terminal()).await;
        controller.apply(event.payload);

        let structure = controller.structure().expect("structure loaded");
        assert_eq!(structure.definition.as_deref(), Some("select 1"));
        let rows = controller.rows().expect("rows loaded");
        assert!(rows.is_empty());
        assert_eq!(controller.status(), Some("empty resultset"));

        let views = driver.executed_matching("information_schema.views");
        assert_eq!(views, 1);
        let executed = driver.executed();
        let definition = executed
            .iter()
            .find(|query| query.sql.contains("information_schema.views"))
            .expect("definition query");
        assert_eq!(definition.params, vec!["app".to_string(), "active_users".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn first_failure_cancels_sibling_and_retry_reloads() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond("from public.orders", FakeResponse::Block);
        driver.respond(
            "information_schema.columns",
            FakeResponse::fail_execute("permission denied for table orders"),
        );
        let (mut controller, mut queue) =
            object_controller(&driver, ObjectDescriptor::new("public.orders", false));

        controller.init();
        let (event, _) = testing::next_matching(&mut queue, |event| event.payload.is_terminal()).await;
        let Payload::Error(ref error) = event.payload else {
            panic!("expected error, got {:?}", event.payload);
        };
        assert!(matches!(error, ControllerError::Query { message, .. } if message.contains("permission denied")));
        controller.apply(event.payload);

        assert_eq!(controller.state(), ObjectState::Failed);
        assert_eq!(driver.connection_closes(), 2);
        assert!(controller.status().is_some_and(|status| status.contains("permission denied")));

        assert!(controller.retry());
        assert_eq!(controller.state(), ObjectState::Loading);
        let (event, _) = testing::next_matching(&mut queue, |event| event.payload.is_terminal()).await;
        assert!(matches!(event.payload, Payload::Error(ControllerError::Query { .. })));
        controller.apply(event.payload);
        assert_eq!(controller.state(), ObjectState::Failed);
        assert_eq!(driver.executed_matching("information_schema.columns"), 2);
        assert_eq!(driver.connection_closes(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_half_cancels_sibling_before_closing_its_connection() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond(
            "from public.orders",
            FakeResponse::block_rows(vec![ColumnMeta::new("id", "INT4", ScanKind::Integer)]),
        );
        driver.respond(
            "information_schema.columns",
            FakeResponse::fail_execute("permission denied for table orders"),
        );
        driver.delay_close(Duration::from_millis(300));
        let (mut controller, mut queue) =
            object_controller(&driver, ObjectDescriptor::new("public.orders", false));

        controller.init();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.cursor_closes(), 1);
        assert_eq!(driver.server_cancels(), 1);
        assert_eq!(driver.connection_closes(), 0);

        let (event, _) = testing::next_matching(&mut queue, |event| event.payload.is_terminal()).await;
        assert!(matches!(
            event.payload,
            Payload::Error(ControllerError::Query { ref message, .. }) if message.contains("permission denied")
        ));
        controller.apply(event.payload);
        assert_eq!(controller.state(), ObjectState::Failed);
        assert_eq!(driver.connection_closes(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_stops_both_halves_and_closes_both_connections() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        driver.respond(
            "from public.orders",
            FakeResponse::block_rows(vec![ColumnMeta::new("id", "INT4", ScanKind::Integer)]),
        );
        driver.respond(
            "information_schema.columns",
            FakeResponse::block_rows(vec![ColumnMeta::new("column_name", "TEXT", ScanKind::Text)]),
        );
        let (mut controller, mut queue) =
            object_controller(&driver, ObjectDescriptor::new("public.orders", false));

        controller.init();
        tokio::time::timeout(Duration::from_secs(5), async {
            while driver.executed().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both halves should start");
        assert!(controller.cancel());

        let (event, _) = testing::next_matching(&mut queue, |event| event.payload.is_terminal()).await;
        assert!(matches!(
            event.payload,
            Payload::Error(ControllerError::Cancelled { .. })
        ));
        controller.apply(event.payload);

        assert_eq!(controller.state(), ObjectState::Failed);
        assert_eq!(driver.connection_closes(), 2);
        assert_eq!(driver.cursor_closes(), 2);
        assert_eq!(driver.server_cancels(), 2);
        assert!(!controller.cancel());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_without_load_is_a_no_op() {
        let driver = FakeDriver::new(EngineKind::Postgres);
        let (controller, _queue) =
            object_controller(&driver, ObjectDescriptor::new("public.users", false));
        assert!(!controller.cancel());
        assert_eq!(controller.state(), ObjectState::Uninitialized);
    }
}
