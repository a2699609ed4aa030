use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::database::DatabaseController;
use crate::dispatcher::{EventReporter, Origin, Payload, SessionId, UiEvent};
use crate::driver::{Driver, DriverConnection};
use crate::error::{ControllerError, QueryPhase};
use crate::introspection::{self, CatalogQuery};
use crate::object::ObjectDescriptor;
use crate::profiles::ConnectionProfile;
use crate::query_execution::{Interrupt, QueryExecution, QueryOutcome};

pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// A live connection scoped to a profile and optionally a database.
pub struct Session {
    profile: Arc<ConnectionProfile>,
    database: Option<String>,
    connection: Box<dyn DriverConnection>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("profile", &self.profile.name)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds the descriptor (a [`ControllerError::Connect`] on rejection)
    /// and connects under `interrupt`.
    pub async fn open(
        driver: &dyn Driver,
        profile: Arc<ConnectionProfile>,
        database: Option<String>,
        interrupt: &Interrupt,
    ) -> Result<Self, ControllerError> {
        let connector = driver
            .connector(&profile, database.as_deref())
            .map_err(ControllerError::connect)?;
        let connection = interrupt
            .guard(QueryPhase::Connecting, connector.connect())
            .await?;
        tracing::debug!(
            profile = %profile.name,
            database = database.as_deref().unwrap_or("-"),
            "session opened"
        );
        Ok(Self {
            profile,
            database,
            connection,
        })
    }

    #[must_use]
    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn connection_mut(&mut self) -> &mut dyn DriverConnection {
        self.connection.as_mut()
    }

    /// Lists the server's databases. On failure the session is closed
    /// before the error is returned.
    pub async fn list_databases<F>(
        mut self,
        interrupt: &Interrupt,
        on_progress: F,
    ) -> Result<(Self, Vec<String>), ControllerError>
    where
        F: FnMut(u64) + Send,
    {
        let query = introspection::list_databases(self.profile.engine);
        match self.run_catalog(query, interrupt, on_progress).await {
            Ok(outcome) => {
                let databases = outcome
                    .rows()
                    .iter()
                    .filter_map(|row| row.first().and_then(|cell| cell.as_text()))
                    .map(str::to_string)
                    .collect();
                Ok((self, databases))
            }
            Err(error) => {
                self.close().await;
                Err(error)
            }
        }
    }

    /// Lists tables and views of `database`, led by the ad-hoc SQL entry.
    /// On failure the session is closed before the error is returned.
    pub async fn list_objects<F>(
        mut self,
        database: &str,
        interrupt: &Interrupt,
        on_progress: F,
    ) -> Result<(Self, Vec<ObjectDescriptor>), ControllerError>
    where
        F: FnMut(u64) + Send,
    {
        let query = introspection::list_objects(self.profile.engine, database);
        match self.run_catalog(query, interrupt, on_progress).await {
            Ok(outcome) => {
                let mut objects = vec![ObjectDescriptor::ad_hoc()];
                objects.extend(outcome.rows().iter().filter_map(|row| {
                    let is_view = row.first()?.is_truthy();
                    let name = row.get(1)?.as_text()?;
                    Some(ObjectDescriptor::new(name, is_view))
                }));
                Ok((self, objects))
            }
            Err(error) => {
                self.close().await;
                Err(error)
            }
        }
    }

    pub(crate) async fn run_catalog<F>(
        &mut self,
        query: CatalogQuery,
        interrupt: &Interrupt,
        on_progress: F,
    ) -> Result<QueryOutcome, ControllerError>
    where
        F: FnMut(u64) + Send,
    {
        QueryExecution::new(query.sql, interrupt.clone())
            .with_params(query.params)
            .run(self.connection.as_mut(), on_progress)
            .await
    }

    /// Closes the connection, giving up after [`CLOSE_TIMEOUT`]; the
    /// connection is dropped either way.
    pub async fn close(self) {
        let profile = self.profile.name.clone();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.connection.close()).await {
            Ok(Ok(())) => tracing::debug!(%profile, "session closed"),
            Ok(Err(error)) => tracing::warn!(%profile, %error, "failed to close connection"),
            Err(_) => tracing::warn!(
                %profile,
                after_secs = CLOSE_TIMEOUT.as_secs(),
                "connection close timed out, dropping it"
            ),
        }
    }
}

/// Who holds a controller's connection right now.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// The connection is lent to a worker (or being opened by one).
    Busy {
        cancellation: Option<CancellationToken>,
    },
    Ready(Session),
}

impl SessionState {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Busy { .. } => "busy",
            Self::Ready(_) => "connected",
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Triggers the in-flight token at most once.
    pub(crate) fn cancel(&mut self) -> bool {
        if let Self::Busy { cancellation } = self {
            if let Some(token) = cancellation.take() {
                token.cancel();
                return true;
            }
        }
        false
    }

    /// Moves to Busy with `cancellation`, handing out the held session.
    pub(crate) fn lend(
        &mut self,
        cancellation: CancellationToken,
    ) -> Result<Session, ControllerError> {
        match std::mem::take(self) {
            Self::Ready(session) => {
                *self = Self::Busy {
                    cancellation: Some(cancellation),
                };
                Ok(session)
            }
            Self::Busy { cancellation } => {
                *self = Self::Busy { cancellation };
                Err(ControllerError::Busy)
            }
            Self::Disconnected => Err(ControllerError::NotConnected),
        }
    }

    /// Cancels any worker and closes a held session on `context`.
    pub(crate) fn release(&mut self, context: &AppContext) {
        match std::mem::take(self) {
            Self::Ready(session) => {
                context.spawn(session.close());
            }
            Self::Busy {
                cancellation: Some(token),
            } => token.cancel(),
            Self::Busy { cancellation: None } | Self::Disconnected => {}
        }
    }
}

/// Server-level controller: connects, lists databases, and owns one
/// [`DatabaseController`] per opened database.
#[derive(Debug)]
pub struct SessionController {
    context: Arc<AppContext>,
    profile: Arc<ConnectionProfile>,
    id: SessionId,
    state: SessionState,
    status: Option<String>,
    progress: Option<u64>,
    last_error: Option<ControllerError>,
    databases: Vec<String>,
    selected: Option<usize>,
    controllers: HashMap<String, DatabaseController>,
}

impl SessionController {
    #[must_use]
    pub fn new(context: Arc<AppContext>, profile: ConnectionProfile) -> Self {
        let id = context.next_session_id();
        Self {
            context,
            profile: Arc::new(profile),
            id,
            state: SessionState::Disconnected,
            status: None,
            progress: None,
            last_error: None,
            databases: Vec::new(),
            selected: None,
            controllers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
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
    pub fn last_error(&self) -> Option<&ControllerError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    #[must_use]
    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    #[must_use]
    pub fn database(&self, name: &str) -> Option<&DatabaseController> {
        self.controllers.get(name)
    }

    #[must_use]
    pub fn selected_database(&self) -> Option<&DatabaseController> {
        let name = self.databases.get(self.selected?)?;
        self.controllers.get(name)
    }

    pub fn selected_database_mut(&mut self) -> Option<&mut DatabaseController> {
        let name = self.databases.get(self.selected?)?;
        self.controllers.get_mut(name)
    }

    /// Starts connecting and listing databases on a worker.
    pub fn connect(&mut self) -> Result<(), ControllerError> {
        match &self.state {
            SessionState::Busy { .. } => return Err(ControllerError::Busy),
            SessionState::Ready(_) => {
                return Err(ControllerError::AlreadyConnected {
                    profile: self.profile.name.clone(),
                })
            }
            SessionState::Disconnected => {}
        }

        self.id = self.context.next_session_id();
        let cancellation = CancellationToken::new();
        self.state = SessionState::Busy {
            cancellation: Some(cancellation.clone()),
        };
        self.status = Some(format!("connecting to {}...", self.profile.name));
        self.progress = None;
        self.last_error = None;
        self.databases.clear();
        self.selected = None;

        tracing::info!(
            profile = %self.profile.name,
            engine = %self.profile.engine,
            session = %self.id,
            "connecting"
        );

        let context = Arc::clone(&self.context);
        let profile = Arc::clone(&self.profile);
        let reporter = context.dispatcher().reporter(self.id, Origin::Session);
        let timeout = context.settings().list_timeout;
        self.context.spawn(async move {
            let interrupt = Interrupt::new(cancellation).with_timeout(timeout);
            match connect_and_list(&context, profile, &interrupt, &reporter).await {
                Ok((session, databases)) => {
                    tracing::info!(databases = databases.len(), "databases listed");
                    reporter.send(Payload::DatabasesListed { session, databases });
                }
                Err(error) => {
                    tracing::warn!(%error, "connect failed");
                    reporter.error(error);
                }
            }
        });
        Ok(())
    }

    /// Cancels the in-flight connect; a no-op when nothing is running.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.state.cancel();
        if cancelled {
            tracing::info!(profile = %self.profile.name, "connect canceled");
        } else {
            tracing::info!(profile = %self.profile.name, "nothing to cancel, already canceled");
        }
        cancelled
    }

    /// Retries a failed connect.
    pub fn retry(&mut self) -> Result<(), ControllerError> {
        self.connect()
    }

    /// Closes the server session and every database session. Object loads
    /// already running finish on their own; their events are discarded.
    pub fn disconnect(&mut self) {
        self.state.release(&self.context);
        for (_, mut controller) in self.controllers.drain() {
            controller.shutdown();
        }
        self.databases.clear();
        self.selected = None;
        self.progress = None;
        self.status = Some("disconnected".to_string());
        self.id = self.context.next_session_id();
        tracing::info!(profile = %self.profile.name, "disconnected");
    }

    /// Selects a database, opening its controller on first use.
    pub fn select_database(&mut self, index: usize) -> Result<(), ControllerError> {
        if !self.state.is_ready() {
            return Err(ControllerError::NotConnected);
        }
        let Some(name) = self.databases.get(index).cloned() else {
            return Ok(());
        };
        self.selected = Some(index);
        let controller = self.controllers.entry(name.clone()).or_insert_with(|| {
            DatabaseController::new(
                Arc::clone(&self.context),
                Arc::clone(&self.profile),
                self.id,
                name,
            )
        });
        controller.open()
    }

    /// Applies one queued event. Runs on the UI thread only.
    pub fn apply(&mut self, event: UiEvent) {
        if event.session != self.id {
            tracing::debug!(event = %event.session, current = %self.id, "discarding stale event");
            self.context.discard(event.payload);
            return;
        }

        let database = match &event.origin {
            Origin::Session => {
                self.apply_own(event.payload);
                return;
            }
            Origin::Database { name } => name.clone(),
            Origin::Object { database, .. } | Origin::AdHoc { database } => database.clone(),
        };
        if let Some(controller) = self.controllers.get_mut(&database) {
            controller.apply(event);
        } else {
            self.context.discard(event.payload);
        }
    }

    fn apply_own(&mut self, payload: Payload) {
        match payload {
            Payload::Status(message) => self.status = Some(message),
            Payload::Progress(elapsed) => self.progress = Some(elapsed),
            Payload::Error(error) => {
                self.state = SessionState::Disconnected;
                self.progress = None;
                self.status = Some(error.to_string());
                self.last_error = Some(error);
            }
            Payload::DatabasesListed { session, databases } => {
                self.state = SessionState::Ready(session);
                self.progress = None;
                self.status = None;
                self.databases = databases;
                let preferred = self.profile.database.as_deref().and_then(|preferred| {
                    self.databases.iter().position(|name| name == preferred)
                });
                if let Some(index) = preferred {
                    if let Err(error) = self.select_database(index) {
                        tracing::debug!(%error, "could not open default database");
                    }
                }
            }
            other => self.context.discard(other),
        }
    }
}

async fn connect_and_list(
    context: &AppContext,
    profile: Arc<ConnectionProfile>,
    interrupt: &Interrupt,
    reporter: &EventReporter,
) -> Result<(Session, Vec<String>), ControllerError> {
    let driver = context.drivers().driver(profile.engine)?;
    let database = profile.database.clone();
    let session = Session::open(driver.as_ref(), profile, database, interrupt).await?;
    let progress = reporter.clone();
    session
        .list_databases(interrupt, move |elapsed| progress.progress(elapsed))
        .await
}
