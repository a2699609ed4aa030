use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adhoc::AdHocEditor;
use crate::context::AppContext;
use crate::dispatcher::{Origin, Payload, SessionId, UiEvent};
use crate::error::ControllerError;
use crate::object::{ObjectController, ObjectDescriptor, ObjectKind};
use crate::profiles::ConnectionProfile;
use crate::query_execution::{Interrupt, QueryExecution};
use crate::session::{Session, SessionState};

/// One row of the object list.
#[derive(Debug)]
pub enum BrowserEntry {
    AdHoc(AdHocEditor),
    Table(ObjectController),
    View(ObjectController),
}

impl BrowserEntry {
    /// Called when the entry is selected. Tables and views start loading on
    /// first activation.
    pub fn activate(&self) {
        match self {
            Self::AdHoc(_) => {}
            Self::Table(controller) | Self::View(controller) => {
                controller.init();
            }
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> ObjectDescriptor {
        match self {
            Self::AdHoc(_) => ObjectDescriptor::ad_hoc(),
            Self::Table(controller) | Self::View(controller) => controller.descriptor().clone(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::AdHoc(_) => crate::object::AD_HOC_ENTRY_NAME,
            Self::Table(controller) | Self::View(controller) => &controller.descriptor().name,
        }
    }

    #[must_use]
    pub fn object(&self) -> Option<&ObjectController> {
        match self {
            Self::AdHoc(_) => None,
            Self::Table(controller) | Self::View(controller) => Some(controller),
        }
    }

    fn object_mut(&mut self) -> Option<&mut ObjectController> {
        match self {
            Self::AdHoc(_) => None,
            Self::Table(controller) | Self::View(controller) => Some(controller),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingState {
    Idle,
    Listing,
    Ready,
    Failed(ControllerError),
}

/// One database: its object listing, its own session, and the entries.
#[derive(Debug)]
pub struct DatabaseController {
    context: Arc<AppContext>,
    profile: Arc<ConnectionProfile>,
    session_id: SessionId,
    name: String,
    listing: ListingState,
    state: SessionState,
    status: Option<String>,
    progress: Option<u64>,
    entries: Vec<BrowserEntry>,
    selected: Option<usize>,
}

impl DatabaseController {
    #[must_use]
    pub fn new(
        context: Arc<AppContext>,
        profile: Arc<ConnectionProfile>,
        session_id: SessionId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            context,
            profile,
            session_id,
            name: name.into(),
            listing: ListingState::Idle,
            state: SessionState::Disconnected,
            status: None,
            progress: None,
            entries: Vec::new(),
            selected: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn listing(&self) -> &ListingState {
        &self.listing
    }

    #[must_use]
    pub fn session_state(&self) -> &SessionState {
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
    pub fn entries(&self) -> &[BrowserEntry] {
        &self.entries
    }

    #[must_use]
    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    #[must_use]
    pub fn selected_entry(&self) -> Option<&BrowserEntry> {
        self.entries.get(self.selected?)
    }

    pub fn editor_mut(&mut self) -> Option<&mut AdHocEditor> {
        self.entries.iter_mut().find_map(|entry| match entry {
            BrowserEntry::AdHoc(editor) => Some(editor),
            _ => None,
        })
    }

    #[must_use]
    pub fn editor(&self) -> Option<&AdHocEditor> {
        self.entries.iter().find_map(|entry| match entry {
            BrowserEntry::AdHoc(editor) => Some(editor),
            _ => None,
        })
    }

    /// Opens a session for this database and lists its objects. No-op while
    /// listing or once listed.
    pub fn open(&mut self) -> Result<(), ControllerError> {
        match self.listing {
            ListingState::Listing | ListingState::Ready => return Ok(()),
            ListingState::Idle | ListingState::Failed(_) => {}
        }

        let cancellation = CancellationToken::new();
        self.state = SessionState::Busy {
            cancellation: Some(cancellation.clone()),
        };
        self.listing = ListingState::Listing;
        self.status = Some("listing tables...".to_string());
        self.progress = None;

        let context = Arc::clone(&self.context);
        let profile = Arc::clone(&self.profile);
        let database = self.name.clone();
        let reporter = context.dispatcher().reporter(
            self.session_id,
            Origin::Database {
                name: database.clone(),
            },
        );
        let timeout = context.settings().list_timeout;
        tracing::debug!(%database, "listing objects");

        self.context.spawn(async move {
            let interrupt = Interrupt::new(cancellation).with_timeout(timeout);
            let progress = reporter.clone();
            let result = async {
                let driver = context.drivers().driver(profile.engine)?;
                let session =
                    Session::open(driver.as_ref(), profile, Some(database.clone()), &interrupt)
                        .await?;
                session
                    .list_objects(&database, &interrupt, move |elapsed| {
                        progress.progress(elapsed);
                    })
                    .await
            }
            .await;
            match result {
                Ok((session, objects)) => {
                    reporter.send(Payload::ObjectsListed { session, objects });
                }
                Err(error) => {
                    tracing::warn!(%error, "object listing failed");
                    reporter.error(error);
                }
            }
        });
        Ok(())
    }

    /// Re-runs a failed listing.
    pub fn retry(&mut self) -> Result<(), ControllerError> {
        if matches!(self.listing, ListingState::Failed(_)) {
            self.open()
        } else {
            Ok(())
        }
    }

    /// Cancels the listing or the ad-hoc run holding this database's session.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.state.cancel();
        if !cancelled {
            tracing::info!(database = %self.name, "nothing to cancel, already canceled");
        }
        cancelled
    }

    pub fn select(&mut self, index: usize) {
        if let Some(entry) = self.entries.get(index) {
            self.selected = Some(index);
            entry.activate();
        }
    }

    /// Runs the statement under the editor cursor on this database's session.
    pub fn run_statement(&mut self) -> Result<(), ControllerError> {
        let query = self
            .editor()
            .map(|editor| editor.current_statement().to_string())
            .unwrap_or_default();
        self.run_query(query)
    }

    /// Runs the editor's last query again.
    pub fn rerun(&mut self) -> Result<(), ControllerError> {
        let query = self
            .editor()
            .and_then(AdHocEditor::last_query)
            .map(str::to_string)
            .unwrap_or_default();
        self.run_query(query)
    }

    pub fn run_query(&mut self, query: String) -> Result<(), ControllerError> {
        if query.trim().is_empty() {
            self.status = Some("nothing to run".to_string());
            return Ok(());
        }

        let cancellation = CancellationToken::new();
        let mut session = self.state.lend(cancellation.clone())?;
        if let Some(editor) = self.editor_mut() {
            editor.begin(query.clone());
        }

        let reporter = self.context.dispatcher().reporter(
            self.session_id,
            Origin::AdHoc {
                database: self.name.clone(),
            },
        );
        tracing::info!(database = %self.name, "running ad-hoc query");
        self.context.spawn(async move {
            let progress = reporter.clone();
            let outcome = QueryExecution::new(query, Interrupt::new(cancellation))
                .run(session.connection_mut(), move |elapsed| {
                    progress.progress(elapsed);
                })
                .await;
            reporter.send(Payload::ResultReady { session, outcome });
        });
        Ok(())
    }

    /// Closes this database's session and cancels its in-flight listing or
    /// run. Object loads are left to finish.
    pub fn shutdown(&mut self) {
        self.state.release(&self.context);
        self.listing = ListingState::Idle;
    }

    /// Applies an event addressed to this database. UI thread only.
    pub fn apply(&mut self, event: UiEvent) {
        match event.origin {
            Origin::Database { .. } => self.apply_listing(event.payload),
            Origin::AdHoc { .. } => self.apply_run(event.payload),
            Origin::Object { object, .. } => {
                let target = self
                    .entries
                    .iter_mut()
                    .filter_map(BrowserEntry::object_mut)
                    .find(|controller| controller.descriptor().name == object);
                match target {
                    Some(controller) => controller.apply(event.payload),
                    None => tracing::debug!(%object, "event for unknown object"),
                }
            }
            Origin::Session => tracing::debug!("session event routed to database"),
        }
    }

    fn apply_listing(&mut self, payload: Payload) {
        match payload {
            Payload::Status(message) => self.status = Some(message),
            Payload::Progress(elapsed) => {
                self.progress = Some(elapsed);
                self.status = Some(format!("listing tables... {elapsed}s"));
            }
            Payload::Error(error) => {
                self.state = SessionState::Disconnected;
                self.status = Some(error.to_string());
                self.progress = None;
                self.listing = ListingState::Failed(error);
            }
            Payload::ObjectsListed { session, objects } => {
                self.state = SessionState::Ready(session);
                self.status = None;
                self.progress = None;
                self.listing = ListingState::Ready;
                self.entries = objects
                    .into_iter()
                    .map(|descriptor| self.entry_for(descriptor))
                    .collect();
                self.selected = None;
            }
            other => {
                if let Some(session) = other.into_session() {
                    self.context.spawn(session.close());
                }
            }
        }
    }

    fn apply_run(&mut self, payload: Payload) {
        match payload {
            Payload::Progress(elapsed) => {
                if let Some(editor) = self.editor_mut() {
                    editor.progress(elapsed);
                }
            }
            Payload::ResultReady { session, outcome } => {
                self.state = SessionState::Ready(session);
                if let Some(editor) = self.editor_mut() {
                    editor.finish(outcome);
                }
            }
            Payload::Status(message) => self.status = Some(message),
            other => tracing::debug!(?other, "unexpected payload for ad-hoc run"),
        }
    }

    fn entry_for(&self, descriptor: ObjectDescriptor) -> BrowserEntry {
        match descriptor.kind {
            ObjectKind::AdHocSql => BrowserEntry::AdHoc(AdHocEditor::open(
                self.context.settings().scripts.clone(),
                &self.profile.name,
                &self.name,
            )),
            ObjectKind::Table => BrowserEntry::Table(self.object_controller(descriptor)),
            ObjectKind::View => BrowserEntry::View(self.object_controller(descriptor)),
        }
    }

    fn object_controller(&self, descriptor: ObjectDescriptor) -> ObjectController {
        ObjectController::new(
            Arc::clone(&self.context),
            Arc::clone(&self.profile),
            self.session_id,
            self.name.clone(),
            descriptor,
        )
    }
}
