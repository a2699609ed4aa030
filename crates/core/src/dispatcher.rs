use std::fmt;

use tokio::sync::mpsc;

use crate::error::ControllerError;
use crate::object::{ObjectDescriptor, ObjectLoad};
use crate::query_execution::QueryOutcome;
use crate::session::Session;

/// Generation of a connection attempt. Events from an older generation are
/// discarded when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which controller an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Session,
    Database { name: String },
    Object { database: String, object: String },
    AdHoc { database: String },
}

#[derive(Debug)]
pub enum Payload {
    Status(String),
    Progress(u64),
    Error(ControllerError),
    DatabasesListed {
        session: Session,
        databases: Vec<String>,
    },
    ObjectsListed {
        session: Session,
        objects: Vec<ObjectDescriptor>,
    },
    ObjectLoaded(ObjectLoad),
    /// Terminal event of an ad-hoc run; hands the lent session back.
    ResultReady {
        session: Session,
        outcome: Result<QueryOutcome, ControllerError>,
    },
}

impl Payload {
    /// Whether this payload ends a worker's life.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Status(_) | Self::Progress(_))
    }

    pub(crate) fn into_session(self) -> Option<Session> {
        match self {
            Self::DatabasesListed { session, .. }
            | Self::ObjectsListed { session, .. }
            | Self::ResultReady { session, .. } => Some(session),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct UiEvent {
    pub session: SessionId,
    pub origin: Origin,
    pub payload: Payload,
}

/// Sending half of the UI queue. Workers hold clones; only the UI thread
/// consumes.
#[derive(Debug, Clone)]
pub struct UiDispatcher {
    sender: mpsc::UnboundedSender<UiEvent>,
}

impl UiDispatcher {
    pub fn send(&self, event: UiEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("ui queue closed; dropping event");
        }
    }

    #[must_use]
    pub fn reporter(&self, session: SessionId, origin: Origin) -> EventReporter {
        EventReporter {
            dispatcher: self.clone(),
            session,
            origin,
        }
    }
}

/// A dispatcher bound to one session generation and origin.
#[derive(Debug, Clone)]
pub struct EventReporter {
    dispatcher: UiDispatcher,
    session: SessionId,
    origin: Origin,
}

impl EventReporter {
    pub fn send(&self, payload: Payload) {
        self.dispatcher.send(UiEvent {
            session: self.session,
            origin: self.origin.clone(),
            payload,
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(Payload::Status(message.into()));
    }

    pub fn progress(&self, elapsed_secs: u64) {
        self.send(Payload::Progress(elapsed_secs));
    }

    pub fn error(&self, error: ControllerError) {
        self.send(Payload::Error(error));
    }
}

#[derive(Debug)]
pub struct UiQueue {
    receiver: mpsc::UnboundedReceiver<UiEvent>,
}

impl UiQueue {
    pub fn try_next(&mut self) -> Option<UiEvent> {
        self.receiver.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<UiEvent> {
        self.receiver.recv().await
    }

    /// Everything queued right now, in arrival order.
    pub fn drain(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_next() {
            events.push(event);
        }
        events
    }
}

#[must_use]
pub fn channel() -> (UiDispatcher, UiQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (UiDispatcher { sender }, UiQueue { receiver })
}
