use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::dispatcher::{Payload, SessionId, UiDispatcher};
use crate::driver::DriverRegistry;
use crate::script_cache::ScriptCache;

pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct Settings {
    /// Deadline for connect + database listing and for object listing.
    pub list_timeout: Duration,
    pub scripts: Option<ScriptCache>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            list_timeout: DEFAULT_LIST_TIMEOUT,
            scripts: None,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn with_scripts(mut self, scripts: ScriptCache) -> Self {
        self.scripts = Some(scripts);
        self
    }
}

/// Everything a controller needs to start work and report back.
#[derive(Debug)]
pub struct AppContext {
    dispatcher: UiDispatcher,
    drivers: DriverRegistry,
    runtime: Handle,
    settings: Settings,
    generation: AtomicU64,
}

impl AppContext {
    #[must_use]
    pub fn new(
        dispatcher: UiDispatcher,
        drivers: DriverRegistry,
        runtime: Handle,
        settings: Settings,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            drivers,
            runtime,
            settings,
            generation: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn dispatcher(&self) -> &UiDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn next_session_id(&self) -> SessionId {
        SessionId::new(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Drops an event nobody owns, closing any session it carries.
    pub fn discard(&self, payload: Payload) {
        if let Some(session) = payload.into_session() {
            self.spawn(session.close());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AppContext, Settings};
    use crate::dispatcher;
    use crate::driver::DriverRegistry;

    #[tokio::test]
    async fn session_ids_are_monotonic() {
        let (dispatcher, _queue) = dispatcher::channel();
        let context = AppContext::new(
            dispatcher,
            DriverRegistry::new(),
            tokio::runtime::Handle::current(),
            Settings::default(),
        );

        let first = context.next_session_id();
        let second = context.next_session_id();
        assert!(second > first);
        assert_eq!(context.settings().list_timeout, Duration::from_secs(15));

        let value = context.spawn(async { 7 }).await.expect("task should finish");
        assert_eq!(value, 7);
    }
}
