use std::sync::Arc;
use std::time::Duration;

use sqlnav_core::context::{AppContext, Settings};
use sqlnav_core::dispatcher::{self, UiQueue};
use sqlnav_core::logging::{init_logging, LogConfig};
use sqlnav_core::profiles::FileProfilesStore;
use sqlnav_core::script_cache::ScriptCache;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn run_app(
    store: FileProfilesStore,
    settings: Settings,
    run_tui: impl FnOnce(Arc<AppContext>, UiQueue, FileProfilesStore) -> Result<(), sqlnav_tui::TuiError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sqlnav-worker")
        .build()?;
    let (dispatcher, queue) = dispatcher::channel();
    let context = AppContext::new(
        dispatcher,
        sqlnav_adapters::default_drivers(),
        runtime.handle().clone(),
        settings,
    );

    let result = run_tui(context, queue, store);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logging = match LogConfig::default_location() {
        Ok(config) => Some(init_logging(&config)),
        Err(error) => {
            eprintln!("warning: file logging disabled: {error}");
            None
        }
    };

    let store = FileProfilesStore::load_default()?;
    tracing::info!(
        path = %store.path().display(),
        profiles = store.profiles().len(),
        "profiles loaded"
    );

    let settings = match ScriptCache::default_location() {
        Ok(scripts) => Settings::default().with_scripts(scripts),
        Err(error) => {
            tracing::warn!(%error, "script cache unavailable");
            Settings::default()
        }
    };

    run_app(store, settings, sqlnav_tui::run)
}
