//! Tracing setup. The interactive binary owns the terminal, so it logs to a
//! daily rotating file; headless tools log to stderr.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::profiles::{app_config_dir, ProfilesError};

pub const LOG_ENV: &str = "SQLNAV_LOG";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_dir: PathBuf,
    pub log_filter: Option<String>,
}

impl LogConfig {
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            log_filter: None,
        }
    }

    /// `<config dir>/sqlnav/logs`.
    pub fn default_location() -> Result<Self, ProfilesError> {
        Ok(Self::new(app_config_dir()?.join("logs")))
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Keeps the background writer alive; dropping it flushes pending lines.
#[derive(Debug)]
pub struct LoggingGuard {
    worker_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    #[must_use]
    pub fn writes_to_file(&self) -> bool {
        self.worker_guard.is_some()
    }
}

/// Installs file logging. When the log directory cannot be created, logging
/// is disabled rather than written over the terminal UI.
pub fn init_logging(config: &LogConfig) -> LoggingGuard {
    match init_file_logging(config) {
        Ok(guard) => LoggingGuard {
            worker_guard: Some(guard),
        },
        Err(error) => {
            eprintln!("warning: file logging disabled: {error}");
            LoggingGuard {
                worker_guard: None,
            }
        }
    }
}

pub fn init_stderr_logging(filter: Option<&str>) -> LoggingGuard {
    keep_existing_subscriber(
        tracing_subscriber::fmt()
            .with_env_filter(build_env_filter(filter))
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
    );
    LoggingGuard {
        worker_guard: None,
    }
}

/// A second install fails only because a global subscriber is already set;
/// that one stays in place.
fn keep_existing_subscriber(result: Result<(), Box<dyn std::error::Error + Send + Sync>>) {
    if let Err(error) = result {
        tracing::debug!(%error, "tracing subscriber already installed");
    }
}

fn init_file_logging(config: &LogConfig) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("sqlnav")
        .filename_suffix("log")
        .build(&config.log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    keep_existing_subscriber(
        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_env_filter(build_env_filter(config.log_filter.as_deref()))
            .with_ansi(false)
            .with_target(true)
            .try_init(),
    );

    Ok(guard)
}

/// Custom filter, then `SQLNAV_LOG`, then `RUST_LOG`, then the build default.
fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

#[must_use]
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "debug,sqlnav_core=trace,tokio_postgres=warn,mysql_async=warn,tiberius=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "info,tokio_postgres=warn,mysql_async=warn,tiberius=warn"
    }
}
