use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;

/// Stage of a query's lifecycle an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Connecting,
    Executing,
    ReadingColumns,
    ScanningRow,
    ReadingTrailer,
}

impl QueryPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Executing => "executing query",
            Self::ReadingColumns => "reading column names",
            Self::ScanningRow => "scanning row",
            Self::ReadingTrailer => "reading next row",
        }
    }
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("connecting: {message}")]
    Connect { message: String },
    #[error("{phase}: {message}")]
    Query { phase: QueryPhase, message: String },
    #[error("{phase}: canceled")]
    Cancelled { phase: QueryPhase },
    #[error("{phase}: timed out after {}s", after.as_secs())]
    TimedOut { phase: QueryPhase, after: Duration },
    #[error("another operation is already in progress")]
    Busy,
    #[error("already connected to `{profile}`")]
    AlreadyConnected { profile: String },
    #[error("not connected")]
    NotConnected,
}

impl ControllerError {
    pub fn connect(error: impl fmt::Display) -> Self {
        Self::Connect {
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn query(phase: QueryPhase, error: DriverError) -> Self {
        Self::Query {
            phase,
            message: error.message().to_string(),
        }
    }

    /// True for cancellation and deadline expiry.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }

    #[must_use]
    pub fn phase(&self) -> Option<QueryPhase> {
        match self {
            Self::Query { phase, .. } | Self::Cancelled { phase } | Self::TimedOut { phase, .. } => {
                Some(*phase)
            }
            Self::Connect { .. } => Some(QueryPhase::Connecting),
            Self::Busy | Self::AlreadyConnected { .. } | Self::NotConnected => None,
        }
    }
}
