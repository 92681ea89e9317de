//! Error types and reporting for pipeline stations.

use std::fmt;
use std::sync::Mutex;

/// Errors that can occur during station processing.
#[derive(Debug, Clone, PartialEq)]
pub enum StationError {
    /// Recoverable error that allows the station to continue processing.
    Recoverable(String),
    /// Fatal error that requires the station to shut down.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Error reporter that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => {
                tracing::warn!(station, error = %msg, "station error, continuing");
            }
            StationError::Fatal(msg) => {
                tracing::error!(station, error = %msg, "station failed, aborting session");
            }
        }
    }
}

/// Reporter that keeps every error, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    errors: Mutex<Vec<(String, StationError)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors reported so far, oldest first.
    pub fn errors(&self) -> Vec<(String, StationError)> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, station: &str, error: &StationError) {
        LogReporter.report(station, error);
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((station.to_string(), error.clone()));
    }
}
