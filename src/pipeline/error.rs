//! Error types and reporting for pipeline stations.

use crate::error::IntakeError;
use std::fmt;

/// Errors that can occur while a station handles a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StationError {
    /// The frame is dropped; the station keeps processing.
    Recoverable(String),
    /// The station shuts down and the task cancels the chain.
    Fatal(String),
}

impl StationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StationError::Fatal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StationError::Recoverable(msg) | StationError::Fatal(msg) => msg,
        }
    }
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

impl From<IntakeError> for StationError {
    /// Collaborator failures are fatal to the frame, not to the chain.
    fn from(error: IntakeError) -> Self {
        StationError::Recoverable(error.to_string())
    }
}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Error reporter that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => {
                tracing::warn!(station, error = %msg, "frame dropped")
            }
            StationError::Fatal(msg) => tracing::error!(station, error = %msg, "station failed"),
        }
    }
}
