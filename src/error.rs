//! Error types for discovery and frame-exchange sessions

use std::time::Duration;
use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Platform or CPU unsupported, or the engine could not be initialized
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// No discovery cycle completed within the budget
    #[error("Discovery timed out after {}ms", .0.as_millis())]
    DiscoveryTimeout(Duration),

    /// No frame arrived before the pull deadline
    #[error("No frame within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Session is closed")]
    SessionClosed,

    /// Engine handed back a frame whose tag and fields disagree
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Engine error: {0}")]
    Engine(EngineError),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether re-issuing the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DiscoveryTimeout(_) | Error::Timeout(_))
    }
}

/// Faults reported by the engine facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine not available: {0}")]
    Unavailable(String),

    #[error("handle closed")]
    Closed,

    #[error("failed to create {0}")]
    CreateFailed(String),

    #[error("transport fault: {0}")]
    Transport(String),
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Closed => Error::SessionClosed,
            EngineError::Unavailable(msg) => Error::EngineUnavailable(msg),
            other => Error::Engine(other),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Engine(EngineError::Transport(format!("engine task failed: {}", err)))
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
