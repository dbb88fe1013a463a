//! Error types for the NinjaExa rate limiter.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for rate limiter operations.
#[derive(Error, Debug)]
pub enum NinjaexaError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another process held the state lock for longer than the timeout
    #[error("Timed out after {waited:?} waiting for state lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// State file could not be encoded or decoded
    #[error("State serialization error: {0}")]
    State(#[from] serde_json::Error),

    /// The admission gate refused the request
    #[error("{0}")]
    Denied(String),

    /// Blocking admission task failed to complete
    #[error("Admission task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for NinjaexaError {
    fn from(err: ::config::ConfigError) -> Self {
        NinjaexaError::Config(err.to_string())
    }
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, NinjaexaError>;
