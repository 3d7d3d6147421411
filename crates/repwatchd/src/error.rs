//! Error types for repwatchd.

use rep_alerts::AlertError;
use thiserror::Error;

/// Errors that can occur in the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// System metric collection failed.
    #[error("metrics collection failed: {0}")]
    Metrics(String),

    /// Alerting library error.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
