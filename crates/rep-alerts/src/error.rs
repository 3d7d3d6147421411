//! Error types for the rep-alerts crate.

use thiserror::Error;

use crate::types::{AlertId, ThresholdId};

/// Errors that can occur in the alerting system.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid threshold configuration.
    #[error("invalid threshold: {reason}")]
    InvalidThreshold {
        /// The reason the threshold is invalid.
        reason: String,
    },

    /// Invalid alerting configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Threshold with the given ID was not found.
    #[error("threshold not found: {id}")]
    ThresholdNotFound {
        /// The threshold ID that was not found.
        id: ThresholdId,
    },

    /// Threshold cannot be deleted because alerts still reference it.
    #[error("threshold {id} is referenced by {alerts} alert(s)")]
    ThresholdInUse {
        /// The threshold ID.
        id: ThresholdId,
        /// Number of alerts referencing it.
        alerts: usize,
    },

    /// Alert with the given ID was not found.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The alert ID that was not found.
        id: AlertId,
    },

    /// An unresolved alert already exists for the threshold.
    #[error("threshold {threshold_id} already has an active alert")]
    DuplicateActiveAlert {
        /// The threshold that already has an active alert.
        threshold_id: ThresholdId,
    },

    /// In-app notification delivery failed.
    #[error("notification failed: {reason}")]
    NotificationFailed {
        /// The reason the notification failed.
        reason: String,
    },

    /// Email delivery failed.
    #[error("email to {recipient} failed: {reason}")]
    EmailFailed {
        /// The recipient address.
        recipient: String,
        /// The reason the email failed.
        reason: String,
    },

    /// Metric source could not produce samples.
    #[error("metric source error: {reason}")]
    MetricSource {
        /// The reason the collection failed.
        reason: String,
    },

    /// A background job could not run to completion.
    #[error("job failed: {reason}")]
    JobFailed {
        /// The reason the job failed.
        reason: String,
    },

    /// Underlying store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for AlertError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
