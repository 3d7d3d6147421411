//! repwatchd - alert threshold daemon
//!
//! Samples host metrics on a schedule, evaluates them against the configured
//! thresholds and keeps the alert database, notifications and history current.

pub mod config;
pub mod error;
pub mod system_metrics;

use std::sync::Arc;

use rep_alerts::{AlertingService, LogEmailSender, SqliteStore, StaticRecipients};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use system_metrics::SystemMetricSource;

/// Opens the alert database and wires the alerting service.
///
/// Email is handed to [`LogEmailSender`]; delivery is left to whatever
/// consumes the log stream.
///
/// # Errors
///
/// Returns an error if the database directory cannot be created or the
/// database cannot be opened and migrated.
pub fn build_service(config: &DaemonConfig) -> Result<AlertingService> {
    if let Some(parent) = config
        .storage
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    let store = SqliteStore::open(&config.storage.path)?;
    info!(path = %config.storage.path.display(), "alert store ready");

    Ok(AlertingService::new(
        Arc::new(store),
        Arc::new(StaticRecipients::new(config.alerting.recipients.clone())),
        Arc::new(LogEmailSender::new()),
        config.alerting.clone(),
    ))
}

/// Builds the system metric source for `config`.
#[must_use]
pub fn metric_source(config: &DaemonConfig) -> Arc<SystemMetricSource> {
    Arc::new(SystemMetricSource::new(config.metrics.disk_mount.clone()))
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "repwatchd={level},rep_alerts={level}",
            level = config.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| DaemonError::Config(format!("failed to install logger: {e}")))
}
