//! Daemon configuration.
//!
//! Loaded from a TOML file with these sections:
//! - `[alerting]` recipients, dashboard links and retention windows
//! - `[jobs]` check and maintenance intervals
//! - `[storage]` location of the alert database
//! - `[metrics]` which disk the system source reports on
//! - `[logging]` level and output format

use std::path::{Path, PathBuf};
use std::str::FromStr;

use rep_alerts::{AlertingConfig, JobSchedule};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

/// Sample configuration written by `init-config`.
pub const SAMPLE_CONFIG: &str = r#"# repwatchd configuration

[alerting]
dashboard_url = "http://localhost:5000"
notification_url_prefix = "/Admin/Alerts/Details/"

[alerting.recipients]
alert_users = ["admin"]
escalation_users = []
alert_emails = ["admin@example.com"]
escalation_emails = []

[alerting.retention]
resolved_alert_days = 30
notification_days = 60
history_days = 90

[jobs]
check_interval_secs = 300
maintenance_interval_secs = 86400

[storage]
path = "/var/lib/repwatchd/alerts.db"

[metrics]
disk_mount = "/"

[logging]
level = "info"
json = false
"#;

/// Where alerts are persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/repwatchd/alerts.db"),
        }
    }
}

/// System metric settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Mount point reported as "Disk Space Available".
    pub disk_mount: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            disk_mount: PathBuf::from("/"),
        }
    }
}

/// Log output settings. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn or error.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Alerting behaviour.
    pub alerting: AlertingConfig,
    /// Job intervals.
    pub jobs: JobSchedule,
    /// Storage location.
    pub storage: StorageConfig,
    /// System metric settings.
    pub metrics: MetricsConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DaemonError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any section holds an invalid value.
    pub fn validate(&self) -> Result<()> {
        self.alerting
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;
        self.jobs
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        if self.storage.path.as_os_str().is_empty() {
            return Err(DaemonError::Config(
                "storage.path cannot be empty".to_string(),
            ));
        }

        if self.metrics.disk_mount.as_os_str().is_empty() {
            return Err(DaemonError::Config(
                "metrics.disk_mount cannot be empty".to_string(),
            ));
        }

        if tracing::Level::from_str(&self.logging.level).is_err() {
            return Err(DaemonError::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}

/// Writes [`SAMPLE_CONFIG`] to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file already exists or cannot be written.
pub fn write_sample(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(DaemonError::Config(format!(
            "refusing to overwrite '{}'",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, SAMPLE_CONFIG)?;
    Ok(())
}
