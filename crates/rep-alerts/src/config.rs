//! Alerting configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// Default dashboard base URL used in email links.
pub const DEFAULT_DASHBOARD_URL: &str = "http://localhost:5000";
/// Longest accepted retention window, in days.
pub const MAX_RETENTION_DAYS: u32 = 36_500;
/// Default prefix for in-app notification deep links.
pub const DEFAULT_NOTIFICATION_URL_PREFIX: &str = "/Admin/Alerts/Details/";

/// Top-level alerting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Who receives notifications and email.
    pub recipients: RecipientsConfig,
    /// Base URL of the admin dashboard.
    pub dashboard_url: String,
    /// Prefix of the per-alert notification link; the alert id is appended.
    pub notification_url_prefix: String,
    /// Retention windows used by maintenance.
    pub retention: RetentionConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            recipients: RecipientsConfig::default(),
            dashboard_url: DEFAULT_DASHBOARD_URL.to_string(),
            notification_url_prefix: DEFAULT_NOTIFICATION_URL_PREFIX.to_string(),
            retention: RetentionConfig::default(),
        }
    }
}

impl AlertingConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the dashboard URL is empty, a
    /// recipient is blank, an email address has no `@` or a retention window
    /// is zero.
    pub fn validate(&self) -> Result<()> {
        if self.dashboard_url.trim().is_empty() {
            return Err(AlertError::InvalidConfig {
                reason: "dashboard_url cannot be empty".to_string(),
            });
        }
        self.recipients.validate()?;
        self.retention.validate()
    }

    /// Returns the dashboard page listing alerts.
    #[must_use]
    pub fn dashboard_alerts_url(&self) -> String {
        format!("{}/Admin/Alerts", self.dashboard_url.trim_end_matches('/'))
    }

    /// Returns the in-app deep link for an alert.
    #[must_use]
    pub fn notification_url(&self, alert_id: i64) -> String {
        format!("{}{alert_id}", self.notification_url_prefix)
    }
}

/// Static recipient lists.
///
/// Escalation lists fall back to the alert lists when left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientsConfig {
    /// Users receiving in-app alert notifications.
    pub alert_users: Vec<String>,
    /// Users receiving in-app escalation notifications.
    pub escalation_users: Vec<String>,
    /// Addresses receiving alert email.
    pub alert_emails: Vec<String>,
    /// Addresses receiving escalation email.
    pub escalation_emails: Vec<String>,
}

impl RecipientsConfig {
    fn validate(&self) -> Result<()> {
        for user in self.alert_users.iter().chain(&self.escalation_users) {
            if user.trim().is_empty() {
                return Err(AlertError::InvalidConfig {
                    reason: "recipient user id cannot be blank".to_string(),
                });
            }
        }
        for address in self.alert_emails.iter().chain(&self.escalation_emails) {
            if !address.contains('@') {
                return Err(AlertError::InvalidConfig {
                    reason: format!("invalid email address '{address}'"),
                });
            }
        }
        Ok(())
    }
}

/// How long closed records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a resolved alert is kept.
    pub resolved_alert_days: u32,
    /// Days a notification is kept.
    pub notification_days: u32,
    /// Days a history row is kept.
    pub history_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            resolved_alert_days: 30,
            notification_days: 60,
            history_days: 90,
        }
    }
}

impl RetentionConfig {
    fn validate(&self) -> Result<()> {
        if self.resolved_alert_days == 0 || self.notification_days == 0 || self.history_days == 0
        {
            return Err(AlertError::InvalidConfig {
                reason: "retention windows must be at least one day".to_string(),
            });
        }
        let longest = self
            .resolved_alert_days
            .max(self.notification_days)
            .max(self.history_days);
        if longest > MAX_RETENTION_DAYS {
            return Err(AlertError::InvalidConfig {
                reason: format!(
                    "retention window of {longest} days exceeds {MAX_RETENTION_DAYS} days"
                ),
            });
        }
        Ok(())
    }

    /// Retention of resolved alerts.
    #[must_use]
    pub fn resolved_alerts(&self) -> Duration {
        Duration::days(i64::from(self.resolved_alert_days))
    }

    /// Retention of notifications.
    #[must_use]
    pub fn notifications(&self) -> Duration {
        Duration::days(i64::from(self.notification_days))
    }

    /// Retention of history rows.
    #[must_use]
    pub fn history(&self) -> Duration {
        Duration::days(i64::from(self.history_days))
    }
}
