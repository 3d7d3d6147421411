//! Retention cleanup.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RetentionConfig;
use crate::error::{AlertError, Result};
use crate::store::AlertStore;

/// Rows removed by one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Resolved alerts deleted.
    pub alerts_purged: usize,
    /// Notifications deleted.
    pub notifications_purged: usize,
    /// History rows deleted.
    pub history_purged: usize,
}

impl MaintenanceReport {
    /// Total rows deleted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.alerts_purged + self.notifications_purged + self.history_purged
    }
}

/// Deletes resolved alerts, notifications and history older than their
/// retention windows. Active alerts are never touched.
///
/// # Errors
///
/// Returns `AlertError::InvalidConfig` if a window reaches past the earliest
/// representable instant, before anything is deleted. Otherwise returns the
/// first store error; earlier deletions stay committed.
pub fn run_maintenance(
    store: &dyn AlertStore,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<MaintenanceReport> {
    let alerts_cutoff = cutoff(now, retention.resolved_alerts(), "resolved_alert_days")?;
    let notifications_cutoff = cutoff(now, retention.notifications(), "notification_days")?;
    let history_cutoff = cutoff(now, retention.history(), "history_days")?;

    let report = MaintenanceReport {
        alerts_purged: store.purge_resolved_alerts(alerts_cutoff)?,
        notifications_purged: store.purge_notifications(notifications_cutoff)?,
        history_purged: store.purge_history(history_cutoff)?,
    };

    info!(
        alerts = report.alerts_purged,
        notifications = report.notifications_purged,
        history = report.history_purged,
        "alert maintenance complete"
    );
    Ok(report)
}

fn cutoff(now: DateTime<Utc>, window: Duration, setting: &str) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(window)
        .ok_or_else(|| AlertError::InvalidConfig {
            reason: format!("retention.{setting} reaches before the earliest supported date"),
        })
}
