//! Durable storage for thresholds, alerts, history and notifications.
//!
//! The [`AlertStore`] trait is the seam between the evaluator and whatever
//! relational backend holds the data. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: lock-protected in-process tables, used by tests and
//!   single-process deployments that do not need durability
//! - [`SqliteStore`]: a `rusqlite` database with schema migrations
//!
//! Each method is its own implicit transaction; no call spans several steps.

mod memory;
mod schema;
mod sqlite;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ActiveAlert, Alert, AlertHistory, AlertId, AlertThreshold, HistoryId, HistoryQuery,
    Notification, NotificationId, ThresholdId,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage backend for the alerting system.
///
/// Lookups of unknown ids return `Ok(None)` / `Ok(false)`; only backend
/// failures are reported as errors.
pub trait AlertStore: Send + Sync + fmt::Debug {
    // ============ Thresholds ============

    /// Returns every threshold, ordered by id.
    fn list_thresholds(&self) -> Result<Vec<AlertThreshold>>;

    /// Returns one threshold.
    fn get_threshold(&self, id: ThresholdId) -> Result<Option<AlertThreshold>>;

    /// Returns enabled thresholds watching `(metric_name, metric_category)`.
    fn enabled_thresholds_for(
        &self,
        metric_name: &str,
        metric_category: &str,
    ) -> Result<Vec<AlertThreshold>>;

    /// Inserts a threshold and returns it with its assigned id.
    fn insert_threshold(&self, threshold: &AlertThreshold) -> Result<AlertThreshold>;

    /// Replaces a stored threshold. Returns `false` if it does not exist.
    fn update_threshold(&self, threshold: &AlertThreshold) -> Result<bool>;

    /// Deletes a threshold. Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ThresholdInUse` if any alert references it.
    fn delete_threshold(&self, id: ThresholdId) -> Result<bool>;

    /// Counts alerts (active or closed) referencing a threshold.
    fn count_alerts_for_threshold(&self, id: ThresholdId) -> Result<usize>;

    // ============ Alerts ============

    /// Returns one alert.
    fn get_alert(&self, id: AlertId) -> Result<Option<Alert>>;

    /// Returns the unresolved alert of a threshold, if any.
    fn active_alert_for_threshold(&self, threshold_id: ThresholdId) -> Result<Option<Alert>>;

    /// Inserts an alert and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DuplicateActiveAlert` if the alert is unresolved
    /// and the threshold already has an unresolved alert.
    fn insert_alert(&self, alert: &Alert) -> Result<Alert>;

    /// Replaces a stored alert. Returns `false` if it does not exist.
    fn update_alert(&self, alert: &Alert) -> Result<bool>;

    /// Returns unresolved alerts joined with their thresholds, newest first.
    fn active_alerts(&self) -> Result<Vec<ActiveAlert>>;

    /// Deletes alerts resolved before `cutoff`. Notifications pointing at them
    /// keep existing with their alert link cleared.
    fn purge_resolved_alerts(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // ============ History ============

    /// Appends a history row and returns it with its assigned id.
    fn insert_history(&self, history: &AlertHistory) -> Result<AlertHistory>;

    /// Returns one history row.
    fn get_history(&self, id: HistoryId) -> Result<Option<AlertHistory>>;

    /// Returns history rows matching the query, newest trigger first.
    fn query_history(&self, query: &HistoryQuery) -> Result<Vec<AlertHistory>>;

    /// Deletes history rows triggered before `cutoff`.
    fn purge_history(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // ============ Notifications ============

    /// Returns true if `user_id` already has a notification for `alert_id`
    /// whose title passes `filter`.
    fn notification_exists(
        &self,
        alert_id: AlertId,
        user_id: &str,
        filter: TitleFilter<'_>,
    ) -> Result<bool>;

    /// Inserts a notification and returns it with its assigned id.
    fn insert_notification(&self, notification: &Notification) -> Result<Notification>;

    /// Returns a user's notifications, newest first.
    fn notifications_for_user(&self, user_id: &str, include_read: bool)
    -> Result<Vec<Notification>>;

    /// Counts a user's unread notifications.
    fn unread_count(&self, user_id: &str) -> Result<usize>;

    /// Marks one notification read. Returns `false` if it does not exist.
    fn mark_notification_read(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool>;

    /// Marks every unread notification of a user read; returns how many changed.
    fn mark_all_notifications_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<usize>;

    /// Deletes notifications created before `cutoff`.
    fn purge_notifications(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Title filter for [`AlertStore::notification_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleFilter<'a> {
    /// Only titles starting with the prefix.
    StartsWith(&'a str),
    /// Only titles not starting with the prefix.
    NotStartingWith(&'a str),
}

impl TitleFilter<'_> {
    /// Returns true if `title` passes the filter.
    #[must_use]
    pub fn accepts(&self, title: &str) -> bool {
        match self {
            Self::StartsWith(prefix) => title.starts_with(prefix),
            Self::NotStartingWith(prefix) => !title.starts_with(prefix),
        }
    }
}

#[cfg(test)]
pub(crate) mod conformance;
