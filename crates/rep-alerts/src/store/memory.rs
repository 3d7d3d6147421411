//! In-process store backed by lock-protected tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{AlertStore, TitleFilter};
use crate::error::{AlertError, Result};
use crate::types::{
    ActiveAlert, Alert, AlertHistory, AlertId, AlertThreshold, HistoryId, HistoryQuery,
    Notification, NotificationId, ThresholdId,
};

#[derive(Debug, Default)]
struct Tables {
    thresholds: BTreeMap<ThresholdId, AlertThreshold>,
    alerts: BTreeMap<AlertId, Alert>,
    history: BTreeMap<HistoryId, AlertHistory>,
    notifications: BTreeMap<NotificationId, Notification>,
    next_id: i64,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// An [`AlertStore`] that keeps everything in memory.
///
/// Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertStore for MemoryStore {
    fn list_thresholds(&self) -> Result<Vec<AlertThreshold>> {
        Ok(self.tables.read().thresholds.values().cloned().collect())
    }

    fn get_threshold(&self, id: ThresholdId) -> Result<Option<AlertThreshold>> {
        Ok(self.tables.read().thresholds.get(&id).cloned())
    }

    fn enabled_thresholds_for(
        &self,
        metric_name: &str,
        metric_category: &str,
    ) -> Result<Vec<AlertThreshold>> {
        let tables = self.tables.read();
        Ok(tables
            .thresholds
            .values()
            .filter(|t| t.is_enabled && t.matches(metric_name, metric_category))
            .cloned()
            .collect())
    }

    fn insert_threshold(&self, threshold: &AlertThreshold) -> Result<AlertThreshold> {
        let mut tables = self.tables.write();
        let mut stored = threshold.clone();
        stored.id = tables.allocate_id();
        tables.thresholds.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_threshold(&self, threshold: &AlertThreshold) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.thresholds.get_mut(&threshold.id) {
            Some(existing) => {
                *existing = threshold.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_threshold(&self, id: ThresholdId) -> Result<bool> {
        let mut tables = self.tables.write();
        if !tables.thresholds.contains_key(&id) {
            return Ok(false);
        }

        let alerts = tables
            .alerts
            .values()
            .filter(|a| a.threshold_id == id)
            .count();
        if alerts > 0 {
            return Err(AlertError::ThresholdInUse { id, alerts });
        }

        tables.thresholds.remove(&id);
        Ok(true)
    }

    fn count_alerts_for_threshold(&self, id: ThresholdId) -> Result<usize> {
        let tables = self.tables.read();
        Ok(tables
            .alerts
            .values()
            .filter(|a| a.threshold_id == id)
            .count())
    }

    fn get_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        Ok(self.tables.read().alerts.get(&id).cloned())
    }

    fn active_alert_for_threshold(&self, threshold_id: ThresholdId) -> Result<Option<Alert>> {
        let tables = self.tables.read();
        Ok(tables
            .alerts
            .values()
            .find(|a| a.threshold_id == threshold_id && a.is_active())
            .cloned())
    }

    fn insert_alert(&self, alert: &Alert) -> Result<Alert> {
        let mut tables = self.tables.write();

        if !tables.thresholds.contains_key(&alert.threshold_id) {
            return Err(AlertError::ThresholdNotFound {
                id: alert.threshold_id,
            });
        }

        if alert.is_active()
            && tables
                .alerts
                .values()
                .any(|a| a.threshold_id == alert.threshold_id && a.is_active())
        {
            return Err(AlertError::DuplicateActiveAlert {
                threshold_id: alert.threshold_id,
            });
        }

        let mut stored = alert.clone();
        stored.id = tables.allocate_id();
        tables.alerts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_alert(&self, alert: &Alert) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.alerts.get_mut(&alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn active_alerts(&self) -> Result<Vec<ActiveAlert>> {
        let tables = self.tables.read();
        let mut active: Vec<ActiveAlert> = tables
            .alerts
            .values()
            .filter(|a| a.is_active())
            .filter_map(|alert| {
                tables
                    .thresholds
                    .get(&alert.threshold_id)
                    .map(|threshold| ActiveAlert {
                        alert: alert.clone(),
                        threshold: threshold.clone(),
                    })
            })
            .collect();

        active.sort_by(|a, b| b.alert.triggered_at.cmp(&a.alert.triggered_at));
        Ok(active)
    }

    fn purge_resolved_alerts(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write();
        let doomed: Vec<AlertId> = tables
            .alerts
            .values()
            .filter(|a| a.resolved_at.is_some_and(|resolved| resolved < cutoff))
            .map(|a| a.id)
            .collect();

        for id in &doomed {
            tables.alerts.remove(id);
        }
        for notification in tables.notifications.values_mut() {
            if notification.alert_id.is_some_and(|id| doomed.contains(&id)) {
                notification.alert_id = None;
            }
        }

        debug!(count = doomed.len(), "purged resolved alerts");
        Ok(doomed.len())
    }

    fn insert_history(&self, history: &AlertHistory) -> Result<AlertHistory> {
        let mut tables = self.tables.write();
        let mut stored = history.clone();
        stored.id = tables.allocate_id();
        tables.history.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn get_history(&self, id: HistoryId) -> Result<Option<AlertHistory>> {
        Ok(self.tables.read().history.get(&id).cloned())
    }

    fn query_history(&self, query: &HistoryQuery) -> Result<Vec<AlertHistory>> {
        let tables = self.tables.read();
        let mut rows: Vec<AlertHistory> = tables
            .history
            .values()
            .filter(|h| query.includes(h.triggered_at))
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn purge_history(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write();
        let before = tables.history.len();
        tables.history.retain(|_, h| h.triggered_at >= cutoff);
        Ok(before - tables.history.len())
    }

    fn notification_exists(
        &self,
        alert_id: AlertId,
        user_id: &str,
        filter: TitleFilter<'_>,
    ) -> Result<bool> {
        let tables = self.tables.read();
        Ok(tables.notifications.values().any(|n| {
            n.alert_id == Some(alert_id) && n.user_id == user_id && filter.accepts(&n.title)
        }))
    }

    fn insert_notification(&self, notification: &Notification) -> Result<Notification> {
        let mut tables = self.tables.write();
        let mut stored = notification.clone();
        stored.id = tables.allocate_id();
        tables.notifications.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn notifications_for_user(
        &self,
        user_id: &str,
        include_read: bool,
    ) -> Result<Vec<Notification>> {
        let tables = self.tables.read();
        let mut rows: Vec<Notification> = tables
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && (include_read || !n.is_read))
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn unread_count(&self, user_id: &str) -> Result<usize> {
        let tables = self.tables.read();
        Ok(tables
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count())
    }

    fn mark_notification_read(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.notifications.get_mut(&id) {
            Some(notification) => {
                notification.is_read = true;
                notification.read_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_all_notifications_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write();
        let mut changed = 0;
        for notification in tables
            .notifications
            .values_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            notification.is_read = true;
            notification.read_at = Some(at);
            changed += 1;
        }
        Ok(changed)
    }

    fn purge_notifications(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write();
        let before = tables.notifications.len();
        tables.notifications.retain(|_, n| n.created_at >= cutoff);
        Ok(before - tables.notifications.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[test]
    fn thresholds_crud() {
        conformance::thresholds_crud(&MemoryStore::new());
    }

    #[test]
    fn delete_threshold_in_use() {
        conformance::delete_threshold_in_use(&MemoryStore::new());
    }

    #[test]
    fn single_active_alert_per_threshold() {
        conformance::single_active_alert_per_threshold(&MemoryStore::new());
    }

    #[test]
    fn active_alerts_join_and_order() {
        conformance::active_alerts_join_and_order(&MemoryStore::new());
    }

    #[test]
    fn history_query_filters() {
        conformance::history_query_filters(&MemoryStore::new());
    }

    #[test]
    fn notification_read_surface() {
        conformance::notification_read_surface(&MemoryStore::new());
    }

    #[test]
    fn notification_exists_filters() {
        conformance::notification_exists_filters(&MemoryStore::new());
    }

    #[test]
    fn purge_windows() {
        conformance::purge_windows(&MemoryStore::new());
    }

    #[test]
    fn clones_share_tables() {
        let store = MemoryStore::new();
        let clone = store.clone();
        let threshold = conformance::sample_threshold("cpu", "server");
        store.insert_threshold(&threshold).unwrap();
        assert_eq!(clone.list_thresholds().unwrap().len(), 1);
    }
}
