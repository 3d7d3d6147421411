//! The alerting service facade.
//!
//! [`AlertingService`] bundles the store, evaluator and dispatcher behind the
//! operations an admin surface needs: threshold management, alert
//! acknowledgement and resolution, history queries, the in-app notification
//! inbox and maintenance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::AlertingConfig;
use crate::dispatcher::{DeliveryReport, NotificationDispatcher};
use crate::email::EmailSender;
use crate::error::{AlertError, Result};
use crate::evaluator::{AlertEvaluator, EvaluationResult};
use crate::maintenance::{self, MaintenanceReport};
use crate::metrics::MetricSource;
use crate::recipients::RecipientResolver;
use crate::store::AlertStore;
use crate::types::{
    ActiveAlert, Alert, AlertHistory, AlertId, AlertThreshold, HistoryId, HistoryQuery,
    Notification, NotificationId, ThresholdDraft, ThresholdId,
};

/// Entry point for the alerting system.
///
/// Clones share the same store and evaluator.
#[derive(Debug, Clone)]
pub struct AlertingService {
    store: Arc<dyn AlertStore>,
    evaluator: Arc<AlertEvaluator>,
    config: AlertingConfig,
}

impl AlertingService {
    /// Creates a service over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn AlertStore>,
        recipients: Arc<dyn RecipientResolver>,
        email: Arc<dyn EmailSender>,
        config: AlertingConfig,
    ) -> Self {
        let dispatcher =
            NotificationDispatcher::new(Arc::clone(&store), recipients, email, config.clone());
        let evaluator = Arc::new(AlertEvaluator::new(Arc::clone(&store), dispatcher));
        Self {
            store,
            evaluator,
            config,
        }
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Returns the evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &AlertEvaluator {
        &self.evaluator
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AlertingConfig {
        &self.config
    }

    // ============ Thresholds ============

    /// Returns every threshold.
    pub fn alert_thresholds(&self) -> Result<Vec<AlertThreshold>> {
        self.store.list_thresholds()
    }

    /// Returns one threshold.
    pub fn alert_threshold(&self, id: ThresholdId) -> Result<Option<AlertThreshold>> {
        self.store.get_threshold(id)
    }

    /// Validates and stores a new threshold.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidThreshold` if the draft is invalid.
    pub fn create_alert_threshold(
        &self,
        draft: ThresholdDraft,
        user: &str,
    ) -> Result<AlertThreshold> {
        draft.validate()?;
        let threshold = self
            .store
            .insert_threshold(&AlertThreshold::from_draft(draft, user, Utc::now()))?;

        info!(
            threshold_id = threshold.id,
            metric = %threshold.metric_name,
            category = %threshold.metric_category,
            user = %user,
            "created alert threshold"
        );
        Ok(threshold)
    }

    /// Validates and applies an edit to an existing threshold.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ThresholdNotFound` if it does not exist, or
    /// `AlertError::InvalidThreshold` if the draft is invalid.
    pub fn update_alert_threshold(
        &self,
        id: ThresholdId,
        draft: ThresholdDraft,
        user: &str,
    ) -> Result<AlertThreshold> {
        draft.validate()?;
        let mut threshold = self
            .store
            .get_threshold(id)?
            .ok_or(AlertError::ThresholdNotFound { id })?;

        threshold.apply_draft(draft, user, Utc::now());
        if !self.store.update_threshold(&threshold)? {
            return Err(AlertError::ThresholdNotFound { id });
        }

        info!(threshold_id = id, user = %user, "updated alert threshold");
        Ok(threshold)
    }

    /// Deletes a threshold. Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ThresholdInUse` if alerts reference it; disable it
    /// instead.
    pub fn delete_alert_threshold(&self, id: ThresholdId) -> Result<bool> {
        let deleted = self
            .evaluator
            .with_threshold_lock(id, || self.store.delete_threshold(id))?;
        if deleted {
            self.evaluator.forget_threshold(id);
            info!(threshold_id = id, "deleted alert threshold");
        }
        Ok(deleted)
    }

    // ============ Alerts ============

    /// Returns unresolved alerts with their thresholds, newest first.
    pub fn active_alerts(&self) -> Result<Vec<ActiveAlert>> {
        self.store.active_alerts()
    }

    /// Returns one alert.
    pub fn alert(&self, id: AlertId) -> Result<Option<Alert>> {
        self.store.get_alert(id)
    }

    /// Records an acknowledgement. Returns `false` if the alert does not exist.
    ///
    /// Acknowledged alerts no longer escalate.
    pub fn acknowledge_alert(&self, id: AlertId, by: &str, note: Option<&str>) -> Result<bool> {
        let Some(alert) = self.store.get_alert(id)? else {
            return Ok(false);
        };

        self.evaluator.with_threshold_lock(alert.threshold_id, || {
            let Some(mut alert) = self.store.get_alert(id)? else {
                return Ok(false);
            };
            alert.acknowledge(by, note, Utc::now());
            let updated = self.store.update_alert(&alert)?;
            info!(alert_id = id, by = %by, "alert acknowledged");
            Ok(updated)
        })
    }

    /// Resolves an alert by hand and writes its history row.
    ///
    /// Returns `false` if the alert does not exist or is already resolved.
    pub fn resolve_alert(&self, id: AlertId) -> Result<bool> {
        let Some(alert) = self.store.get_alert(id)? else {
            return Ok(false);
        };

        self.evaluator.with_threshold_lock(alert.threshold_id, || {
            let Some(mut alert) = self.store.get_alert(id)? else {
                return Ok(false);
            };
            if !alert.is_active() {
                return Ok(false);
            }
            let threshold = self
                .store
                .get_threshold(alert.threshold_id)?
                .ok_or(AlertError::ThresholdNotFound {
                    id: alert.threshold_id,
                })?;

            let now = Utc::now();
            alert.resolve(now);
            self.store.update_alert(&alert)?;
            self.store
                .insert_history(&AlertHistory::snapshot(&alert, &threshold, None, now))?;

            info!(alert_id = id, metric = %threshold.metric_name, "alert resolved manually");
            Ok(true)
        })
    }

    /// Sends the alert email for an alert and stamps `email_sent`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the alert does not exist, or
    /// `AlertError::EmailFailed` if delivery fails.
    pub fn send_email_for_alert(&self, id: AlertId) -> Result<DeliveryReport> {
        let alert = self
            .store
            .get_alert(id)?
            .ok_or(AlertError::AlertNotFound { id })?;
        let threshold = self
            .store
            .get_threshold(alert.threshold_id)?
            .ok_or(AlertError::ThresholdNotFound {
                id: alert.threshold_id,
            })?;

        // Delivery runs unlocked; only the email stamp is written back, onto
        // the row as it stands after delivery.
        let report = self
            .evaluator
            .dispatcher()
            .send_email_for_alert(&alert, &threshold)?;

        self.evaluator.with_threshold_lock(alert.threshold_id, || -> Result<()> {
            let Some(mut current) = self.store.get_alert(id)? else {
                return Ok(());
            };
            current.mark_email_sent(Utc::now());
            self.store.update_alert(&current)?;
            Ok(())
        })?;
        Ok(report)
    }

    // ============ History ============

    /// Returns history rows matching `query`, newest first.
    pub fn alert_history(&self, query: &HistoryQuery) -> Result<Vec<AlertHistory>> {
        self.store.query_history(query)
    }

    /// Returns one history row.
    pub fn alert_history_item(&self, id: HistoryId) -> Result<Option<AlertHistory>> {
        self.store.get_history(id)
    }

    // ============ Evaluation ============

    /// See [`AlertEvaluator::evaluate_metric`].
    pub fn evaluate_metric(
        &self,
        metric_name: &str,
        metric_category: &str,
        value: f64,
    ) -> Result<bool> {
        self.evaluator
            .evaluate_metric(metric_name, metric_category, value)
    }

    /// See [`AlertEvaluator::evaluate_metric_at`].
    pub fn evaluate_metric_at(
        &self,
        metric_name: &str,
        metric_category: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<EvaluationResult> {
        self.evaluator
            .evaluate_metric_at(metric_name, metric_category, value, now)
    }

    /// See [`AlertEvaluator::check_all_thresholds`].
    pub fn check_all_thresholds(&self, source: &dyn MetricSource) -> Result<bool> {
        self.evaluator.check_all_thresholds(source)
    }

    /// See [`AlertEvaluator::check_all_thresholds_at`].
    pub fn check_all_thresholds_at(
        &self,
        source: &dyn MetricSource,
        now: DateTime<Utc>,
    ) -> Result<EvaluationResult> {
        self.evaluator.check_all_thresholds_at(source, now)
    }

    // ============ Notifications ============

    /// Returns a user's notifications, newest first.
    pub fn notifications_for_user(
        &self,
        user_id: &str,
        include_read: bool,
    ) -> Result<Vec<Notification>> {
        self.store.notifications_for_user(user_id, include_read)
    }

    /// Counts a user's unread notifications.
    pub fn unread_notification_count(&self, user_id: &str) -> Result<usize> {
        self.store.unread_count(user_id)
    }

    /// Marks one notification read. Returns `false` if it does not exist.
    pub fn mark_notification_as_read(&self, id: NotificationId) -> Result<bool> {
        self.store.mark_notification_read(id, Utc::now())
    }

    /// Marks all of a user's notifications read. Returns `false` if none
    /// were unread.
    pub fn mark_all_notifications_as_read(&self, user_id: &str) -> Result<bool> {
        let changed = self.store.mark_all_notifications_read(user_id, Utc::now())?;
        Ok(changed > 0)
    }

    // ============ Maintenance ============

    /// Purges records past their retention windows.
    pub fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.run_maintenance_at(Utc::now())
    }

    /// Purges records past their retention windows as of `now`.
    pub fn run_maintenance_at(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        maintenance::run_maintenance(self.store.as_ref(), &self.config.retention, now).inspect_err(
            |e| warn!(error = %e, "alert maintenance failed"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecipientsConfig;
    use crate::email::OutboxEmailSender;
    use crate::recipients::StaticRecipients;
    use crate::store::MemoryStore;
    use crate::types::{AlertSeverity, ThresholdDirection};

    fn service() -> (AlertingService, Arc<OutboxEmailSender>) {
        let outbox = Arc::new(OutboxEmailSender::new());
        let recipients = StaticRecipients::new(RecipientsConfig {
            alert_users: vec!["admin".to_string()],
            alert_emails: vec!["admin@example.com".to_string()],
            ..RecipientsConfig::default()
        });
        let service = AlertingService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(recipients),
            outbox.clone(),
            AlertingConfig::default(),
        );
        (service, outbox)
    }

    fn cpu_draft() -> ThresholdDraft {
        ThresholdDraft::builder("cpu", "server")
            .warning(70.0)
            .critical(90.0)
            .direction(ThresholdDirection::Above)
            .build()
            .unwrap()
    }

    mod threshold_tests {
        use super::*;

        #[test]
        fn create_stamps_audit_fields() {
            let (service, _) = service();
            let threshold = service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            assert!(threshold.id > 0);
            assert_eq!(threshold.created_by, "alice");
            assert_eq!(threshold.updated_by, "alice");
            assert_eq!(service.alert_thresholds().unwrap().len(), 1);
        }

        #[test]
        fn create_rejects_invalid_draft() {
            let (service, _) = service();
            let mut draft = cpu_draft();
            draft.metric_name = String::new();
            let err = service.create_alert_threshold(draft, "alice").unwrap_err();
            assert!(matches!(err, AlertError::InvalidThreshold { .. }));
        }

        #[test]
        fn update_keeps_creation_audit() {
            let (service, _) = service();
            let created = service.create_alert_threshold(cpu_draft(), "alice").unwrap();

            let mut draft = cpu_draft();
            draft.warning_threshold = 60.0;
            let updated = service
                .update_alert_threshold(created.id, draft, "bob")
                .unwrap();

            assert_eq!(updated.created_by, "alice");
            assert_eq!(updated.updated_by, "bob");
            let stored = service.alert_threshold(created.id).unwrap().unwrap();
            assert!((stored.warning_threshold - 60.0).abs() < f64::EPSILON);
        }

        #[test]
        fn update_missing_threshold_fails() {
            let (service, _) = service();
            let err = service
                .update_alert_threshold(42, cpu_draft(), "bob")
                .unwrap_err();
            assert!(matches!(err, AlertError::ThresholdNotFound { id: 42 }));
        }

        #[test]
        fn delete_refuses_referenced_threshold() {
            let (service, _) = service();
            let threshold = service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 95.0).unwrap();

            let err = service.delete_alert_threshold(threshold.id).unwrap_err();
            assert!(matches!(err, AlertError::ThresholdInUse { .. }));
            assert!(!service.delete_alert_threshold(999).unwrap());
        }

        #[test]
        fn delete_unreferenced_threshold() {
            let (service, _) = service();
            let threshold = service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            assert!(service.delete_alert_threshold(threshold.id).unwrap());
            assert!(service.alert_threshold(threshold.id).unwrap().is_none());
        }

        #[test]
        fn delete_releases_threshold_lock() {
            let (service, _) = service();
            let threshold = service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 50.0).unwrap();
            assert_eq!(service.evaluator().tracked_thresholds(), 1);

            assert!(service.delete_alert_threshold(threshold.id).unwrap());
            assert_eq!(service.evaluator().tracked_thresholds(), 0);
        }
    }

    mod alert_tests {
        use super::*;
        use std::sync::OnceLock;

        /// Feeds a clearing sample back into the service while an email is
        /// being delivered.
        #[derive(Debug, Default)]
        struct ClearingSender {
            service: OnceLock<AlertingService>,
        }

        impl EmailSender for ClearingSender {
            fn send_email(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<()> {
                if let Some(service) = self.service.get() {
                    service.evaluate_metric("cpu", "server", 50.0)?;
                }
                Ok(())
            }
        }

        #[test]
        fn manual_email_keeps_concurrent_resolution() {
            let sender = Arc::new(ClearingSender::default());
            let service = AlertingService::new(
                Arc::new(MemoryStore::new()),
                Arc::new(StaticRecipients::single("admin", "admin@example.com")),
                sender.clone(),
                AlertingConfig::default(),
            );
            sender.service.set(service.clone()).unwrap();

            service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 95.0).unwrap();
            let id = service.active_alerts().unwrap()[0].alert.id;

            service.send_email_for_alert(id).unwrap();

            let alert = service.alert(id).unwrap().unwrap();
            assert!(alert.resolved_at.is_some());
            assert!(alert.email_sent);
            assert!(service.active_alerts().unwrap().is_empty());
            assert_eq!(service.alert_history(&HistoryQuery::all()).unwrap().len(), 1);

            service.evaluate_metric("cpu", "server", 40.0).unwrap();
            assert_eq!(service.alert_history(&HistoryQuery::all()).unwrap().len(), 1);
        }

        #[test]
        fn acknowledge_records_operator() {
            let (service, _) = service();
            service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 95.0).unwrap();
            let active = service.active_alerts().unwrap();
            let id = active[0].alert.id;

            assert!(service.acknowledge_alert(id, "bob", Some("on it")).unwrap());
            let alert = service.alert(id).unwrap().unwrap();
            assert!(alert.is_acknowledged);
            assert_eq!(alert.acknowledged_by.as_deref(), Some("bob"));
            assert_eq!(alert.acknowledgement_note.as_deref(), Some("on it"));

            assert!(!service.acknowledge_alert(999, "bob", None).unwrap());
        }

        #[test]
        fn manual_resolve_writes_history_without_resolved_value() {
            let (service, _) = service();
            service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 95.0).unwrap();
            let id = service.active_alerts().unwrap()[0].alert.id;

            assert!(service.resolve_alert(id).unwrap());
            assert!(!service.resolve_alert(id).unwrap());
            assert!(service.active_alerts().unwrap().is_empty());

            let history = service.alert_history(&HistoryQuery::all()).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].resolved_value, None);
            assert_eq!(history[0].severity, AlertSeverity::Critical);
            assert_eq!(
                service.alert_history_item(history[0].id).unwrap(),
                Some(history[0].clone())
            );
        }

        #[test]
        fn send_email_for_alert_stamps_flag() {
            let (service, outbox) = service();
            service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 95.0).unwrap();
            let id = service.active_alerts().unwrap()[0].alert.id;
            assert!(outbox.is_empty());

            let report = service.send_email_for_alert(id).unwrap();
            assert_eq!(report.delivered, 1);
            assert!(service.alert(id).unwrap().unwrap().email_sent);

            let err = service.send_email_for_alert(999).unwrap_err();
            assert!(matches!(err, AlertError::AlertNotFound { id: 999 }));
        }
    }

    mod notification_tests {
        use super::*;

        #[test]
        fn inbox_read_surface() {
            let (service, _) = service();
            service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 95.0).unwrap();

            assert_eq!(service.unread_notification_count("admin").unwrap(), 1);
            let inbox = service.notifications_for_user("admin", false).unwrap();
            assert_eq!(inbox[0].title, "Critical Alert: cpu");

            assert!(service.mark_notification_as_read(inbox[0].id).unwrap());
            assert_eq!(service.unread_notification_count("admin").unwrap(), 0);
            assert!(!service.mark_all_notifications_as_read("admin").unwrap());
        }

        #[test]
        fn mark_all_reports_change() {
            let (service, _) = service();
            service.create_alert_threshold(cpu_draft(), "alice").unwrap();
            service.evaluate_metric("cpu", "server", 95.0).unwrap();
            assert!(service.mark_all_notifications_as_read("admin").unwrap());
        }
    }
}
