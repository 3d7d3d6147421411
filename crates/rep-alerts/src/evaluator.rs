//! Threshold evaluation.
//!
//! This module provides the [`AlertEvaluator`], which takes one metric sample
//! and drives every enabled matching threshold through its alert lifecycle:
//! - open an alert on a fresh breach
//! - upgrade a warning alert when the critical boundary is crossed
//! - refresh the value and escalate an unacknowledged alert
//! - resolve the alert and snapshot it into history when the breach clears
//!
//! The evaluator holds no alert state of its own. Each threshold is processed
//! under an in-process lock so concurrent samples for the same threshold
//! cannot interleave their read-evaluate-write sequences.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatcher::NotificationDispatcher;
use crate::error::{AlertError, Result};
use crate::metrics::MetricSource;
use crate::store::AlertStore;
use crate::types::{
    Alert, AlertHistory, AlertId, AlertSeverity, AlertThreshold, ThresholdId,
};

/// The result of evaluating one or more samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Number of thresholds evaluated.
    pub thresholds_evaluated: usize,
    /// Number of thresholds whose processing failed.
    pub thresholds_errored: usize,
    /// Alerts that were opened.
    pub alerts_opened: Vec<AlertId>,
    /// Warning alerts raised to critical.
    pub alerts_upgraded: Vec<AlertId>,
    /// Alerts that escalated.
    pub alerts_escalated: Vec<AlertId>,
    /// Alerts that were resolved.
    pub alerts_resolved: Vec<AlertId>,
    /// Active alerts whose value was refreshed without other change.
    pub alerts_refreshed: usize,
    /// In-app notifications created.
    pub notifications_sent: usize,
    /// Emails delivered.
    pub emails_sent: usize,
    /// Dispatch calls that failed.
    pub delivery_failures: usize,
}

impl EvaluationResult {
    /// Returns true if any alert was opened, upgraded, escalated or resolved.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.alerts_opened.is_empty()
            || !self.alerts_upgraded.is_empty()
            || !self.alerts_escalated.is_empty()
            || !self.alerts_resolved.is_empty()
    }

    /// Folds another result into this one.
    pub fn merge(&mut self, other: Self) {
        self.thresholds_evaluated += other.thresholds_evaluated;
        self.thresholds_errored += other.thresholds_errored;
        self.alerts_opened.extend(other.alerts_opened);
        self.alerts_upgraded.extend(other.alerts_upgraded);
        self.alerts_escalated.extend(other.alerts_escalated);
        self.alerts_resolved.extend(other.alerts_resolved);
        self.alerts_refreshed += other.alerts_refreshed;
        self.notifications_sent += other.notifications_sent;
        self.emails_sent += other.emails_sent;
        self.delivery_failures += other.delivery_failures;
    }
}

/// Evaluates metric samples against stored thresholds.
#[derive(Debug)]
pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    dispatcher: NotificationDispatcher,
    locks: Mutex<HashMap<ThresholdId, Arc<Mutex<()>>>>,
}

impl AlertEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new(store: Arc<dyn AlertStore>, dispatcher: NotificationDispatcher) -> Self {
        Self {
            store,
            dispatcher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    fn threshold_lock(&self, id: ThresholdId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }

    /// Runs `f` while holding the lock of threshold `id`.
    pub(crate) fn with_threshold_lock<T>(&self, id: ThresholdId, f: impl FnOnce() -> T) -> T {
        let lock = self.threshold_lock(id);
        let _guard = lock.lock();
        f()
    }

    /// Drops the lock entry of a deleted threshold.
    pub(crate) fn forget_threshold(&self, id: ThresholdId) {
        self.locks.lock().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn tracked_thresholds(&self) -> usize {
        self.locks.lock().len()
    }

    /// Evaluates one sample at the current time.
    ///
    /// Returns true if any alert was opened, upgraded, escalated or resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the matching thresholds cannot be loaded.
    pub fn evaluate_metric(
        &self,
        metric_name: &str,
        metric_category: &str,
        value: f64,
    ) -> Result<bool> {
        self.evaluate_metric_at(metric_name, metric_category, value, Utc::now())
            .map(|result| result.changed())
    }

    /// Evaluates one sample as if observed at `now`.
    ///
    /// A failure while processing one threshold is logged and counted; the
    /// remaining thresholds are still evaluated. A non-finite value is
    /// ignored and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the matching thresholds cannot be loaded.
    pub fn evaluate_metric_at(
        &self,
        metric_name: &str,
        metric_category: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<EvaluationResult> {
        let mut result = EvaluationResult::default();
        if !value.is_finite() {
            warn!(
                metric = %metric_name,
                category = %metric_category,
                value,
                "ignoring non-finite metric value"
            );
            return Ok(result);
        }

        let thresholds = self
            .store
            .enabled_thresholds_for(metric_name, metric_category)?;

        if thresholds.is_empty() {
            debug!(
                metric = %metric_name,
                category = %metric_category,
                "no enabled threshold for metric"
            );
            return Ok(result);
        }

        for threshold in &thresholds {
            result.thresholds_evaluated += 1;

            let lock = self.threshold_lock(threshold.id);
            let _guard = lock.lock();

            match self.evaluate_threshold(threshold, value, now, &mut result) {
                Ok(()) => {}
                Err(AlertError::DuplicateActiveAlert { threshold_id }) => {
                    debug!(
                        threshold_id,
                        metric = %metric_name,
                        "active alert created concurrently, skipping"
                    );
                }
                Err(e) => {
                    result.thresholds_errored += 1;
                    warn!(
                        threshold_id = threshold.id,
                        metric = %metric_name,
                        category = %metric_category,
                        error = %e,
                        "failed to evaluate threshold"
                    );
                }
            }
        }

        debug!(
            metric = %metric_name,
            value,
            thresholds = result.thresholds_evaluated,
            changed = result.changed(),
            "evaluation complete"
        );

        Ok(result)
    }

    /// Collects samples from `source` and evaluates each at the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or thresholds cannot be loaded.
    pub fn check_all_thresholds(&self, source: &dyn MetricSource) -> Result<bool> {
        self.check_all_thresholds_at(source, Utc::now())
            .map(|result| result.changed())
    }

    /// Collects samples from `source` and evaluates each as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or thresholds cannot be loaded.
    pub fn check_all_thresholds_at(
        &self,
        source: &dyn MetricSource,
        now: DateTime<Utc>,
    ) -> Result<EvaluationResult> {
        let samples = source.collect()?;
        let mut result = EvaluationResult::default();

        for sample in &samples {
            result.merge(self.evaluate_metric_at(
                &sample.metric_name,
                &sample.metric_category,
                sample.value,
                now,
            )?);
        }

        info!(
            samples = samples.len(),
            opened = result.alerts_opened.len(),
            resolved = result.alerts_resolved.len(),
            escalated = result.alerts_escalated.len(),
            "threshold check complete"
        );
        Ok(result)
    }

    fn evaluate_threshold(
        &self,
        threshold: &AlertThreshold,
        value: f64,
        now: DateTime<Utc>,
        result: &mut EvaluationResult,
    ) -> Result<()> {
        let active = self.store.active_alert_for_threshold(threshold.id)?;

        match (threshold.classify(value), active) {
            (None, None) => Ok(()),
            (None, Some(alert)) => self.resolve(threshold, alert, value, now, result),
            (Some(severity), None) => self.open(threshold, severity, value, now, result),
            (Some(AlertSeverity::Critical), Some(alert))
                if alert.severity == AlertSeverity::Warning =>
            {
                self.upgrade(threshold, alert, value, now, result)
            }
            (Some(_), Some(alert)) => self.refresh(threshold, alert, value, now, result),
        }
    }

    fn open(
        &self,
        threshold: &AlertThreshold,
        severity: AlertSeverity,
        value: f64,
        now: DateTime<Utc>,
        result: &mut EvaluationResult,
    ) -> Result<()> {
        let mut alert = self
            .store
            .insert_alert(&Alert::open(threshold, severity, value, now))?;

        info!(
            alert_id = alert.id,
            threshold_id = threshold.id,
            metric = %threshold.metric_name,
            severity = %severity,
            value,
            "alert opened"
        );

        if self.deliver_pending(&mut alert, threshold, now, result) {
            self.store.update_alert(&alert)?;
        }
        result.alerts_opened.push(alert.id);
        Ok(())
    }

    fn upgrade(
        &self,
        threshold: &AlertThreshold,
        mut alert: Alert,
        value: f64,
        now: DateTime<Utc>,
        result: &mut EvaluationResult,
    ) -> Result<()> {
        alert.upgrade_to_critical(threshold, value);
        self.deliver_pending(&mut alert, threshold, now, result);
        self.store.update_alert(&alert)?;

        warn!(
            alert_id = alert.id,
            metric = %threshold.metric_name,
            value,
            "alert upgraded to critical"
        );
        result.alerts_upgraded.push(alert.id);
        Ok(())
    }

    fn refresh(
        &self,
        threshold: &AlertThreshold,
        mut alert: Alert,
        value: f64,
        now: DateTime<Utc>,
        result: &mut EvaluationResult,
    ) -> Result<()> {
        alert.current_value = value;
        self.deliver_pending(&mut alert, threshold, now, result);

        let escalated = alert.escalation_due(threshold.escalation_minutes, now);
        if escalated {
            alert.escalate(now);
            self.deliver_escalation(&alert, threshold, now, result);
        }

        self.store.update_alert(&alert)?;

        if escalated {
            warn!(
                alert_id = alert.id,
                metric = %threshold.metric_name,
                minutes = threshold.escalation_minutes.unwrap_or_default(),
                "alert escalated"
            );
            result.alerts_escalated.push(alert.id);
        } else {
            debug!(alert_id = alert.id, value, "alert value refreshed");
            result.alerts_refreshed += 1;
        }
        Ok(())
    }

    fn resolve(
        &self,
        threshold: &AlertThreshold,
        mut alert: Alert,
        value: f64,
        now: DateTime<Utc>,
        result: &mut EvaluationResult,
    ) -> Result<()> {
        alert.resolve(now);
        self.store.update_alert(&alert)?;
        self.store
            .insert_history(&AlertHistory::snapshot(&alert, threshold, Some(value), now))?;

        info!(
            alert_id = alert.id,
            metric = %threshold.metric_name,
            value,
            "alert resolved"
        );
        result.alerts_resolved.push(alert.id);
        Ok(())
    }

    /// Sends whichever enabled initial deliveries have not succeeded yet.
    ///
    /// Returns true if a `*_sent` flag was stamped.
    fn deliver_pending(
        &self,
        alert: &mut Alert,
        threshold: &AlertThreshold,
        now: DateTime<Utc>,
        result: &mut EvaluationResult,
    ) -> bool {
        let mut stamped = false;

        if threshold.notification_enabled && !alert.notification_sent {
            match self
                .dispatcher
                .create_alert_notifications(alert, threshold, now)
            {
                Ok(report) => {
                    alert.mark_notification_sent(now);
                    result.notifications_sent += report.delivered;
                    stamped = true;
                }
                Err(e) => {
                    result.delivery_failures += 1;
                    warn!(alert_id = alert.id, error = %e, "alert notifications failed");
                }
            }
        }

        if threshold.email_enabled && !alert.email_sent {
            match self.dispatcher.send_email_for_alert(alert, threshold) {
                Ok(report) => {
                    alert.mark_email_sent(now);
                    result.emails_sent += report.delivered;
                    stamped = true;
                }
                Err(e) => {
                    result.delivery_failures += 1;
                    warn!(alert_id = alert.id, error = %e, "alert email failed");
                }
            }
        }

        stamped
    }

    fn deliver_escalation(
        &self,
        alert: &Alert,
        threshold: &AlertThreshold,
        now: DateTime<Utc>,
        result: &mut EvaluationResult,
    ) {
        if threshold.notification_enabled {
            match self
                .dispatcher
                .create_escalation_notifications(alert, threshold, now)
            {
                Ok(report) => result.notifications_sent += report.delivered,
                Err(e) => {
                    result.delivery_failures += 1;
                    warn!(alert_id = alert.id, error = %e, "escalation notifications failed");
                }
            }
        }

        if threshold.email_enabled {
            match self
                .dispatcher
                .send_escalation_email_for_alert(alert, threshold, now)
            {
                Ok(report) => result.emails_sent += report.delivered,
                Err(e) => {
                    result.delivery_failures += 1;
                    warn!(alert_id = alert.id, error = %e, "escalation email failed");
                }
            }
        }
    }
}
