//! Notification dispatch.
//!
//! The dispatcher turns an alert into per-recipient in-app notifications and
//! transactional email. It never touches the alert itself; the evaluator
//! stamps `notification_sent` / `email_sent` from the returned report.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AlertingConfig;
use crate::email::{self, ESCALATION_PREFIX, EmailSender};
use crate::error::{AlertError, Result};
use crate::recipients::RecipientResolver;
use crate::store::{AlertStore, TitleFilter};
use crate::types::{Alert, AlertThreshold, Notification, NotificationKind};

/// Outcome of one dispatch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Notifications created or emails sent.
    pub delivered: usize,
    /// Recipients skipped because they were already notified.
    pub skipped: usize,
}

/// Title of the in-app notification for a new or upgraded alert.
#[must_use]
pub fn alert_title(alert: &Alert, threshold: &AlertThreshold) -> String {
    format!("{} Alert: {}", alert.severity.label(), threshold.metric_name)
}

/// Body of the in-app notification for a new or upgraded alert.
#[must_use]
pub fn alert_message(alert: &Alert, threshold: &AlertThreshold) -> String {
    format!(
        "Metric {} value {} has breached the {} threshold.",
        threshold.metric_name, alert.current_value, alert.severity
    )
}

/// Title of the in-app escalation notification.
#[must_use]
pub fn escalation_title(alert: &Alert, threshold: &AlertThreshold) -> String {
    format!("{ESCALATION_PREFIX}{}", alert_title(alert, threshold))
}

/// Body of the in-app escalation notification.
#[must_use]
pub fn escalation_message(alert: &Alert, threshold: &AlertThreshold) -> String {
    format!(
        "Escalated alert for {}. Value {} has been in alert state for over {} minutes without acknowledgement.",
        threshold.metric_name,
        alert.current_value,
        threshold.escalation_minutes.unwrap_or_default()
    )
}

fn notification_error(err: &AlertError) -> AlertError {
    AlertError::NotificationFailed {
        reason: err.to_string(),
    }
}

/// Creates notifications and sends email for alerts.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn AlertStore>,
    recipients: Arc<dyn RecipientResolver>,
    email: Arc<dyn EmailSender>,
    config: AlertingConfig,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn AlertStore>,
        recipients: Arc<dyn RecipientResolver>,
        email: Arc<dyn EmailSender>,
        config: AlertingConfig,
    ) -> Self {
        Self {
            store,
            recipients,
            email,
            config,
        }
    }

    /// Returns the configuration used for links.
    #[must_use]
    pub const fn config(&self) -> &AlertingConfig {
        &self.config
    }

    /// Creates one alert notification per alert user.
    ///
    /// Users who already have a non-escalation notification for this alert
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` if recipients cannot be
    /// resolved or a notification cannot be stored.
    pub fn create_alert_notifications(
        &self,
        alert: &Alert,
        threshold: &AlertThreshold,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let users = self
            .recipients
            .alert_users()
            .map_err(|e| notification_error(&e))?;
        let title = alert_title(alert, threshold);
        let message = alert_message(alert, threshold);

        let report = self.notify_users(
            &users,
            alert,
            TitleFilter::NotStartingWith(ESCALATION_PREFIX),
            |user| {
                Notification::new(user, &title, &message, alert.severity.into(), now)
                    .with_alert(alert.id)
                    .with_url(self.config.notification_url(alert.id))
            },
        )?;

        info!(
            alert_id = alert.id,
            metric = %threshold.metric_name,
            delivered = report.delivered,
            skipped = report.skipped,
            "alert notifications created"
        );
        Ok(report)
    }

    /// Creates one escalation notification per escalation user.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` if recipients cannot be
    /// resolved or a notification cannot be stored.
    pub fn create_escalation_notifications(
        &self,
        alert: &Alert,
        threshold: &AlertThreshold,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let users = self
            .recipients
            .escalation_users()
            .map_err(|e| notification_error(&e))?;
        let title = escalation_title(alert, threshold);
        let message = escalation_message(alert, threshold);

        let report = self.notify_users(
            &users,
            alert,
            TitleFilter::StartsWith(ESCALATION_PREFIX),
            |user| {
                Notification::new(user, &title, &message, NotificationKind::Critical, now)
                    .with_alert(alert.id)
                    .with_url(self.config.notification_url(alert.id))
            },
        )?;

        warn!(
            alert_id = alert.id,
            metric = %threshold.metric_name,
            delivered = report.delivered,
            "escalation notifications created"
        );
        Ok(report)
    }

    fn notify_users<F>(
        &self,
        users: &[String],
        alert: &Alert,
        filter: TitleFilter<'_>,
        build: F,
    ) -> Result<DeliveryReport>
    where
        F: Fn(&str) -> Notification,
    {
        let mut report = DeliveryReport::default();
        for user in users {
            let exists = self
                .store
                .notification_exists(alert.id, user, filter)
                .map_err(|e| notification_error(&e))?;
            if exists {
                debug!(alert_id = alert.id, user = %user, "already notified");
                report.skipped += 1;
                continue;
            }

            self.store
                .insert_notification(&build(user))
                .map_err(|e| notification_error(&e))?;
            report.delivered += 1;
        }
        Ok(report)
    }

    /// Sends the alert email to every alert address.
    ///
    /// Every address is attempted; the first failure is returned after the
    /// rest have been tried.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::EmailFailed` if any delivery fails.
    pub fn send_email_for_alert(
        &self,
        alert: &Alert,
        threshold: &AlertThreshold,
    ) -> Result<DeliveryReport> {
        let addresses = self.recipients.alert_emails().map_err(|e| AlertError::EmailFailed {
            recipient: "<alert recipients>".to_string(),
            reason: e.to_string(),
        })?;
        let composed =
            email::compose_alert_email(alert, threshold, &self.config.dashboard_alerts_url());

        let report = self.deliver(&addresses, &composed)?;
        info!(
            alert_id = alert.id,
            metric = %threshold.metric_name,
            recipients = report.delivered,
            "alert email sent"
        );
        Ok(report)
    }

    /// Sends the escalation email to every escalation address.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::EmailFailed` if any delivery fails.
    pub fn send_escalation_email_for_alert(
        &self,
        alert: &Alert,
        threshold: &AlertThreshold,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let addresses =
            self.recipients
                .escalation_emails()
                .map_err(|e| AlertError::EmailFailed {
                    recipient: "<escalation recipients>".to_string(),
                    reason: e.to_string(),
                })?;
        let composed = email::compose_escalation_email(
            alert,
            threshold,
            &self.config.dashboard_alerts_url(),
            now,
        );

        let report = self.deliver(&addresses, &composed)?;
        warn!(
            alert_id = alert.id,
            metric = %threshold.metric_name,
            minutes = threshold.escalation_minutes.unwrap_or_default(),
            recipients = report.delivered,
            "escalation email sent"
        );
        Ok(report)
    }

    fn deliver(&self, addresses: &[String], composed: &email::ComposedEmail) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        let mut first_error = None;

        for address in addresses {
            match self
                .email
                .send_email(address, &composed.subject, &composed.html_body)
            {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(to = %address, error = %err, "email delivery failed");
                    if first_error.is_none() {
                        first_error = Some(match err {
                            AlertError::EmailFailed { .. } => err,
                            other => AlertError::EmailFailed {
                                recipient: address.clone(),
                                reason: other.to_string(),
                            },
                        });
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecipientsConfig;
    use crate::email::OutboxEmailSender;
    use crate::recipients::StaticRecipients;
    use crate::store::MemoryStore;
    use crate::types::{AlertSeverity, ThresholdDirection, ThresholdDraft};
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        outbox: Arc<OutboxEmailSender>,
        dispatcher: NotificationDispatcher,
        threshold: AlertThreshold,
        alert: Alert,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let outbox = Arc::new(OutboxEmailSender::new());
        let recipients = StaticRecipients::new(RecipientsConfig {
            alert_users: vec!["alice".to_string(), "bob".to_string()],
            escalation_users: vec!["oncall".to_string()],
            alert_emails: vec!["admin@example.com".to_string()],
            escalation_emails: vec![
                "operations@example.com".to_string(),
                "manager@example.com".to_string(),
            ],
        });
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            Arc::new(recipients),
            outbox.clone(),
            AlertingConfig::default(),
        );

        let draft = ThresholdDraft::builder("cpu", "server")
            .warning(70.0)
            .critical(90.0)
            .direction(ThresholdDirection::Above)
            .escalate_after_minutes(10)
            .build()
            .unwrap();
        let threshold = store
            .insert_threshold(&AlertThreshold::from_draft(draft, "admin", at(0)))
            .unwrap();
        let alert = store
            .insert_alert(&Alert::open(&threshold, AlertSeverity::Critical, 95.0, at(0)))
            .unwrap();

        Fixture {
            store,
            outbox,
            dispatcher,
            threshold,
            alert,
        }
    }

    mod text_tests {
        use super::*;

        #[test]
        fn alert_texts() {
            let f = fixture();
            assert_eq!(alert_title(&f.alert, &f.threshold), "Critical Alert: cpu");
            assert_eq!(
                alert_message(&f.alert, &f.threshold),
                "Metric cpu value 95 has breached the critical threshold."
            );
        }

        #[test]
        fn escalation_texts() {
            let f = fixture();
            assert_eq!(
                escalation_title(&f.alert, &f.threshold),
                "ESCALATED: Critical Alert: cpu"
            );
            assert_eq!(
                escalation_message(&f.alert, &f.threshold),
                "Escalated alert for cpu. Value 95 has been in alert state for over 10 minutes without acknowledgement."
            );
        }
    }

    mod notification_tests {
        use super::*;

        #[test]
        fn one_notification_per_user() {
            let f = fixture();
            let report = f
                .dispatcher
                .create_alert_notifications(&f.alert, &f.threshold, at(0))
                .unwrap();
            assert_eq!(report.delivered, 2);

            let alice = f.store.notifications_for_user("alice", true).unwrap();
            assert_eq!(alice.len(), 1);
            assert_eq!(alice[0].kind, NotificationKind::Critical);
            assert_eq!(alice[0].alert_id, Some(f.alert.id));
            assert_eq!(
                alice[0].url.as_deref(),
                Some(format!("/Admin/Alerts/Details/{}", f.alert.id).as_str())
            );
        }

        #[test]
        fn repeated_calls_do_not_duplicate() {
            let f = fixture();
            f.dispatcher
                .create_alert_notifications(&f.alert, &f.threshold, at(0))
                .unwrap();
            let again = f
                .dispatcher
                .create_alert_notifications(&f.alert, &f.threshold, at(1))
                .unwrap();

            assert_eq!(again.delivered, 0);
            assert_eq!(again.skipped, 2);
            assert_eq!(f.store.unread_count("alice").unwrap(), 1);
        }

        #[test]
        fn escalation_notifications_are_separate() {
            let f = fixture();
            f.dispatcher
                .create_alert_notifications(&f.alert, &f.threshold, at(0))
                .unwrap();
            let report = f
                .dispatcher
                .create_escalation_notifications(&f.alert, &f.threshold, at(11))
                .unwrap();
            assert_eq!(report.delivered, 1);

            let again = f
                .dispatcher
                .create_escalation_notifications(&f.alert, &f.threshold, at(12))
                .unwrap();
            assert_eq!(again.delivered, 0);

            let oncall = f.store.notifications_for_user("oncall", true).unwrap();
            assert_eq!(oncall.len(), 1);
            assert!(oncall[0].title.starts_with("ESCALATED: "));
            assert_eq!(oncall[0].kind, NotificationKind::Critical);
        }

        #[test]
        fn warning_alert_has_warning_kind() {
            let f = fixture();
            let mut alert = f.alert.clone();
            alert.severity = AlertSeverity::Warning;
            f.dispatcher
                .create_alert_notifications(&alert, &f.threshold, at(0))
                .unwrap();
            let bob = f.store.notifications_for_user("bob", true).unwrap();
            assert_eq!(bob[0].kind, NotificationKind::Warning);
        }
    }

    mod email_tests {
        use super::*;

        #[test]
        fn alert_email_goes_to_alert_addresses() {
            let f = fixture();
            let report = f
                .dispatcher
                .send_email_for_alert(&f.alert, &f.threshold)
                .unwrap();
            assert_eq!(report.delivered, 1);

            let sent = f.outbox.sent();
            assert_eq!(sent[0].to, "admin@example.com");
            assert_eq!(sent[0].subject, "Critical Alert: cpu in server");
        }

        #[test]
        fn escalation_email_goes_to_escalation_addresses() {
            let f = fixture();
            let report = f
                .dispatcher
                .send_escalation_email_for_alert(&f.alert, &f.threshold, at(11))
                .unwrap();
            assert_eq!(report.delivered, 2);
            assert!(
                f.outbox
                    .sent()
                    .iter()
                    .all(|m| m.subject == "ESCALATED: Critical Alert: cpu in server")
            );
        }

        #[test]
        fn failure_is_reported_after_trying_everyone() {
            let f = fixture();
            f.outbox.reject("operations@example.com");

            let err = f
                .dispatcher
                .send_escalation_email_for_alert(&f.alert, &f.threshold, at(11))
                .unwrap_err();

            assert!(matches!(
                err,
                AlertError::EmailFailed { ref recipient, .. } if recipient == "operations@example.com"
            ));
            assert_eq!(f.outbox.len(), 1);
            assert_eq!(f.outbox.sent()[0].to, "manager@example.com");
        }
    }
}
