//! Transactional email for alerts and escalations.
//!
//! Message composition is pure; delivery goes through an [`EmailSender`].
//! The crate ships two senders: [`LogEmailSender`], which only traces, and
//! [`OutboxEmailSender`], which keeps messages in memory.

use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertThreshold};

/// Prefix on escalation subjects and notification titles.
pub const ESCALATION_PREFIX: &str = "ESCALATED: ";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Delivers one HTML email.
pub trait EmailSender: Send + Sync + fmt::Debug {
    /// Sends `html_body` to `to`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::EmailFailed` if delivery fails.
    fn send_email(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html_body: String,
}

/// Subject and body before a recipient is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEmail {
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html_body: String,
}

// ============ Composition ============

/// Escapes text for inclusion in HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Subject of the initial alert email.
#[must_use]
pub fn alert_subject(alert: &Alert, threshold: &AlertThreshold) -> String {
    format!(
        "{} Alert: {} in {}",
        alert.severity.label(),
        threshold.metric_name,
        threshold.metric_category
    )
}

fn field(body: &mut String, label: &str, value: &str) {
    let _ = writeln!(
        body,
        "<p><strong>{label}:</strong> {}</p>",
        escape_html(value)
    );
}

/// Renders the initial alert email.
#[must_use]
pub fn compose_alert_email(
    alert: &Alert,
    threshold: &AlertThreshold,
    dashboard_url: &str,
) -> ComposedEmail {
    let mut body = String::new();
    let _ = writeln!(body, "<h2>{} Alert Triggered</h2>", alert.severity.label());
    field(&mut body, "Metric", &threshold.metric_name);
    field(&mut body, "Category", &threshold.metric_category);
    field(&mut body, "Current Value", &alert.current_value.to_string());
    field(
        &mut body,
        "Threshold",
        &threshold.boundary_for(alert.severity).to_string(),
    );
    field(&mut body, "Direction", threshold.direction.label());
    field(
        &mut body,
        "Time",
        &alert.triggered_at.format(TIMESTAMP_FORMAT).to_string(),
    );
    field(&mut body, "Details", alert.details.as_deref().unwrap_or(""));
    let _ = writeln!(
        body,
        "<p>Please check the <a href='{}'>Alert Dashboard</a> for more information.</p>",
        escape_html(dashboard_url)
    );

    ComposedEmail {
        subject: alert_subject(alert, threshold),
        html_body: body,
    }
}

/// Renders the escalation email sent when an alert goes unacknowledged.
#[must_use]
pub fn compose_escalation_email(
    alert: &Alert,
    threshold: &AlertThreshold,
    dashboard_url: &str,
    now: DateTime<Utc>,
) -> ComposedEmail {
    let minutes_open = (now - alert.triggered_at).num_seconds() as f64 / 60.0;
    let escalation_minutes = threshold.escalation_minutes.unwrap_or_default();

    let mut body = String::new();
    let _ = writeln!(
        body,
        "<h2>{ESCALATION_PREFIX}{} Alert Requiring Attention</h2>",
        alert.severity.label()
    );
    let _ = writeln!(
        body,
        "<p style='color: red; font-weight: bold;'>This alert has been escalated after \
         {escalation_minutes} minutes without acknowledgement.</p>"
    );
    field(&mut body, "Metric", &threshold.metric_name);
    field(&mut body, "Category", &threshold.metric_category);
    field(&mut body, "Current Value", &alert.current_value.to_string());
    field(
        &mut body,
        "Threshold",
        &threshold.boundary_for(alert.severity).to_string(),
    );
    field(
        &mut body,
        "First Triggered",
        &alert.triggered_at.format(TIMESTAMP_FORMAT).to_string(),
    );
    field(
        &mut body,
        "Time since triggering",
        &format!("{minutes_open:.1} minutes"),
    );
    field(&mut body, "Details", alert.details.as_deref().unwrap_or(""));
    let _ = writeln!(
        body,
        "<p>Please check the <a href='{}'>Alert Dashboard</a> urgently.</p>",
        escape_html(dashboard_url)
    );

    ComposedEmail {
        subject: format!("{ESCALATION_PREFIX}{}", alert_subject(alert, threshold)),
        html_body: body,
    }
}

// ============ Senders ============

/// Sender that only records the email in the trace log.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

impl LogEmailSender {
    /// Creates a log sender.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EmailSender for LogEmailSender {
    fn send_email(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        info!(
            to = %to,
            subject = %subject,
            body_len = html_body.len(),
            "would send alert email"
        );
        Ok(())
    }
}

/// Sender that keeps every message in memory.
///
/// Addresses registered with [`OutboxEmailSender::reject`] fail delivery.
#[derive(Debug, Default)]
pub struct OutboxEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    rejected: Mutex<HashSet<String>>,
}

impl OutboxEmailSender {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes delivery to `address` fail until [`OutboxEmailSender::accept`].
    pub fn reject(&self, address: impl Into<String>) {
        self.rejected.lock().insert(address.into());
    }

    /// Lets delivery to `address` succeed again.
    pub fn accept(&self, address: &str) {
        self.rejected.lock().remove(address);
    }

    /// Returns a copy of every delivered message.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }

    /// Number of delivered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    /// Returns true if nothing was delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl EmailSender for OutboxEmailSender {
    fn send_email(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        if self.rejected.lock().contains(to) {
            return Err(AlertError::EmailFailed {
                recipient: to.to_string(),
                reason: "recipient rejected".to_string(),
            });
        }
        self.sent.lock().push(EmailMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}
