//! Core types for the alerting system.
//!
//! This module provides the fundamental types used throughout the rep-alerts crate:
//! - [`AlertSeverity`]: The severity level of an alert
//! - [`ThresholdDirection`]: How a metric value is compared with a boundary
//! - [`AlertThreshold`]: An administrator-managed warning/critical boundary pair
//! - [`ThresholdDraft`]: Validated input for creating or editing a threshold
//! - [`Alert`]: An active or resolved breach of a threshold
//! - [`AlertHistory`]: An immutable snapshot of a closed alert lifecycle
//! - [`Notification`]: A per-user in-app message tied to an alert

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// Identifier of an [`AlertThreshold`].
pub type ThresholdId = i64;
/// Identifier of an [`Alert`].
pub type AlertId = i64;
/// Identifier of an [`AlertHistory`] row.
pub type HistoryId = i64;
/// Identifier of a [`Notification`].
pub type NotificationId = i64;

/// Tolerance used by [`ThresholdDirection::Equal`] and [`ThresholdDirection::NotEqual`].
pub const EQUALITY_TOLERANCE: f64 = 1e-4;

/// The severity level of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Warning boundary breached, should be investigated.
    #[default]
    Warning,
    /// Critical boundary breached, requires immediate attention.
    Critical,
}

impl AlertSeverity {
    /// Returns the severity as a lowercase string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Returns the capitalized label used in titles and subjects.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(AlertError::SerializationError(format!(
                "unknown severity '{other}'"
            ))),
        }
    }
}

/// Comparison direction of a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    /// Breached when the value is strictly greater than the boundary.
    #[default]
    Above,
    /// Breached when the value is strictly less than the boundary.
    Below,
    /// Breached when the value is within [`EQUALITY_TOLERANCE`] of the boundary.
    Equal,
    /// Breached when the value is at least [`EQUALITY_TOLERANCE`] away from the boundary.
    NotEqual,
}

impl ThresholdDirection {
    /// Returns true if `value` breaches `boundary` in this direction.
    #[must_use]
    pub fn is_breached(&self, value: f64, boundary: f64) -> bool {
        match self {
            Self::Above => value > boundary,
            Self::Below => value < boundary,
            Self::Equal => (value - boundary).abs() < EQUALITY_TOLERANCE,
            Self::NotEqual => (value - boundary).abs() >= EQUALITY_TOLERANCE,
        }
    }

    /// Returns the direction as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::Equal => "equal",
            Self::NotEqual => "not_equal",
        }
    }

    /// Returns the comparison symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::Above => ">",
            Self::Below => "<",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }

    /// Returns the capitalized label used in emails.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Above => "Above",
            Self::Below => "Below",
            Self::Equal => "Equal",
            Self::NotEqual => "NotEqual",
        }
    }
}

impl std::fmt::Display for ThresholdDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

impl FromStr for ThresholdDirection {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            "equal" => Ok(Self::Equal),
            "not_equal" => Ok(Self::NotEqual),
            other => Err(AlertError::SerializationError(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

/// Returns true if `value` breaches `boundary` in the given direction.
#[must_use]
pub fn breach(value: f64, boundary: f64, direction: ThresholdDirection) -> bool {
    direction.is_breached(value, boundary)
}

/// An administrator-managed threshold over a `(metric_name, metric_category)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    /// Store-assigned identifier.
    pub id: ThresholdId,
    /// The metric this threshold watches.
    pub metric_name: String,
    /// The metric category (e.g. `System`, `Database`).
    pub metric_category: String,
    /// Boundary for warning alerts.
    pub warning_threshold: f64,
    /// Boundary for critical alerts.
    pub critical_threshold: f64,
    /// Comparison direction for both boundaries.
    pub direction: ThresholdDirection,
    /// Whether in-app notifications are created.
    pub notification_enabled: bool,
    /// Whether email is sent.
    pub email_enabled: bool,
    /// Minutes an unacknowledged alert may stay active before escalation.
    pub escalation_minutes: Option<u32>,
    /// Free-text description.
    pub description: Option<String>,
    /// Disabled thresholds are skipped by the evaluator.
    pub is_enabled: bool,
    /// Who created the threshold.
    pub created_by: String,
    /// When the threshold was created.
    pub created_at: DateTime<Utc>,
    /// Who last updated the threshold.
    pub updated_by: String,
    /// When the threshold was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AlertThreshold {
    /// Maximum length of a metric name.
    pub const MAX_METRIC_NAME_LENGTH: usize = 100;
    /// Maximum length of a metric category.
    pub const MAX_CATEGORY_LENGTH: usize = 50;
    /// Maximum length of a description.
    pub const MAX_DESCRIPTION_LENGTH: usize = 200;

    /// Builds a new threshold from a draft, stamped with audit fields.
    ///
    /// The returned threshold has `id == 0` until a store assigns one.
    #[must_use]
    pub fn from_draft(draft: ThresholdDraft, user: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            metric_name: draft.metric_name,
            metric_category: draft.metric_category,
            warning_threshold: draft.warning_threshold,
            critical_threshold: draft.critical_threshold,
            direction: draft.direction,
            notification_enabled: draft.notification_enabled,
            email_enabled: draft.email_enabled,
            escalation_minutes: draft.escalation_minutes,
            description: draft.description,
            is_enabled: draft.is_enabled,
            created_by: user.to_string(),
            created_at: now,
            updated_by: user.to_string(),
            updated_at: now,
        }
    }

    /// Applies an edit, keeping identity and creation audit fields.
    pub fn apply_draft(&mut self, draft: ThresholdDraft, user: &str, now: DateTime<Utc>) {
        self.metric_name = draft.metric_name;
        self.metric_category = draft.metric_category;
        self.warning_threshold = draft.warning_threshold;
        self.critical_threshold = draft.critical_threshold;
        self.direction = draft.direction;
        self.notification_enabled = draft.notification_enabled;
        self.email_enabled = draft.email_enabled;
        self.escalation_minutes = draft.escalation_minutes;
        self.description = draft.description;
        self.is_enabled = draft.is_enabled;
        self.updated_by = user.to_string();
        self.updated_at = now;
    }

    /// Returns the boundary that applies to the given severity.
    #[must_use]
    pub const fn boundary_for(&self, severity: AlertSeverity) -> f64 {
        match severity {
            AlertSeverity::Warning => self.warning_threshold,
            AlertSeverity::Critical => self.critical_threshold,
        }
    }

    /// Classifies a value: `Some(Critical)` if the critical boundary is breached,
    /// `Some(Warning)` if only the warning boundary is, `None` otherwise.
    #[must_use]
    pub fn classify(&self, value: f64) -> Option<AlertSeverity> {
        if self.direction.is_breached(value, self.critical_threshold) {
            Some(AlertSeverity::Critical)
        } else if self.direction.is_breached(value, self.warning_threshold) {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }

    /// Returns true if this threshold watches the given metric.
    #[must_use]
    pub fn matches(&self, metric_name: &str, metric_category: &str) -> bool {
        self.metric_name == metric_name && self.metric_category == metric_category
    }
}

impl std::fmt::Display for AlertThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} {} warn={} crit={}",
            self.metric_category,
            self.metric_name,
            self.direction,
            self.warning_threshold,
            self.critical_threshold
        )
    }
}

/// Validated input for creating or editing a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDraft {
    /// The metric to watch.
    pub metric_name: String,
    /// The metric category.
    pub metric_category: String,
    /// Boundary for warning alerts.
    pub warning_threshold: f64,
    /// Boundary for critical alerts.
    pub critical_threshold: f64,
    /// Comparison direction.
    #[serde(default)]
    pub direction: ThresholdDirection,
    /// Whether in-app notifications are created.
    #[serde(default = "default_true")]
    pub notification_enabled: bool,
    /// Whether email is sent.
    #[serde(default)]
    pub email_enabled: bool,
    /// Minutes before an unacknowledged alert escalates.
    #[serde(default)]
    pub escalation_minutes: Option<u32>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the threshold is evaluated.
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl ThresholdDraft {
    /// Creates a new draft builder with required fields.
    pub fn builder(
        metric_name: impl Into<String>,
        metric_category: impl Into<String>,
    ) -> ThresholdDraftBuilder {
        ThresholdDraftBuilder::new(metric_name, metric_category)
    }

    /// Validates the draft.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidThreshold` if:
    /// - The metric name or category is empty or too long
    /// - A boundary is not finite
    /// - The description is too long
    /// - `escalation_minutes` is zero
    pub fn validate(&self) -> Result<()> {
        check_text(
            "metric name",
            &self.metric_name,
            AlertThreshold::MAX_METRIC_NAME_LENGTH,
        )?;
        check_text(
            "metric category",
            &self.metric_category,
            AlertThreshold::MAX_CATEGORY_LENGTH,
        )?;

        if !self.warning_threshold.is_finite() || !self.critical_threshold.is_finite() {
            return Err(AlertError::InvalidThreshold {
                reason: "threshold boundaries must be finite".to_string(),
            });
        }

        if let Some(description) = &self.description {
            if description.chars().count() > AlertThreshold::MAX_DESCRIPTION_LENGTH {
                return Err(AlertError::InvalidThreshold {
                    reason: format!(
                        "description exceeds maximum length of {} characters",
                        AlertThreshold::MAX_DESCRIPTION_LENGTH
                    ),
                });
            }
        }

        if self.escalation_minutes == Some(0) {
            return Err(AlertError::InvalidThreshold {
                reason: "escalation minutes must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn check_text(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AlertError::InvalidThreshold {
            reason: format!("{field} cannot be empty"),
        });
    }
    if value.chars().count() > max {
        return Err(AlertError::InvalidThreshold {
            reason: format!("{field} exceeds maximum length of {max} characters"),
        });
    }
    Ok(())
}

/// Builder for creating [`ThresholdDraft`] instances.
#[derive(Debug)]
pub struct ThresholdDraftBuilder {
    draft: ThresholdDraft,
}

impl ThresholdDraftBuilder {
    fn new(metric_name: impl Into<String>, metric_category: impl Into<String>) -> Self {
        Self {
            draft: ThresholdDraft {
                metric_name: metric_name.into(),
                metric_category: metric_category.into(),
                warning_threshold: 0.0,
                critical_threshold: 0.0,
                direction: ThresholdDirection::Above,
                notification_enabled: true,
                email_enabled: false,
                escalation_minutes: None,
                description: None,
                is_enabled: true,
            },
        }
    }

    /// Sets the warning boundary.
    #[must_use]
    pub const fn warning(mut self, boundary: f64) -> Self {
        self.draft.warning_threshold = boundary;
        self
    }

    /// Sets the critical boundary.
    #[must_use]
    pub const fn critical(mut self, boundary: f64) -> Self {
        self.draft.critical_threshold = boundary;
        self
    }

    /// Sets the comparison direction.
    #[must_use]
    pub const fn direction(mut self, direction: ThresholdDirection) -> Self {
        self.draft.direction = direction;
        self
    }

    /// Sets whether in-app notifications are created.
    #[must_use]
    pub const fn notifications(mut self, enabled: bool) -> Self {
        self.draft.notification_enabled = enabled;
        self
    }

    /// Sets whether email is sent.
    #[must_use]
    pub const fn email(mut self, enabled: bool) -> Self {
        self.draft.email_enabled = enabled;
        self
    }

    /// Sets the escalation delay in minutes.
    #[must_use]
    pub const fn escalate_after_minutes(mut self, minutes: u32) -> Self {
        self.draft.escalation_minutes = Some(minutes);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.draft.description = Some(description.into());
        self
    }

    /// Sets whether the threshold is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.draft.is_enabled = enabled;
        self
    }

    /// Builds and validates the [`ThresholdDraft`].
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidThreshold` if validation fails.
    pub fn build(self) -> Result<ThresholdDraft> {
        self.draft.validate()?;
        Ok(self.draft)
    }
}

/// An active or resolved breach of one threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Store-assigned identifier.
    pub id: AlertId,
    /// The threshold this alert belongs to.
    pub threshold_id: ThresholdId,
    /// Current severity.
    pub severity: AlertSeverity,
    /// Most recent breaching value.
    pub current_value: f64,
    /// When the breach was first observed.
    pub triggered_at: DateTime<Utc>,
    /// When the alert was closed (None while active).
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether an operator acknowledged the alert.
    pub is_acknowledged: bool,
    /// When it was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged it.
    pub acknowledged_by: Option<String>,
    /// Acknowledgement note.
    pub acknowledgement_note: Option<String>,
    /// Whether the time-based escalation fired.
    pub is_escalated: bool,
    /// When the escalation fired.
    pub escalated_at: Option<DateTime<Utc>>,
    /// Whether in-app notifications were created.
    pub notification_sent: bool,
    /// When in-app notifications were created.
    pub notification_sent_at: Option<DateTime<Utc>>,
    /// Whether email was sent.
    pub email_sent: bool,
    /// When email was sent.
    pub email_sent_at: Option<DateTime<Utc>>,
    /// Human-readable summary.
    pub details: Option<String>,
}

impl Alert {
    /// Maximum length of the details and acknowledgement note.
    pub const MAX_DETAILS_LENGTH: usize = 500;
    /// Maximum length of the acknowledging user name.
    pub const MAX_ACKNOWLEDGED_BY_LENGTH: usize = 100;

    /// Opens a new alert for a threshold breach. The id is 0 until stored.
    #[must_use]
    pub fn open(
        threshold: &AlertThreshold,
        severity: AlertSeverity,
        value: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            threshold_id: threshold.id,
            severity,
            current_value: value,
            triggered_at: now,
            resolved_at: None,
            is_acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledgement_note: None,
            is_escalated: false,
            escalated_at: None,
            notification_sent: false,
            notification_sent_at: None,
            email_sent: false,
            email_sent_at: None,
            details: Some(breach_details(threshold, severity, value)),
        }
    }

    /// Returns true while the alert is unresolved.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Raises a warning alert to critical for a new value.
    pub fn upgrade_to_critical(&mut self, threshold: &AlertThreshold, value: f64) {
        self.severity = AlertSeverity::Critical;
        self.current_value = value;
        self.details = Some(breach_details(threshold, AlertSeverity::Critical, value));
    }

    /// Marks the alert resolved. No-op if already resolved.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        if self.resolved_at.is_none() {
            self.resolved_at = Some(now);
        }
    }

    /// Records an acknowledgement.
    pub fn acknowledge(&mut self, by: &str, note: Option<&str>, now: DateTime<Utc>) {
        self.is_acknowledged = true;
        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(truncate_chars(by, Self::MAX_ACKNOWLEDGED_BY_LENGTH));
        self.acknowledgement_note = note.map(|n| truncate_chars(n, Self::MAX_DETAILS_LENGTH));
    }

    /// Marks in-app notifications as delivered.
    pub fn mark_notification_sent(&mut self, now: DateTime<Utc>) {
        self.notification_sent = true;
        self.notification_sent_at = Some(now);
    }

    /// Marks email as delivered.
    pub fn mark_email_sent(&mut self, now: DateTime<Utc>) {
        self.email_sent = true;
        self.email_sent_at = Some(now);
    }

    /// Returns true if the time-based escalation should fire at `now`.
    #[must_use]
    pub fn escalation_due(&self, escalation_minutes: Option<u32>, now: DateTime<Utc>) -> bool {
        let Some(minutes) = escalation_minutes else {
            return false;
        };
        self.is_active()
            && !self.is_escalated
            && !self.is_acknowledged
            && now > self.triggered_at + Duration::minutes(i64::from(minutes))
    }

    /// Marks the alert escalated.
    pub fn escalate(&mut self, now: DateTime<Utc>) {
        self.is_escalated = true;
        self.escalated_at = Some(now);
    }
}

/// Formats the human-readable breach summary stored on an alert.
#[must_use]
pub fn breach_details(threshold: &AlertThreshold, severity: AlertSeverity, value: f64) -> String {
    let text = format!(
        "Metric {} value {} breached {} threshold of {}",
        threshold.metric_name,
        value,
        severity.label(),
        threshold.boundary_for(severity)
    );
    truncate_chars(&text, Alert::MAX_DETAILS_LENGTH)
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// An active alert joined with its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlert {
    /// The alert.
    pub alert: Alert,
    /// The threshold it breaches.
    pub threshold: AlertThreshold,
}

/// Immutable snapshot of a resolved alert lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistory {
    /// Store-assigned identifier.
    pub id: HistoryId,
    /// The alert this row snapshots.
    pub alert_id: AlertId,
    /// Metric name at resolution time.
    pub metric_name: String,
    /// Metric category at resolution time.
    pub metric_category: String,
    /// Final severity.
    pub severity: AlertSeverity,
    /// Boundary that applied to the final severity.
    pub threshold_value: f64,
    /// Last breaching value recorded on the alert.
    pub actual_value: f64,
    /// Sample that cleared the breach (None for manual resolution).
    pub resolved_value: Option<f64>,
    /// Comparison direction.
    pub direction: ThresholdDirection,
    /// When the alert opened.
    pub triggered_at: DateTime<Utc>,
    /// When the alert closed.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether it was acknowledged.
    pub was_acknowledged: bool,
    /// When it was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged it.
    pub acknowledged_by: Option<String>,
    /// Acknowledgement note.
    pub acknowledgement_note: Option<String>,
    /// Whether it escalated.
    pub was_escalated: bool,
    /// Seconds from trigger to resolution.
    pub time_to_resolve_secs: Option<i64>,
    /// Seconds from trigger to acknowledgement.
    pub time_to_acknowledge_secs: Option<i64>,
    /// Alert details.
    pub details: Option<String>,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
}

impl AlertHistory {
    /// Snapshots a resolved alert. The id is 0 until stored.
    #[must_use]
    pub fn snapshot(
        alert: &Alert,
        threshold: &AlertThreshold,
        resolved_value: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        let time_to_resolve_secs = alert
            .resolved_at
            .map(|resolved| (resolved - alert.triggered_at).num_seconds());
        let time_to_acknowledge_secs = if alert.is_acknowledged {
            alert
                .acknowledged_at
                .map(|acked| (acked - alert.triggered_at).num_seconds())
        } else {
            None
        };

        Self {
            id: 0,
            alert_id: alert.id,
            metric_name: threshold.metric_name.clone(),
            metric_category: threshold.metric_category.clone(),
            severity: alert.severity,
            threshold_value: threshold.boundary_for(alert.severity),
            actual_value: alert.current_value,
            resolved_value,
            direction: threshold.direction,
            triggered_at: alert.triggered_at,
            resolved_at: alert.resolved_at,
            was_acknowledged: alert.is_acknowledged,
            acknowledged_at: alert.acknowledged_at,
            acknowledged_by: alert.acknowledged_by.clone(),
            acknowledgement_note: alert.acknowledgement_note.clone(),
            was_escalated: alert.is_escalated,
            time_to_resolve_secs,
            time_to_acknowledge_secs,
            details: alert.details.clone(),
            created_at: now,
        }
    }

    /// Time from trigger to resolution.
    #[must_use]
    pub fn time_to_resolve(&self) -> Option<Duration> {
        self.time_to_resolve_secs.map(Duration::seconds)
    }

    /// Time from trigger to acknowledgement.
    #[must_use]
    pub fn time_to_acknowledge(&self) -> Option<Duration> {
        self.time_to_acknowledge_secs.map(Duration::seconds)
    }
}

/// Filter for alert history queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only rows triggered at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only rows triggered at or before this instant.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Matches every row.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Sets the lower bound.
    #[must_use]
    pub const fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub const fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if a row triggered at `triggered_at` passes the time bounds.
    #[must_use]
    pub fn includes(&self, triggered_at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| triggered_at >= from)
            && self.to.is_none_or(|to| triggered_at <= to)
    }
}

/// Kind of an in-app notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Informational.
    #[default]
    Info,
    /// Warning-level alert.
    Warning,
    /// Critical alert or escalation.
    Critical,
}

impl NotificationKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl From<AlertSeverity> for NotificationKind {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Warning => Self::Warning,
            AlertSeverity::Critical => Self::Critical,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(AlertError::SerializationError(format!(
                "unknown notification kind '{other}'"
            ))),
        }
    }
}

/// A per-user in-app message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Store-assigned identifier.
    pub id: NotificationId,
    /// The alert this notification is about (cleared if the alert is purged).
    pub alert_id: Option<AlertId>,
    /// Recipient user.
    pub user_id: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Deep link into the admin UI.
    pub url: Option<String>,
    /// When it was created.
    pub created_at: DateTime<Utc>,
    /// Whether the user has read it.
    pub is_read: bool,
    /// When it was read.
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Maximum title length.
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum message length.
    pub const MAX_MESSAGE_LENGTH: usize = 1000;

    /// Creates an unread notification. The id is 0 until stored.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        title: &str,
        message: &str,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            alert_id: None,
            user_id: user_id.into(),
            title: truncate_chars(title, Self::MAX_TITLE_LENGTH),
            message: truncate_chars(message, Self::MAX_MESSAGE_LENGTH),
            kind,
            url: None,
            created_at: now,
            is_read: false,
            read_at: None,
        }
    }

    /// Links the notification to an alert.
    #[must_use]
    pub const fn with_alert(mut self, alert_id: AlertId) -> Self {
        self.alert_id = Some(alert_id);
        self
    }

    /// Sets the deep link.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn cpu_threshold() -> AlertThreshold {
        let draft = ThresholdDraft::builder("cpu", "server")
            .warning(70.0)
            .critical(90.0)
            .direction(ThresholdDirection::Above)
            .escalate_after_minutes(10)
            .build()
            .unwrap();
        let mut threshold = AlertThreshold::from_draft(draft, "admin", at(0));
        threshold.id = 1;
        threshold
    }

    mod severity_tests {
        use super::*;

        #[test]
        fn severity_strings() {
            assert_eq!(AlertSeverity::Warning.as_str(), "warning");
            assert_eq!(AlertSeverity::Critical.as_str(), "critical");
            assert_eq!(AlertSeverity::Critical.label(), "Critical");
            assert_eq!(format!("{}", AlertSeverity::Warning), "warning");
        }

        #[test]
        fn severity_parse() {
            assert_eq!("critical".parse::<AlertSeverity>().unwrap(), AlertSeverity::Critical);
            assert!("fatal".parse::<AlertSeverity>().is_err());
        }
    }

    mod direction_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(ThresholdDirection::Above, 10.0, 5.0, true ; "above breached")]
        #[test_case(ThresholdDirection::Above, 5.0, 5.0, false ; "above at boundary")]
        #[test_case(ThresholdDirection::Above, 4.0, 5.0, false ; "above under")]
        #[test_case(ThresholdDirection::Below, 4.0, 5.0, true ; "below breached")]
        #[test_case(ThresholdDirection::Below, 5.0, 5.0, false ; "below at boundary")]
        #[test_case(ThresholdDirection::Equal, 5.00005, 5.0, true ; "equal within tolerance")]
        #[test_case(ThresholdDirection::Equal, 5.001, 5.0, false ; "equal outside tolerance")]
        #[test_case(ThresholdDirection::NotEqual, 5.001, 5.0, true ; "not equal outside tolerance")]
        #[test_case(ThresholdDirection::NotEqual, 5.00005, 5.0, false ; "not equal within tolerance")]
        fn direction_breach(direction: ThresholdDirection, value: f64, boundary: f64, expected: bool) {
            assert_eq!(breach(value, boundary, direction), expected);
        }

        #[test]
        fn direction_parse_roundtrip() {
            for direction in [
                ThresholdDirection::Above,
                ThresholdDirection::Below,
                ThresholdDirection::Equal,
                ThresholdDirection::NotEqual,
            ] {
                assert_eq!(direction.as_str().parse::<ThresholdDirection>().unwrap(), direction);
            }
        }

        #[test]
        fn direction_display() {
            assert_eq!(format!("{}", ThresholdDirection::Above), ">");
            assert_eq!(format!("{}", ThresholdDirection::NotEqual), "!=");
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn above_matches_strict_greater(value in -1.0e6f64..1.0e6, boundary in -1.0e6f64..1.0e6) {
                prop_assert_eq!(breach(value, boundary, ThresholdDirection::Above), value > boundary);
            }

            #[test]
            fn below_matches_strict_less(value in -1.0e6f64..1.0e6, boundary in -1.0e6f64..1.0e6) {
                prop_assert_eq!(breach(value, boundary, ThresholdDirection::Below), value < boundary);
            }

            #[test]
            fn equal_and_not_equal_are_complements(value in -1.0e6f64..1.0e6, boundary in -1.0e6f64..1.0e6) {
                prop_assert_ne!(
                    breach(value, boundary, ThresholdDirection::Equal),
                    breach(value, boundary, ThresholdDirection::NotEqual)
                );
            }
        }
    }

    mod threshold_tests {
        use super::*;

        #[test]
        fn draft_builder_defaults() {
            let draft = ThresholdDraft::builder("cpu", "server").build().unwrap();
            assert!(draft.notification_enabled);
            assert!(!draft.email_enabled);
            assert!(draft.is_enabled);
            assert_eq!(draft.direction, ThresholdDirection::Above);
        }

        #[test]
        fn draft_empty_name_fails() {
            let result = ThresholdDraft::builder(" ", "server").build();
            match result {
                Err(AlertError::InvalidThreshold { reason }) => assert!(reason.contains("empty")),
                other => panic!("expected InvalidThreshold, got {other:?}"),
            }
        }

        #[test]
        fn draft_long_category_fails() {
            let category = "c".repeat(AlertThreshold::MAX_CATEGORY_LENGTH + 1);
            let result = ThresholdDraft::builder("cpu", category).build();
            assert!(matches!(result, Err(AlertError::InvalidThreshold { .. })));
        }

        #[test]
        fn draft_non_finite_boundary_fails() {
            let result = ThresholdDraft::builder("cpu", "server").critical(f64::NAN).build();
            assert!(matches!(result, Err(AlertError::InvalidThreshold { .. })));
        }

        #[test]
        fn draft_zero_escalation_fails() {
            let result = ThresholdDraft::builder("cpu", "server")
                .escalate_after_minutes(0)
                .build();
            assert!(matches!(result, Err(AlertError::InvalidThreshold { .. })));
        }

        #[test]
        fn classify_value() {
            let threshold = cpu_threshold();
            assert_eq!(threshold.classify(95.0), Some(AlertSeverity::Critical));
            assert_eq!(threshold.classify(75.0), Some(AlertSeverity::Warning));
            assert_eq!(threshold.classify(50.0), None);
        }

        #[test]
        fn apply_draft_keeps_creation_audit() {
            let mut threshold = cpu_threshold();
            let draft = ThresholdDraft::builder("cpu", "server")
                .warning(60.0)
                .critical(80.0)
                .build()
                .unwrap();
            threshold.apply_draft(draft, "editor", at(5));

            assert_eq!(threshold.created_by, "admin");
            assert_eq!(threshold.created_at, at(0));
            assert_eq!(threshold.updated_by, "editor");
            assert_eq!(threshold.updated_at, at(5));
            assert!((threshold.warning_threshold - 60.0).abs() < f64::EPSILON);
        }

        #[test]
        fn draft_deserializes_with_defaults() {
            let json = r#"{"metric_name":"cpu","metric_category":"server","warning_threshold":70,"critical_threshold":90}"#;
            let draft: ThresholdDraft = serde_json::from_str(json).unwrap();
            assert!(draft.notification_enabled);
            assert!(draft.is_enabled);
            assert_eq!(draft.escalation_minutes, None);
        }
    }

    mod alert_tests {
        use super::*;

        #[test]
        fn open_alert_details() {
            let threshold = cpu_threshold();
            let alert = Alert::open(&threshold, AlertSeverity::Critical, 95.0, at(0));

            assert!(alert.is_active());
            assert_eq!(alert.threshold_id, 1);
            assert_eq!(
                alert.details.as_deref(),
                Some("Metric cpu value 95 breached Critical threshold of 90")
            );
        }

        #[test]
        fn upgrade_rewrites_details() {
            let threshold = cpu_threshold();
            let mut alert = Alert::open(&threshold, AlertSeverity::Warning, 75.0, at(0));
            alert.upgrade_to_critical(&threshold, 92.5);

            assert_eq!(alert.severity, AlertSeverity::Critical);
            assert!((alert.current_value - 92.5).abs() < f64::EPSILON);
            assert_eq!(
                alert.details.as_deref(),
                Some("Metric cpu value 92.5 breached Critical threshold of 90")
            );
        }

        #[test]
        fn resolve_is_idempotent() {
            let threshold = cpu_threshold();
            let mut alert = Alert::open(&threshold, AlertSeverity::Warning, 75.0, at(0));
            alert.resolve(at(3));
            alert.resolve(at(7));
            assert_eq!(alert.resolved_at, Some(at(3)));
            assert!(!alert.is_active());
        }

        #[test]
        fn escalation_due_after_window() {
            let threshold = cpu_threshold();
            let alert = Alert::open(&threshold, AlertSeverity::Warning, 75.0, at(0));

            assert!(!alert.escalation_due(Some(10), at(10)));
            assert!(alert.escalation_due(Some(10), at(11)));
            assert!(!alert.escalation_due(None, at(59)));
        }

        #[test]
        fn escalation_not_due_when_acknowledged_or_escalated() {
            let threshold = cpu_threshold();
            let mut acked = Alert::open(&threshold, AlertSeverity::Warning, 75.0, at(0));
            acked.acknowledge("ops", Some("looking"), at(1));
            assert!(!acked.escalation_due(Some(10), at(30)));

            let mut escalated = Alert::open(&threshold, AlertSeverity::Warning, 75.0, at(0));
            escalated.escalate(at(11));
            assert!(!escalated.escalation_due(Some(10), at(30)));
        }

        #[test]
        fn acknowledge_truncates_note() {
            let threshold = cpu_threshold();
            let mut alert = Alert::open(&threshold, AlertSeverity::Warning, 75.0, at(0));
            let note = "n".repeat(Alert::MAX_DETAILS_LENGTH + 20);
            alert.acknowledge("ops", Some(&note), at(2));

            assert!(alert.is_acknowledged);
            assert_eq!(
                alert.acknowledgement_note.map(|n| n.len()),
                Some(Alert::MAX_DETAILS_LENGTH)
            );
        }
    }

    mod history_tests {
        use super::*;

        #[test]
        fn snapshot_computes_durations() {
            let threshold = cpu_threshold();
            let mut alert = Alert::open(&threshold, AlertSeverity::Critical, 95.0, at(0));
            alert.id = 9;
            alert.acknowledge("ops", None, at(4));
            alert.resolve(at(10));

            let history = AlertHistory::snapshot(&alert, &threshold, Some(50.0), at(10));

            assert_eq!(history.alert_id, 9);
            assert!((history.threshold_value - 90.0).abs() < f64::EPSILON);
            assert!((history.actual_value - 95.0).abs() < f64::EPSILON);
            assert_eq!(history.resolved_value, Some(50.0));
            assert_eq!(history.time_to_resolve(), Some(Duration::minutes(10)));
            assert_eq!(history.time_to_acknowledge(), Some(Duration::minutes(4)));
            assert!(history.was_acknowledged);
        }

        #[test]
        fn history_query_bounds() {
            let query = HistoryQuery::all().since(at(5)).until(at(10));
            assert!(!query.includes(at(4)));
            assert!(query.includes(at(5)));
            assert!(query.includes(at(10)));
            assert!(!query.includes(at(11)));
        }
    }

    mod notification_tests {
        use super::*;

        #[test]
        fn notification_builder() {
            let notification =
                Notification::new("admin", "title", "message", NotificationKind::Warning, at(0))
                    .with_alert(3)
                    .with_url("/Admin/Alerts/Details/3");

            assert_eq!(notification.alert_id, Some(3));
            assert!(!notification.is_read);
            assert_eq!(notification.url.as_deref(), Some("/Admin/Alerts/Details/3"));
        }

        #[test]
        fn notification_kind_from_severity() {
            assert_eq!(NotificationKind::from(AlertSeverity::Critical), NotificationKind::Critical);
            assert_eq!(NotificationKind::from(AlertSeverity::Warning), NotificationKind::Warning);
        }

        #[test]
        fn notification_truncates_title() {
            let title = "t".repeat(Notification::MAX_TITLE_LENGTH + 5);
            let notification =
                Notification::new("admin", &title, "m", NotificationKind::Info, at(0));
            assert_eq!(notification.title.len(), Notification::MAX_TITLE_LENGTH);
        }
    }
}
