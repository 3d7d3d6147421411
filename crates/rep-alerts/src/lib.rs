//! Threshold alerting with escalation for repwatch.
//!
//! `rep-alerts` watches named metrics against administrator-managed
//! thresholds, keeps at most one active alert per threshold, escalates alerts
//! nobody acknowledges, and tells admins in-app and by email.
//!
//! # Features
//!
//! - **Thresholds**: warning and critical boundaries per `(metric, category)`,
//!   compared `Above`, `Below`, `Equal` or `NotEqual`
//! - **Alert Lifecycle**: open, upgrade to critical, escalate, resolve into
//!   an append-only history
//! - **Notifications**: per-user in-app notifications and HTML email with
//!   duplicate suppression
//! - **Storage**: in-memory or `SQLite` backends behind one trait
//! - **Jobs**: periodic threshold checks and retention cleanup on tokio
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use rep_alerts::{
//!     AlertingConfig, AlertingService, MemoryStore, OutboxEmailSender, StaticRecipients,
//!     ThresholdDirection, ThresholdDraft,
//! };
//!
//! let outbox = Arc::new(OutboxEmailSender::new());
//! let service = AlertingService::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticRecipients::single("admin", "admin@example.com")),
//!     outbox.clone(),
//!     AlertingConfig::default(),
//! );
//!
//! // CPU above 70 warns, above 90 is critical.
//! let draft = ThresholdDraft::builder("cpu", "server")
//!     .warning(70.0)
//!     .critical(90.0)
//!     .direction(ThresholdDirection::Above)
//!     .email(true)
//!     .escalate_after_minutes(10)
//!     .build()
//!     .unwrap();
//! service.create_alert_threshold(draft, "admin").unwrap();
//!
//! assert!(service.evaluate_metric("cpu", "server", 95.0).unwrap());
//! assert_eq!(service.active_alerts().unwrap().len(), 1);
//! assert_eq!(outbox.len(), 1);
//!
//! // Back under the warning boundary: resolved and written to history.
//! assert!(service.evaluate_metric("cpu", "server", 50.0).unwrap());
//! assert!(service.active_alerts().unwrap().is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod dispatcher;
pub mod email;
pub mod error;
pub mod evaluator;
pub mod jobs;
pub mod maintenance;
pub mod metrics;
pub mod recipients;
pub mod service;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use config::{AlertingConfig, RecipientsConfig, RetentionConfig};
pub use dispatcher::{DeliveryReport, NotificationDispatcher};
pub use email::{EmailMessage, EmailSender, LogEmailSender, OutboxEmailSender};
pub use error::{AlertError, Result};
pub use evaluator::{AlertEvaluator, EvaluationResult};
pub use jobs::{AlertingJobs, JobSchedule};
pub use maintenance::{MaintenanceReport, run_maintenance};
pub use metrics::{MetricSample, MetricSource, StaticMetricSource};
pub use recipients::{RecipientResolver, StaticRecipients};
pub use service::AlertingService;
pub use store::{AlertStore, MemoryStore, SqliteStore, TitleFilter};
pub use types::{
    ActiveAlert, Alert, AlertHistory, AlertId, AlertSeverity, AlertThreshold, HistoryId,
    HistoryQuery, Notification, NotificationId, NotificationKind, ThresholdDirection,
    ThresholdDraft, ThresholdDraftBuilder, ThresholdId, breach,
};
