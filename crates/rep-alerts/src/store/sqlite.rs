//! `SQLite` store.
//!
//! Timestamps are stored as Unix milliseconds; enums as their lowercase
//! string form.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::schema;
use super::{AlertStore, TitleFilter};
use crate::error::{AlertError, Result};
use crate::types::{
    ActiveAlert, Alert, AlertHistory, AlertId, AlertThreshold, HistoryId, HistoryQuery,
    Notification, NotificationId, ThresholdId,
};

const THRESHOLD_COLUMNS: &str = "id, metric_name, metric_category, warning_threshold, \
     critical_threshold, direction, notification_enabled, email_enabled, escalation_minutes, \
     description, is_enabled, created_by, created_at, updated_by, updated_at";

const ALERT_COLUMNS: &str = "id, threshold_id, severity, current_value, triggered_at, \
     resolved_at, is_acknowledged, acknowledged_at, acknowledged_by, acknowledgement_note, \
     is_escalated, escalated_at, notification_sent, notification_sent_at, email_sent, \
     email_sent_at, details";

const HISTORY_COLUMNS: &str = "id, alert_id, metric_name, metric_category, severity, \
     threshold_value, actual_value, resolved_value, direction, triggered_at, resolved_at, \
     was_acknowledged, acknowledged_at, acknowledged_by, acknowledgement_note, was_escalated, \
     time_to_resolve_secs, time_to_acknowledge_secs, details, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, alert_id, user_id, title, message, kind, url, created_at, is_read, read_at";

/// An [`AlertStore`] backed by a `SQLite` database.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file and brings its schema up to date.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Storage` if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "opened alert database");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Storage` if migration fails.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        schema::apply_pragmas(&conn)?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Returns the schema version of the open database.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Storage` on query failure.
    pub fn schema_version(&self) -> Result<u32> {
        schema::current_version(&self.conn.lock())
    }
}

// ============ Column conversions ============

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn opt_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(millis)
}

fn conversion_error(idx: usize, ty: Type, err: AlertError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        conversion_error(
            idx,
            Type::Integer,
            AlertError::SerializationError(format!("timestamp out of range: {ms}")),
        )
    })
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        None => Ok(None),
        Some(_) => timestamp(row, idx).map(Some),
    }
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = AlertError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|err| conversion_error(idx, Type::Text, err))
}

fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn threshold_from_row(row: &Row<'_>) -> rusqlite::Result<AlertThreshold> {
    Ok(AlertThreshold {
        id: row.get(0)?,
        metric_name: row.get(1)?,
        metric_category: row.get(2)?,
        warning_threshold: row.get(3)?,
        critical_threshold: row.get(4)?,
        direction: parsed(row, 5)?,
        notification_enabled: row.get(6)?,
        email_enabled: row.get(7)?,
        escalation_minutes: row.get(8)?,
        description: row.get(9)?,
        is_enabled: row.get(10)?,
        created_by: row.get(11)?,
        created_at: timestamp(row, 12)?,
        updated_by: row.get(13)?,
        updated_at: timestamp(row, 14)?,
    })
}

/// Reads an alert whose columns start at `base`.
fn alert_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(base)?,
        threshold_id: row.get(base + 1)?,
        severity: parsed(row, base + 2)?,
        current_value: row.get(base + 3)?,
        triggered_at: timestamp(row, base + 4)?,
        resolved_at: opt_timestamp(row, base + 5)?,
        is_acknowledged: row.get(base + 6)?,
        acknowledged_at: opt_timestamp(row, base + 7)?,
        acknowledged_by: row.get(base + 8)?,
        acknowledgement_note: row.get(base + 9)?,
        is_escalated: row.get(base + 10)?,
        escalated_at: opt_timestamp(row, base + 11)?,
        notification_sent: row.get(base + 12)?,
        notification_sent_at: opt_timestamp(row, base + 13)?,
        email_sent: row.get(base + 14)?,
        email_sent_at: opt_timestamp(row, base + 15)?,
        details: row.get(base + 16)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    alert_at(row, 0)
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<AlertHistory> {
    Ok(AlertHistory {
        id: row.get(0)?,
        alert_id: row.get(1)?,
        metric_name: row.get(2)?,
        metric_category: row.get(3)?,
        severity: parsed(row, 4)?,
        threshold_value: row.get(5)?,
        actual_value: row.get(6)?,
        resolved_value: row.get(7)?,
        direction: parsed(row, 8)?,
        triggered_at: timestamp(row, 9)?,
        resolved_at: opt_timestamp(row, 10)?,
        was_acknowledged: row.get(11)?,
        acknowledged_at: opt_timestamp(row, 12)?,
        acknowledged_by: row.get(13)?,
        acknowledgement_note: row.get(14)?,
        was_escalated: row.get(15)?,
        time_to_resolve_secs: row.get(16)?,
        time_to_acknowledge_secs: row.get(17)?,
        details: row.get(18)?,
        created_at: timestamp(row, 19)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        alert_id: row.get(1)?,
        user_id: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        kind: parsed(row, 5)?,
        url: row.get(6)?,
        created_at: timestamp(row, 7)?,
        is_read: row.get(8)?,
        read_at: opt_timestamp(row, 9)?,
    })
}

fn constraint_code(err: &rusqlite::Error) -> Option<std::ffi::c_int> {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Some(e.extended_code)
        }
        _ => None,
    }
}

impl AlertStore for SqliteStore {
    fn list_thresholds(&self) -> Result<Vec<AlertThreshold>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {THRESHOLD_COLUMNS} FROM alert_thresholds ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], threshold_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_threshold(&self, id: ThresholdId) -> Result<Option<AlertThreshold>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {THRESHOLD_COLUMNS} FROM alert_thresholds WHERE id = ?1"
        ))?;
        Ok(stmt.query_row(params![id], threshold_from_row).optional()?)
    }

    fn enabled_thresholds_for(
        &self,
        metric_name: &str,
        metric_category: &str,
    ) -> Result<Vec<AlertThreshold>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {THRESHOLD_COLUMNS} FROM alert_thresholds
             WHERE metric_name = ?1 AND metric_category = ?2 AND is_enabled = 1
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![metric_name, metric_category], threshold_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert_threshold(&self, threshold: &AlertThreshold) -> Result<AlertThreshold> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alert_thresholds (metric_name, metric_category, warning_threshold,
                critical_threshold, direction, notification_enabled, email_enabled,
                escalation_minutes, description, is_enabled, created_by, created_at,
                updated_by, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                threshold.metric_name,
                threshold.metric_category,
                threshold.warning_threshold,
                threshold.critical_threshold,
                threshold.direction.as_str(),
                threshold.notification_enabled,
                threshold.email_enabled,
                threshold.escalation_minutes,
                threshold.description,
                threshold.is_enabled,
                threshold.created_by,
                millis(threshold.created_at),
                threshold.updated_by,
                millis(threshold.updated_at),
            ],
        )?;

        let mut stored = threshold.clone();
        stored.id = conn.last_insert_rowid();
        Ok(stored)
    }

    fn update_threshold(&self, threshold: &AlertThreshold) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE alert_thresholds SET metric_name = ?2, metric_category = ?3,
                warning_threshold = ?4, critical_threshold = ?5, direction = ?6,
                notification_enabled = ?7, email_enabled = ?8, escalation_minutes = ?9,
                description = ?10, is_enabled = ?11, created_by = ?12, created_at = ?13,
                updated_by = ?14, updated_at = ?15
             WHERE id = ?1",
            params![
                threshold.id,
                threshold.metric_name,
                threshold.metric_category,
                threshold.warning_threshold,
                threshold.critical_threshold,
                threshold.direction.as_str(),
                threshold.notification_enabled,
                threshold.email_enabled,
                threshold.escalation_minutes,
                threshold.description,
                threshold.is_enabled,
                threshold.created_by,
                millis(threshold.created_at),
                threshold.updated_by,
                millis(threshold.updated_at),
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete_threshold(&self, id: ThresholdId) -> Result<bool> {
        let conn = self.conn.lock();
        let alerts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE threshold_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if alerts > 0 {
            return Err(AlertError::ThresholdInUse {
                id,
                alerts: count(alerts),
            });
        }

        let changed = conn.execute("DELETE FROM alert_thresholds WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn count_alerts_for_threshold(&self, id: ThresholdId) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE threshold_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count(n))
    }

    fn get_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], alert_from_row).optional()?)
    }

    fn active_alert_for_threshold(&self, threshold_id: ThresholdId) -> Result<Option<Alert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE threshold_id = ?1 AND resolved_at IS NULL"
        ))?;
        Ok(stmt
            .query_row(params![threshold_id], alert_from_row)
            .optional()?)
    }

    fn insert_alert(&self, alert: &Alert) -> Result<Alert> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO alerts (threshold_id, severity, current_value, triggered_at,
                resolved_at, is_acknowledged, acknowledged_at, acknowledged_by,
                acknowledgement_note, is_escalated, escalated_at, notification_sent,
                notification_sent_at, email_sent, email_sent_at, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                alert.threshold_id,
                alert.severity.as_str(),
                alert.current_value,
                millis(alert.triggered_at),
                opt_millis(alert.resolved_at),
                alert.is_acknowledged,
                opt_millis(alert.acknowledged_at),
                alert.acknowledged_by,
                alert.acknowledgement_note,
                alert.is_escalated,
                opt_millis(alert.escalated_at),
                alert.notification_sent,
                opt_millis(alert.notification_sent_at),
                alert.email_sent,
                opt_millis(alert.email_sent_at),
                alert.details,
            ],
        );

        match result {
            Ok(_) => {
                let mut stored = alert.clone();
                stored.id = conn.last_insert_rowid();
                Ok(stored)
            }
            Err(err) => match constraint_code(&err) {
                Some(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                    Err(AlertError::DuplicateActiveAlert {
                        threshold_id: alert.threshold_id,
                    })
                }
                Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                    Err(AlertError::ThresholdNotFound {
                        id: alert.threshold_id,
                    })
                }
                _ => Err(err.into()),
            },
        }
    }

    fn update_alert(&self, alert: &Alert) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE alerts SET threshold_id = ?2, severity = ?3, current_value = ?4,
                triggered_at = ?5, resolved_at = ?6, is_acknowledged = ?7,
                acknowledged_at = ?8, acknowledged_by = ?9, acknowledgement_note = ?10,
                is_escalated = ?11, escalated_at = ?12, notification_sent = ?13,
                notification_sent_at = ?14, email_sent = ?15, email_sent_at = ?16,
                details = ?17
             WHERE id = ?1",
            params![
                alert.id,
                alert.threshold_id,
                alert.severity.as_str(),
                alert.current_value,
                millis(alert.triggered_at),
                opt_millis(alert.resolved_at),
                alert.is_acknowledged,
                opt_millis(alert.acknowledged_at),
                alert.acknowledged_by,
                alert.acknowledgement_note,
                alert.is_escalated,
                opt_millis(alert.escalated_at),
                alert.notification_sent,
                opt_millis(alert.notification_sent_at),
                alert.email_sent,
                opt_millis(alert.email_sent_at),
                alert.details,
            ],
        )?;
        Ok(changed > 0)
    }

    fn active_alerts(&self) -> Result<Vec<ActiveAlert>> {
        let conn = self.conn.lock();
        let threshold_columns = THRESHOLD_COLUMNS
            .split(", ")
            .map(|c| format!("t.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let alert_columns = ALERT_COLUMNS
            .split(", ")
            .map(|c| format!("a.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {threshold_columns}, {alert_columns}
             FROM alerts a JOIN alert_thresholds t ON t.id = a.threshold_id
             WHERE a.resolved_at IS NULL
             ORDER BY a.triggered_at DESC, a.id DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ActiveAlert {
                    threshold: threshold_from_row(row)?,
                    alert: alert_at(row, 15)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn purge_resolved_alerts(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM alerts WHERE resolved_at IS NOT NULL AND resolved_at < ?1",
            params![millis(cutoff)],
        )?;
        debug!(count = removed, "purged resolved alerts");
        Ok(removed)
    }

    fn insert_history(&self, history: &AlertHistory) -> Result<AlertHistory> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alert_history (alert_id, metric_name, metric_category, severity,
                threshold_value, actual_value, resolved_value, direction, triggered_at,
                resolved_at, was_acknowledged, acknowledged_at, acknowledged_by,
                acknowledgement_note, was_escalated, time_to_resolve_secs,
                time_to_acknowledge_secs, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19)",
            params![
                history.alert_id,
                history.metric_name,
                history.metric_category,
                history.severity.as_str(),
                history.threshold_value,
                history.actual_value,
                history.resolved_value,
                history.direction.as_str(),
                millis(history.triggered_at),
                opt_millis(history.resolved_at),
                history.was_acknowledged,
                opt_millis(history.acknowledged_at),
                history.acknowledged_by,
                history.acknowledgement_note,
                history.was_escalated,
                history.time_to_resolve_secs,
                history.time_to_acknowledge_secs,
                history.details,
                millis(history.created_at),
            ],
        )?;

        let mut stored = history.clone();
        stored.id = conn.last_insert_rowid();
        Ok(stored)
    }

    fn get_history(&self, id: HistoryId) -> Result<Option<AlertHistory>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {HISTORY_COLUMNS} FROM alert_history WHERE id = ?1"
        ))?;
        Ok(stmt.query_row(params![id], history_from_row).optional()?)
    }

    fn query_history(&self, query: &HistoryQuery) -> Result<Vec<AlertHistory>> {
        let conn = self.conn.lock();
        let limit = query
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {HISTORY_COLUMNS} FROM alert_history
             WHERE (?1 IS NULL OR triggered_at >= ?1)
               AND (?2 IS NULL OR triggered_at <= ?2)
             ORDER BY triggered_at DESC, id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![opt_millis(query.from), opt_millis(query.to), limit],
                history_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn purge_history(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM alert_history WHERE triggered_at < ?1",
            params![millis(cutoff)],
        )?)
    }

    fn notification_exists(
        &self,
        alert_id: AlertId,
        user_id: &str,
        filter: TitleFilter<'_>,
    ) -> Result<bool> {
        let (prefix, wanted) = match filter {
            TitleFilter::StartsWith(prefix) => (prefix, true),
            TitleFilter::NotStartingWith(prefix) => (prefix, false),
        };
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM notifications
                WHERE alert_id = ?1 AND user_id = ?2
                  AND (substr(title, 1, length(?3)) = ?3) = ?4
             )",
            params![alert_id, user_id, prefix, wanted],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn insert_notification(&self, notification: &Notification) -> Result<Notification> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO notifications (alert_id, user_id, title, message, kind, url,
                created_at, is_read, read_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                notification.alert_id,
                notification.user_id,
                notification.title,
                notification.message,
                notification.kind.as_str(),
                notification.url,
                millis(notification.created_at),
                notification.is_read,
                opt_millis(notification.read_at),
            ],
        )?;

        let mut stored = notification.clone();
        stored.id = conn.last_insert_rowid();
        Ok(stored)
    }

    fn notifications_for_user(
        &self,
        user_id: &str,
        include_read: bool,
    ) -> Result<Vec<Notification>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = ?1 AND (?2 OR is_read = 0)
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_id, include_read], notification_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn unread_count(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count(n))
    }

    fn mark_notification_read(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE id = ?1",
            params![id, millis(at)],
        )?;
        Ok(changed > 0)
    }

    fn mark_all_notifications_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2
             WHERE user_id = ?1 AND is_read = 0",
            params![user_id, millis(at)],
        )?)
    }

    fn purge_notifications(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM notifications WHERE created_at < ?1",
            params![millis(cutoff)],
        )?)
    }
}
