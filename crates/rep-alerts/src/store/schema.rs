//! Schema migrations using `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::info;

use crate::error::{AlertError, Result};

/// V001: thresholds, alerts, history, notifications.
const V001_INITIAL: &str = r"
CREATE TABLE IF NOT EXISTS alert_thresholds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_name TEXT NOT NULL,
    metric_category TEXT NOT NULL,
    warning_threshold REAL NOT NULL,
    critical_threshold REAL NOT NULL,
    direction TEXT NOT NULL,
    notification_enabled INTEGER NOT NULL,
    email_enabled INTEGER NOT NULL,
    escalation_minutes INTEGER,
    description TEXT,
    is_enabled INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL
) STRICT;

CREATE INDEX IF NOT EXISTS idx_alert_thresholds_metric
    ON alert_thresholds(metric_name, metric_category);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    threshold_id INTEGER NOT NULL REFERENCES alert_thresholds(id) ON DELETE RESTRICT,
    severity TEXT NOT NULL,
    current_value REAL NOT NULL,
    triggered_at INTEGER NOT NULL,
    resolved_at INTEGER,
    is_acknowledged INTEGER NOT NULL,
    acknowledged_at INTEGER,
    acknowledged_by TEXT,
    acknowledgement_note TEXT,
    is_escalated INTEGER NOT NULL,
    escalated_at INTEGER,
    notification_sent INTEGER NOT NULL,
    notification_sent_at INTEGER,
    email_sent INTEGER NOT NULL,
    email_sent_at INTEGER,
    details TEXT
) STRICT;

CREATE INDEX IF NOT EXISTS idx_alerts_threshold ON alerts(threshold_id);
CREATE INDEX IF NOT EXISTS idx_alerts_triggered ON alerts(triggered_at);

-- At most one unresolved alert per threshold.
CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_one_active
    ON alerts(threshold_id) WHERE resolved_at IS NULL;

CREATE TABLE IF NOT EXISTS alert_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id INTEGER NOT NULL,
    metric_name TEXT NOT NULL,
    metric_category TEXT NOT NULL,
    severity TEXT NOT NULL,
    threshold_value REAL NOT NULL,
    actual_value REAL NOT NULL,
    resolved_value REAL,
    direction TEXT NOT NULL,
    triggered_at INTEGER NOT NULL,
    resolved_at INTEGER,
    was_acknowledged INTEGER NOT NULL,
    acknowledged_at INTEGER,
    acknowledged_by TEXT,
    acknowledgement_note TEXT,
    was_escalated INTEGER NOT NULL,
    time_to_resolve_secs INTEGER,
    time_to_acknowledge_secs INTEGER,
    details TEXT,
    created_at INTEGER NOT NULL
) STRICT;

CREATE INDEX IF NOT EXISTS idx_alert_history_triggered ON alert_history(triggered_at);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id INTEGER REFERENCES alerts(id) ON DELETE SET NULL,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    kind TEXT NOT NULL,
    url TEXT,
    created_at INTEGER NOT NULL,
    is_read INTEGER NOT NULL,
    read_at INTEGER
) STRICT;

CREATE INDEX IF NOT EXISTS idx_notifications_alert ON notifications(alert_id);
CREATE INDEX IF NOT EXISTS idx_notifications_user_read ON notifications(user_id, is_read);
";

const MIGRATIONS: &[(&str, u32)] = &[(V001_INITIAL, 1)];

/// Latest schema version.
pub(crate) const LATEST_VERSION: u32 = 1;

/// Applies connection pragmas.
pub(crate) fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Runs all pending migrations.
pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    let current = current_version(conn)?;

    for (sql, version) in MIGRATIONS {
        if current < *version {
            conn.execute_batch(sql).map_err(|e| {
                AlertError::Storage(format!("migration v{version:03} failed: {e}"))
            })?;
            conn.pragma_update(None, "user_version", version)?;
            info!(version = version, "applied migration");
        }
    }

    Ok(())
}

/// Returns the current schema version.
pub(crate) fn current_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_reach_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }
}
