//! Behaviour every [`AlertStore`] implementation must share.
//!
//! Each backend's test module calls these functions with a fresh store.

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{AlertStore, TitleFilter};
use crate::error::AlertError;
use crate::types::{
    Alert, AlertHistory, AlertSeverity, AlertThreshold, HistoryQuery, Notification,
    NotificationKind, ThresholdDirection, ThresholdDraft,
};

pub(crate) fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
}

pub(crate) fn sample_threshold(name: &str, category: &str) -> AlertThreshold {
    let draft = ThresholdDraft::builder(name, category)
        .warning(70.0)
        .critical(90.0)
        .direction(ThresholdDirection::Above)
        .email(true)
        .escalate_after_minutes(15)
        .description("sample")
        .build()
        .unwrap();
    AlertThreshold::from_draft(draft, "admin", at(0))
}

fn stored_threshold(store: &dyn AlertStore, name: &str) -> AlertThreshold {
    store
        .insert_threshold(&sample_threshold(name, "server"))
        .unwrap()
}

fn open_alert(store: &dyn AlertStore, threshold: &AlertThreshold, minute: i64) -> Alert {
    store
        .insert_alert(&Alert::open(
            threshold,
            AlertSeverity::Warning,
            75.0,
            at(minute),
        ))
        .unwrap()
}

pub(crate) fn thresholds_crud(store: &dyn AlertStore) {
    let cpu = stored_threshold(store, "cpu");
    let mem = stored_threshold(store, "memory");
    assert_ne!(cpu.id, mem.id);
    assert_eq!(store.get_threshold(cpu.id).unwrap(), Some(cpu.clone()));
    assert_eq!(store.list_thresholds().unwrap().len(), 2);

    let matching = store.enabled_thresholds_for("cpu", "server").unwrap();
    assert_eq!(matching, vec![cpu.clone()]);
    assert!(store.enabled_thresholds_for("cpu", "db").unwrap().is_empty());

    let mut disabled = cpu.clone();
    disabled.is_enabled = false;
    disabled.updated_by = "ops".to_string();
    disabled.updated_at = at(5);
    assert!(store.update_threshold(&disabled).unwrap());
    assert!(store.enabled_thresholds_for("cpu", "server").unwrap().is_empty());
    assert_eq!(store.get_threshold(cpu.id).unwrap(), Some(disabled));

    let mut ghost = mem.clone();
    ghost.id = 9_999;
    assert!(!store.update_threshold(&ghost).unwrap());

    assert!(store.delete_threshold(mem.id).unwrap());
    assert!(!store.delete_threshold(mem.id).unwrap());
    assert_eq!(store.get_threshold(mem.id).unwrap(), None);
}

pub(crate) fn delete_threshold_in_use(store: &dyn AlertStore) {
    let cpu = stored_threshold(store, "cpu");
    let mut alert = open_alert(store, &cpu, 1);
    alert.resolve(at(2));
    store.update_alert(&alert).unwrap();

    assert_eq!(store.count_alerts_for_threshold(cpu.id).unwrap(), 1);
    let err = store.delete_threshold(cpu.id).unwrap_err();
    assert!(matches!(err, AlertError::ThresholdInUse { alerts: 1, .. }));
    assert!(store.get_threshold(cpu.id).unwrap().is_some());
}

pub(crate) fn single_active_alert_per_threshold(store: &dyn AlertStore) {
    let cpu = stored_threshold(store, "cpu");
    let first = open_alert(store, &cpu, 1);
    assert_eq!(
        store.active_alert_for_threshold(cpu.id).unwrap(),
        Some(first.clone())
    );

    let duplicate = Alert::open(&cpu, AlertSeverity::Critical, 95.0, at(2));
    let err = store.insert_alert(&duplicate).unwrap_err();
    assert!(matches!(err, AlertError::DuplicateActiveAlert { threshold_id } if threshold_id == cpu.id));

    let mut resolved = first;
    resolved.resolve(at(3));
    assert!(store.update_alert(&resolved).unwrap());
    assert_eq!(store.active_alert_for_threshold(cpu.id).unwrap(), None);

    let second = open_alert(store, &cpu, 4);
    assert_ne!(second.id, resolved.id);
    assert_eq!(store.get_alert(resolved.id).unwrap(), Some(resolved));
}

pub(crate) fn active_alerts_join_and_order(store: &dyn AlertStore) {
    let cpu = stored_threshold(store, "cpu");
    let mem = stored_threshold(store, "memory");
    let disk = stored_threshold(store, "disk");

    let older = open_alert(store, &cpu, 1);
    let newer = open_alert(store, &mem, 5);
    let mut closed = open_alert(store, &disk, 3);
    closed.resolve(at(4));
    store.update_alert(&closed).unwrap();

    let active = store.active_alerts().unwrap();
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].alert.id, newer.id);
    assert_eq!(active[0].threshold, mem);
    assert_eq!(active[1].alert.id, older.id);
    assert_eq!(active[1].threshold, cpu);
}

pub(crate) fn history_query_filters(store: &dyn AlertStore) {
    let cpu = stored_threshold(store, "cpu");
    for minute in [10, 20, 30] {
        let mut alert = Alert::open(&cpu, AlertSeverity::Critical, 95.0, at(minute));
        alert.id = minute;
        alert.resolve(at(minute + 5));
        store
            .insert_history(&AlertHistory::snapshot(&alert, &cpu, Some(50.0), at(minute + 5)))
            .unwrap();
    }

    let all = store.query_history(&HistoryQuery::all()).unwrap();
    let triggered: Vec<_> = all.iter().map(|h| h.triggered_at).collect();
    assert_eq!(triggered, vec![at(30), at(20), at(10)]);
    assert_eq!(all[0].resolved_value, Some(50.0));
    assert_eq!(all[0].time_to_resolve_secs, Some(300));
    assert_eq!(store.get_history(all[0].id).unwrap(), Some(all[0].clone()));

    let window = HistoryQuery::all().since(at(15)).until(at(30));
    assert_eq!(store.query_history(&window).unwrap().len(), 2);

    let limited = HistoryQuery::all().limit(1);
    let rows = store.query_history(&limited).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].triggered_at, at(30));
}

pub(crate) fn notification_read_surface(store: &dyn AlertStore) {
    let first = store
        .insert_notification(&Notification::new(
            "alice",
            "Warning Alert: cpu",
            "first",
            NotificationKind::Warning,
            at(1),
        ))
        .unwrap();
    let second = store
        .insert_notification(
            &Notification::new("alice", "Info", "second", NotificationKind::Info, at(2))
                .with_url("/Admin/Alerts"),
        )
        .unwrap();
    store
        .insert_notification(&Notification::new(
            "bob",
            "Info",
            "other user",
            NotificationKind::Info,
            at(3),
        ))
        .unwrap();

    let unread = store.notifications_for_user("alice", false).unwrap();
    assert_eq!(
        unread.iter().map(|n| n.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );
    assert_eq!(unread[0].url.as_deref(), Some("/Admin/Alerts"));
    assert_eq!(store.unread_count("alice").unwrap(), 2);

    assert!(store.mark_notification_read(first.id, at(4)).unwrap());
    assert!(!store.mark_notification_read(9_999, at(4)).unwrap());
    assert_eq!(store.unread_count("alice").unwrap(), 1);
    assert_eq!(store.notifications_for_user("alice", false).unwrap().len(), 1);

    let everything = store.notifications_for_user("alice", true).unwrap();
    assert_eq!(everything.len(), 2);
    let read = everything.iter().find(|n| n.id == first.id).unwrap();
    assert!(read.is_read);
    assert_eq!(read.read_at, Some(at(4)));

    assert_eq!(store.mark_all_notifications_read("alice", at(5)).unwrap(), 1);
    assert_eq!(store.unread_count("alice").unwrap(), 0);
    assert_eq!(store.unread_count("bob").unwrap(), 1);
}

pub(crate) fn notification_exists_filters(store: &dyn AlertStore) {
    let cpu = stored_threshold(store, "cpu");
    let alert = open_alert(store, &cpu, 1);

    assert!(
        !store
            .notification_exists(alert.id, "alice", TitleFilter::NotStartingWith("ESCALATED"))
            .unwrap()
    );

    store
        .insert_notification(
            &Notification::new(
                "alice",
                "Warning Alert: cpu",
                "breach",
                NotificationKind::Warning,
                at(1),
            )
            .with_alert(alert.id),
        )
        .unwrap();

    assert!(
        store
            .notification_exists(alert.id, "alice", TitleFilter::NotStartingWith("ESCALATED"))
            .unwrap()
    );
    assert!(
        !store
            .notification_exists(alert.id, "alice", TitleFilter::StartsWith("ESCALATED"))
            .unwrap()
    );
    assert!(
        !store
            .notification_exists(alert.id, "bob", TitleFilter::NotStartingWith("ESCALATED"))
            .unwrap()
    );

    store
        .insert_notification(
            &Notification::new(
                "alice",
                "ESCALATED: Warning Alert: cpu",
                "escalated",
                NotificationKind::Critical,
                at(20),
            )
            .with_alert(alert.id),
        )
        .unwrap();

    assert!(
        store
            .notification_exists(alert.id, "alice", TitleFilter::StartsWith("ESCALATED"))
            .unwrap()
    );
}

pub(crate) fn purge_windows(store: &dyn AlertStore) {
    let cpu = stored_threshold(store, "cpu");
    let mem = stored_threshold(store, "memory");

    let mut old = open_alert(store, &cpu, 0);
    old.resolve(at(10));
    store.update_alert(&old).unwrap();
    let active = open_alert(store, &mem, 0);

    let linked = store
        .insert_notification(
            &Notification::new("alice", "Warning Alert: cpu", "m", NotificationKind::Warning, at(100))
                .with_alert(old.id),
        )
        .unwrap();
    store
        .insert_notification(&Notification::new("alice", "old", "m", NotificationKind::Info, at(1)))
        .unwrap();

    store
        .insert_history(&AlertHistory::snapshot(&old, &cpu, None, at(10)))
        .unwrap();

    assert_eq!(store.purge_resolved_alerts(at(20)).unwrap(), 1);
    assert_eq!(store.get_alert(old.id).unwrap(), None);
    assert!(store.get_alert(active.id).unwrap().is_some());

    let kept = store.notifications_for_user("alice", true).unwrap();
    let relinked = kept.iter().find(|n| n.id == linked.id).unwrap();
    assert_eq!(relinked.alert_id, None);

    assert_eq!(store.purge_notifications(at(50)).unwrap(), 1);
    assert_eq!(store.notifications_for_user("alice", true).unwrap().len(), 1);

    assert_eq!(store.purge_history(at(-5)).unwrap(), 0);
    assert_eq!(store.purge_history(at(1)).unwrap(), 1);
    assert!(store.query_history(&HistoryQuery::all()).unwrap().is_empty());
}
