use flywall::core::notifications::{NotificationHub, NotificationKind};

#[test]
fn test_ids_are_monotonic() {
    let hub = NotificationHub::new();
    let a = hub.publish(NotificationKind::Info, "a", "first");
    let b = hub.publish(NotificationKind::Success, "b", "second");
    assert!(b > a);
    assert_eq!(hub.last_id(), b);
}

#[test]
fn test_since_returns_only_newer() {
    let hub = NotificationHub::new();
    let first = hub.publish(NotificationKind::Info, "a", "first");
    hub.publish(NotificationKind::Warning, "b", "second");
    hub.publish(NotificationKind::Error, "c", "third");

    let batch = hub.since(first);
    assert_eq!(batch.notifications.len(), 2);
    assert!(batch.notifications.iter().all(|n| n.id > first));
    assert_eq!(batch.last_id, hub.last_id());
}

#[test]
fn test_since_zero_returns_everything_retained() {
    let hub = NotificationHub::new();
    for i in 0..5 {
        hub.publish(NotificationKind::Info, "t", format!("{i}"));
    }
    let batch = hub.since(0);
    assert_eq!(batch.notifications.len(), 5);
}

#[test]
fn test_ring_purges_oldest_past_capacity() {
    let hub = NotificationHub::new();
    for i in 0..150 {
        hub.publish(NotificationKind::Info, "t", format!("{i}"));
    }
    let batch = hub.since(0);
    assert_eq!(batch.notifications.len(), 100);
    // The oldest fifty were purged.
    assert_eq!(batch.notifications.first().unwrap().id, 51);
    assert_eq!(batch.notifications.last().unwrap().id, 150);
}

#[test]
fn test_empty_hub_since_echoes_cursor() {
    let hub = NotificationHub::new();
    let batch = hub.since(7);
    assert!(batch.notifications.is_empty());
    assert_eq!(batch.last_id, 7);
}
