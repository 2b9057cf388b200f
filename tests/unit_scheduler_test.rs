use chrono::{TimeZone, Timelike, Utc};
use flywall::core::scheduler::{Schedule, ScheduledTask, Scheduler, TaskFn};
use std::sync::Arc;
use std::time::Duration;

fn noop_task() -> TaskFn {
    Arc::new(|_cancel| Box::pin(async { Ok(()) }))
}

#[test]
fn test_parse_interval() {
    let schedule = Schedule::parse("every 5m").unwrap();
    assert!(matches!(schedule, Schedule::Interval(d) if d == Duration::from_secs(300)));
}

#[test]
fn test_parse_daily() {
    let schedule = Schedule::parse("daily 03:30").unwrap();
    assert!(matches!(schedule, Schedule::Daily { hour: 3, minute: 30 }));
}

#[test]
fn test_parse_five_field_cron() {
    // Classic five-field cron gets a seconds column prepended.
    let schedule = Schedule::parse("*/15 * * * *").unwrap();
    assert!(matches!(schedule, Schedule::Cron(_)));
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(Schedule::parse("whenever").is_err());
    assert!(Schedule::parse("every potato").is_err());
    assert!(Schedule::parse("daily 25:00").is_err());
    assert!(Schedule::parse("").is_err());
}

#[test]
fn test_interval_next_advances_by_duration() {
    let schedule = Schedule::parse("every 10s").unwrap();
    let after = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let next = schedule.next(after).unwrap();
    assert_eq!((next - after).num_seconds(), 10);
}

#[test]
fn test_daily_next_rolls_to_tomorrow() {
    let schedule = Schedule::parse("daily 03:00").unwrap();
    let after = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let next = schedule.next(after).unwrap();
    assert_eq!(next.hour(), 3);
    assert_eq!(next.date_naive(), after.date_naive().succ_opt().unwrap());
}

#[test]
fn test_daily_next_same_day_when_earlier() {
    let schedule = Schedule::parse("daily 23:45").unwrap();
    let after = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let next = schedule.next(after).unwrap();
    assert_eq!(next.date_naive(), after.date_naive());
}

#[test]
fn test_cron_next_matches_expression() {
    let schedule = Schedule::parse("0 4 * * *").unwrap();
    let after = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let next = schedule.next(after).unwrap();
    assert_eq!((next.hour(), next.minute()), (4, 0));
}

#[tokio::test]
async fn test_add_replaces_same_id() {
    let scheduler = Scheduler::new();
    scheduler
        .add(ScheduledTask::new(
            "rule_night",
            Schedule::parse("every 1m").unwrap(),
            noop_task(),
        ))
        .await;
    scheduler
        .add(ScheduledTask::new(
            "rule_night",
            Schedule::parse("every 2m").unwrap(),
            noop_task(),
        ))
        .await;
    assert_eq!(scheduler.task_ids().await.len(), 1);
}

#[tokio::test]
async fn test_remove_prefix_only_touches_prefix() {
    let scheduler = Scheduler::new();
    for id in ["rule_a", "rule_b", "ipset_feed", "system_backup", "other"] {
        scheduler
            .add(ScheduledTask::new(
                id,
                Schedule::parse("every 1m").unwrap(),
                noop_task(),
            ))
            .await;
    }

    let removed = scheduler.remove_prefix("rule_").await;
    assert_eq!(removed.len(), 2);
    let remaining = scheduler.task_ids().await;
    assert!(remaining.contains(&"ipset_feed".to_string()));
    assert!(remaining.contains(&"system_backup".to_string()));
    assert!(remaining.contains(&"other".to_string()));
}

async fn rebuild(scheduler: &Scheduler) {
    for prefix in flywall::core::scheduler::MANAGED_PREFIXES {
        scheduler.remove_prefix(prefix).await;
    }
    for id in ["rule_a", "ipset_feed", "system_backup"] {
        scheduler
            .add(ScheduledTask::new(
                id,
                Schedule::parse("every 1m").unwrap(),
                noop_task(),
            ))
            .await;
    }
}

#[tokio::test]
async fn test_wipe_and_rebuild_is_idempotent() {
    let scheduler = Scheduler::new();

    rebuild(&scheduler).await;
    let first = scheduler.task_ids().await;
    rebuild(&scheduler).await;
    let second = scheduler.task_ids().await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unparseable_schedule_is_skipped_not_fatal() {
    let scheduler = Scheduler::new();
    let result = scheduler
        .add_parsed("rule_bad", "not a schedule", true, noop_task())
        .await;
    assert!(result.is_err());
    assert!(scheduler.task_ids().await.is_empty());

    // Later registrations still work.
    scheduler
        .add_parsed("rule_good", "every 1m", true, noop_task())
        .await
        .unwrap();
    assert_eq!(scheduler.task_ids().await.len(), 1);
}

#[tokio::test]
async fn test_run_on_start_fires_immediately() {
    let scheduler = Arc::new(Scheduler::new());
    let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let fired_clone = fired.clone();

    scheduler
        .add(ScheduledTask {
            id: "system_boot".to_string(),
            schedule: Schedule::parse("every 1h").unwrap(),
            func: Arc::new(move |_cancel| {
                let fired = fired_clone.clone();
                Box::pin(async move {
                    fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })
            }),
            enabled: true,
            run_on_start: true,
        })
        .await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
}
