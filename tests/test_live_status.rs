//! Live status publisher fed by the heartbeat change feed

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{machine, Fleet};
use vending_monitor::shared::controller::PeriodicTask;
use vending_monitor::shared::domain::{HeartbeatRecord, HeartbeatStatus, MachineType};
use vending_monitor::shared::thresholds::OfflineThresholds;
use vending_monitor::shared::time::{Clock, MS_PER_MINUTE};

/// Poll until `condition` holds or a second has passed
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_attached_feed_reaches_subscribers() {
    let fleet = Fleet::new(vec![machine("M1", MachineType::Coffee)]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = fleet.publisher.subscribe(move |status| {
        sink.lock()
            .unwrap()
            .push((status.machine_id.clone(), status.is_offline));
    });
    let feed = fleet.publisher.attach(fleet.heartbeats.subscribe_changes());

    fleet
        .heartbeats
        .record_heartbeat("M1", fleet.clock.now_ms() - 7 * MS_PER_MINUTE);
    fleet.heartbeats.record_heartbeat("M1", fleet.clock.now_ms());

    assert!(eventually(|| seen.lock().unwrap().len() == 2).await);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("M1".to_string(), true), ("M1".to_string(), false)]
    );

    feed.abort();
}

#[tokio::test]
async fn test_detector_status_writes_are_published() {
    let fleet = Fleet::new(vec![machine("M1", MachineType::Snack)]);
    let feed = fleet.publisher.attach(fleet.heartbeats.subscribe_changes());
    fleet
        .heartbeats
        .record_heartbeat("M1", fleet.clock.now_ms() - 6 * MS_PER_MINUTE);

    fleet.detector.run_cycle().await.unwrap();

    let publisher = fleet.publisher.clone();
    assert!(
        eventually(|| publisher
            .get("M1")
            .is_some_and(|s| s.status == HeartbeatStatus::Offline))
        .await
    );
    assert!(fleet.publisher.get("M1").unwrap().is_offline);

    feed.abort();
}

#[tokio::test]
async fn test_unsubscribed_callback_never_runs_again() {
    let fleet = Fleet::new(vec![]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let subscription = fleet.publisher.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    fleet
        .publisher
        .on_heartbeat_change(&HeartbeatRecord::new("M1", Some(fleet.clock.now_ms())));
    subscription.unsubscribe();
    fleet
        .publisher
        .on_heartbeat_change(&HeartbeatRecord::new("M1", Some(fleet.clock.now_ms())));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fleet.publisher.subscriber_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsubscribe_races_with_publishing() {
    let fleet = Fleet::new(vec![]);
    let unsubscribed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let late_calls = Arc::new(AtomicUsize::new(0));

    let flag = unsubscribed.clone();
    let late = late_calls.clone();
    let subscription = fleet.publisher.subscribe(move |_| {
        if flag.load(Ordering::SeqCst) {
            late.fetch_add(1, Ordering::SeqCst);
        }
    });

    let publisher = fleet.publisher.clone();
    let now = fleet.clock.now_ms();
    let pump = tokio::task::spawn_blocking(move || {
        for i in 0..2_000 {
            publisher.on_heartbeat_change(&HeartbeatRecord::new(format!("M{}", i % 7), Some(now)));
        }
    });

    tokio::time::sleep(Duration::from_millis(1)).await;
    subscription.unsubscribe();
    unsubscribed.store(true, Ordering::SeqCst);

    pump.await.unwrap();
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_publisher_follows_shared_thresholds() {
    let fleet = Fleet::new(vec![]);
    let record = HeartbeatRecord::new("M1", Some(fleet.clock.now_ms() - 8 * MS_PER_MINUTE));

    assert!(fleet.publisher.on_heartbeat_change(&record).is_offline);

    fleet
        .thresholds
        .update(OfflineThresholds::new(10, 30).unwrap())
        .unwrap();
    assert!(!fleet.publisher.on_heartbeat_change(&record).is_offline);
    assert!(fleet.publisher.thresholds().is_same(&fleet.thresholds));
}

#[tokio::test]
async fn test_seed_does_not_notify() {
    let fleet = Fleet::new(vec![]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let _subscription = fleet.publisher.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    fleet.publisher.seed(vec![
        HeartbeatRecord::new("M1", Some(fleet.clock.now_ms())),
        HeartbeatRecord::new("M2", None),
    ]);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let snapshot = fleet.publisher.snapshot();
    assert!(!snapshot["M1"].is_offline);
    assert!(snapshot["M2"].is_offline);
}
