//! Cleaning scheduler cycles against the in-memory stack

mod common;

use common::{machine, notified_machine, Fleet};
use vending_monitor::shared::controller::PeriodicTask;
use vending_monitor::shared::domain::{
    AlarmFilter, AlarmKind, CleaningEntry, MachineType, Severity,
};
use vending_monitor::shared::time::{Clock, MS_PER_DAY};

fn cleaned(fleet: &Fleet, machine_id: &str, days_ago: i64) {
    fleet.cleaning_log.record(CleaningEntry {
        machine_id: machine_id.to_string(),
        timestamp_ms: fleet.clock.now_ms() - days_ago * MS_PER_DAY,
        performed_by: Some("tech-7".to_string()),
    });
}

#[tokio::test]
async fn test_ice_cream_twelve_days_is_emergency() {
    let fleet = Fleet::new(vec![notified_machine("IC1", MachineType::IceCream)]);
    cleaned(&fleet, "IC1", 12);

    let report = fleet.scheduler.run_cycle().await.unwrap();

    assert_eq!(report.flagged, 1);
    assert_eq!(report.alarms_created, 1);
    let alarms = fleet.engine.list(&AlarmFilter::default()).await.unwrap();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].kind, AlarmKind::CleaningEmergency);
    assert_eq!(alarms[0].severity, Severity::High);
    assert_eq!(alarms[0].metadata.get("days_since_cleaning").unwrap(), "12");
    assert!(alarms[0].message.contains("12 days ago"));
    assert_eq!(fleet.dispatcher.sent().len(), 1);
}

#[tokio::test]
async fn test_thresholds_differ_by_machine_type() {
    let fleet = Fleet::new(vec![
        machine("IC1", MachineType::IceCream),
        machine("CF1", MachineType::Coffee),
        machine("SN1", MachineType::Snack),
        machine("PF1", MachineType::Perfume),
    ]);
    for id in ["IC1", "CF1", "SN1", "PF1"] {
        cleaned(&fleet, id, 6);
    }

    let report = fleet.scheduler.run_cycle().await.unwrap();

    // Six days: routine for ice cream and coffee, nothing for snack or perfume
    assert_eq!(report.evaluated, 4);
    assert_eq!(report.flagged, 2);
    let routine = fleet
        .engine
        .list(&AlarmFilter {
            kind: Some(AlarmKind::CleaningRoutine),
            ..AlarmFilter::default()
        })
        .await
        .unwrap();
    let mut machines: Vec<_> = routine.iter().map(|a| a.machine_id.as_str()).collect();
    machines.sort();
    assert_eq!(machines, vec!["CF1", "IC1"]);
}

#[tokio::test]
async fn test_no_history_is_overdue() {
    let fleet = Fleet::new(vec![machine("SN1", MachineType::Snack)]);

    fleet.scheduler.run_cycle().await.unwrap();

    let alarms = fleet.engine.list(&AlarmFilter::default()).await.unwrap();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].kind, AlarmKind::CleaningOverdue);
    assert_eq!(alarms[0].severity, Severity::Critical);
    assert!(alarms[0].message.contains("no cleaning history"));
}

#[tokio::test]
async fn test_repeated_cycles_deduplicate() {
    let fleet = Fleet::new(vec![machine("CF1", MachineType::Coffee)]);
    cleaned(&fleet, "CF1", 11);

    fleet.scheduler.run_cycle().await.unwrap();
    let second = fleet.scheduler.run_cycle().await.unwrap();

    assert_eq!(second.flagged, 1);
    assert_eq!(second.alarms_created, 0);
    assert_eq!(fleet.alarms.len(), 1);
}

#[tokio::test]
async fn test_growing_debt_raises_next_severity() {
    let fleet = Fleet::new(vec![machine("IC1", MachineType::IceCream)]);
    cleaned(&fleet, "IC1", 4);
    fleet.scheduler.run_cycle().await.unwrap();

    fleet.clock.advance(chrono::Duration::days(4));
    fleet.scheduler.run_cycle().await.unwrap();

    let kinds: Vec<_> = fleet
        .engine
        .list(&AlarmFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(kinds, vec![AlarmKind::CleaningDeep, AlarmKind::CleaningRoutine]);
}

#[tokio::test]
async fn test_fresh_cleaning_raises_nothing() {
    let fleet = Fleet::new(vec![machine("PF1", MachineType::Perfume)]);
    cleaned(&fleet, "PF1", 0);

    let report = fleet.scheduler.run_cycle().await.unwrap();

    assert_eq!(report.evaluated, 1);
    assert_eq!(report.flagged, 0);
    assert!(fleet.alarms.is_empty());
}

#[tokio::test]
async fn test_cleaning_log_failure_is_isolated() {
    let fleet = Fleet::new(vec![
        machine("IC1", MachineType::IceCream),
        machine("IC2", MachineType::IceCream),
    ]);
    fleet.cleaning_log.fail_for("IC1");
    cleaned(&fleet, "IC2", 15);

    let report = fleet.scheduler.run_cycle().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(report.alarms_created, 1);
    let alarms = fleet.engine.list(&AlarmFilter::default()).await.unwrap();
    assert_eq!(alarms[0].machine_id, "IC2");
    assert_eq!(alarms[0].kind, AlarmKind::CleaningOverdue);
}
