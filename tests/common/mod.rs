//! Shared wiring for integration tests: the in-memory monitoring stack
//! around a controllable clock.

#![allow(dead_code)]

use std::sync::Arc;

use vending_monitor::shared::alarm_engine::AlarmEngine;
use vending_monitor::shared::cleaning_scheduler::CleaningScheduler;
use vending_monitor::shared::domain::{AlarmKind, Machine, MachineType, NotificationConfig};
use vending_monitor::shared::id_generator::SequentialIdGenerator;
use vending_monitor::shared::live_status::LiveStatusPublisher;
use vending_monitor::shared::memory::{
    InMemoryAlarmStore, InMemoryCleaningLog, InMemoryHeartbeatRepository,
    InMemoryMachineRegistry, RecordingDispatcher,
};
use vending_monitor::shared::notify::AlarmNotifier;
use vending_monitor::shared::offline_detector::OfflineDetector;
use vending_monitor::shared::thresholds::{CleaningThresholdTable, SharedOfflineThresholds};
use vending_monitor::shared::time::FixedClock;

/// 2024-01-15T10:30:00Z
pub const NOW_MS: i64 = 1_705_314_600_000;

pub fn machine(machine_id: &str, machine_type: MachineType) -> Machine {
    Machine {
        machine_id: machine_id.to_string(),
        machine_type,
        name: format!("{} machine", machine_type),
        serial: format!("SN-{}", machine_id),
        location: "Lobby".to_string(),
        notification: NotificationConfig::default(),
    }
}

/// Machine with notifications enabled for every kind
pub fn notified_machine(machine_id: &str, machine_type: MachineType) -> Machine {
    Machine {
        notification: NotificationConfig {
            recipients: vec!["ops@example.com".to_string()],
            enabled_kinds: AlarmKind::ALL.to_vec(),
            threshold_minutes: None,
        },
        ..machine(machine_id, machine_type)
    }
}

pub struct Fleet {
    pub clock: FixedClock,
    pub registry: Arc<InMemoryMachineRegistry>,
    pub heartbeats: Arc<InMemoryHeartbeatRepository>,
    pub alarms: Arc<InMemoryAlarmStore>,
    pub cleaning_log: Arc<InMemoryCleaningLog>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub thresholds: SharedOfflineThresholds,
    pub engine: Arc<AlarmEngine>,
    pub detector: Arc<OfflineDetector>,
    pub scheduler: Arc<CleaningScheduler>,
    pub publisher: LiveStatusPublisher,
}

impl Fleet {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self::with_store(machines, InMemoryAlarmStore::new())
    }

    pub fn with_store(machines: Vec<Machine>, store: InMemoryAlarmStore) -> Self {
        let clock = FixedClock::from_epoch_ms(NOW_MS);
        let registry = Arc::new(InMemoryMachineRegistry::new(machines));
        let heartbeats = Arc::new(InMemoryHeartbeatRepository::new());
        let alarms = Arc::new(store);
        let cleaning_log = Arc::new(InMemoryCleaningLog::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let thresholds = SharedOfflineThresholds::default();

        let notifier = Arc::new(AlarmNotifier::new(registry.clone(), dispatcher.clone()));
        let engine = Arc::new(
            AlarmEngine::new(
                alarms.clone(),
                Arc::new(clock.clone()),
                Arc::new(SequentialIdGenerator::new("alarm")),
            )
            .with_notifier(notifier),
        );
        let detector = Arc::new(OfflineDetector::new(
            registry.clone(),
            heartbeats.clone(),
            engine.clone(),
            Arc::new(clock.clone()),
            thresholds.clone(),
        ));
        let scheduler = Arc::new(CleaningScheduler::new(
            registry.clone(),
            cleaning_log.clone(),
            engine.clone(),
            Arc::new(clock.clone()),
            CleaningThresholdTable::default(),
        ));
        let publisher = LiveStatusPublisher::new(thresholds.clone(), Arc::new(clock.clone()));

        Self {
            clock,
            registry,
            heartbeats,
            alarms,
            cleaning_log,
            dispatcher,
            thresholds,
            engine,
            detector,
            scheduler,
            publisher,
        }
    }
}
