//! Test utilities for property-based testing
//!
//! Generators for domain values (machine ids, machine types, heartbeat ages,
//! cleaning history) plus builders for the in-memory monitoring stack.

pub mod generators {
    use proptest::prelude::*;

    use crate::domain::{AlarmKind, Machine, MachineType, NotificationConfig, Severity};
    use crate::thresholds::OfflineThresholds;
    use crate::time::MS_PER_MINUTE;

    /// Generate a valid machine identifier
    pub fn machine_id() -> impl Strategy<Value = String> {
        prop::string::string_regex("[A-Za-z0-9][A-Za-z0-9._-]{0,20}")
            .expect("Valid regex for machine_id")
    }

    /// Generate an invalid machine identifier
    pub fn invalid_machine_id() -> impl Strategy<Value = String> {
        prop_oneof![
            // Empty
            Just("".to_string()),
            // Leading separator
            Just("-M1".to_string()),
            // Whitespace
            Just("M 1".to_string()),
            // Path separator
            Just("M1/../M2".to_string()),
            // Too long
            prop::string::string_regex("[A-Za-z0-9]{65,80}").expect("Valid regex"),
        ]
    }

    pub fn machine_type() -> impl Strategy<Value = MachineType> {
        prop::sample::select(MachineType::ALL.to_vec())
    }

    pub fn alarm_kind() -> impl Strategy<Value = AlarmKind> {
        prop::sample::select(AlarmKind::ALL.to_vec())
    }

    pub fn severity() -> impl Strategy<Value = Severity> {
        prop::sample::select(vec![
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ])
    }

    /// Generate a machine with a random type and notification setup
    pub fn machine() -> impl Strategy<Value = Machine> {
        (
            machine_id(),
            machine_type(),
            prop::collection::vec("[a-z]{3,8}@example\\.com", 0..3),
            prop::collection::vec(alarm_kind(), 0..4),
        )
            .prop_map(|(machine_id, machine_type, recipients, enabled_kinds)| Machine {
                name: format!("{} {}", machine_type, machine_id),
                serial: format!("SN-{}", machine_id),
                location: "Test site".to_string(),
                machine_id,
                machine_type,
                notification: NotificationConfig {
                    recipients,
                    enabled_kinds,
                    threshold_minutes: None,
                },
            })
    }

    /// Valid offline thresholds: critical always strictly above offline
    pub fn offline_thresholds() -> impl Strategy<Value = OfflineThresholds> {
        (1u32..60, 1u32..120).prop_map(|(offline, extra)| {
            OfflineThresholds::new(offline, offline + extra).expect("Valid thresholds")
        })
    }

    /// Heartbeat age in milliseconds, up to two days
    pub fn heartbeat_age_ms() -> impl Strategy<Value = i64> {
        0i64..(2 * 24 * 60 * MS_PER_MINUTE)
    }

    /// Days since the last cleaning, including values past every threshold
    pub fn days_since_cleaning() -> impl Strategy<Value = i64> {
        0i64..120
    }

    /// Generate a valid timestamp in epoch milliseconds
    /// Range: 2020-01-01 to 2030-12-31 (reasonable bounds)
    pub fn timestamp_ms() -> impl Strategy<Value = i64> {
        // 2020-01-01 00:00:00 UTC = 1577836800000 ms
        // 2030-12-31 23:59:59 UTC = 1924991999000 ms
        1577836800000i64..1924991999000i64
    }

    /// Generate a valid operator name
    pub fn operator() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-z][a-z0-9.@ -]{0,40}").expect("Valid regex for operator")
    }
}

pub mod helpers {
    use std::sync::Arc;

    use crate::alarm_engine::AlarmEngine;
    use crate::domain::{Machine, MachineType, NotificationConfig};
    use crate::id_generator::SequentialIdGenerator;
    use crate::memory::{InMemoryAlarmStore, InMemoryHeartbeatRepository, InMemoryMachineRegistry};
    use crate::offline_detector::OfflineDetector;
    use crate::thresholds::SharedOfflineThresholds;
    use crate::time::FixedClock;

    pub fn machine(machine_id: &str, machine_type: MachineType) -> Machine {
        Machine {
            machine_id: machine_id.to_string(),
            machine_type,
            name: format!("{} machine", machine_type),
            serial: format!("SN-{}", machine_id),
            location: "Test site".to_string(),
            notification: NotificationConfig::default(),
        }
    }

    /// In-memory detector wiring shared by property tests
    pub struct DetectorHarness {
        pub detector: OfflineDetector,
        pub heartbeats: Arc<InMemoryHeartbeatRepository>,
        pub alarms: Arc<InMemoryAlarmStore>,
        pub clock: FixedClock,
    }

    pub fn detector_harness(machines: Vec<Machine>, now_ms: i64) -> DetectorHarness {
        let clock = FixedClock::from_epoch_ms(now_ms);
        let heartbeats = Arc::new(InMemoryHeartbeatRepository::new());
        let alarms = Arc::new(InMemoryAlarmStore::new());
        let engine = Arc::new(AlarmEngine::new(
            alarms.clone(),
            Arc::new(clock.clone()),
            Arc::new(SequentialIdGenerator::new("alarm")),
        ));
        let detector = OfflineDetector::new(
            Arc::new(InMemoryMachineRegistry::new(machines)),
            heartbeats.clone(),
            engine,
            Arc::new(clock.clone()),
            SharedOfflineThresholds::default(),
        );

        DetectorHarness {
            detector,
            heartbeats,
            alarms,
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::PeriodicTask;
    use crate::domain::HeartbeatRecord;
    use crate::offline_detector::classify;
    use crate::thresholds::{CleaningThresholdTable, OfflineThresholds};
    use crate::validators::{validate_machine_id, validate_operator};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_machine_id_generator(id in generators::machine_id()) {
            prop_assert!(validate_machine_id(&id).is_ok());
        }

        #[test]
        fn test_invalid_machine_id_generator(id in generators::invalid_machine_id()) {
            prop_assert!(validate_machine_id(&id).is_err());
        }

        #[test]
        fn test_missing_heartbeat_never_online(now in generators::timestamp_ms()) {
            let thresholds = OfflineThresholds::default();
            prop_assert!(classify(None, now, &thresholds).is_offline());
        }

        #[test]
        fn test_classification_matches_threshold(
            now in generators::timestamp_ms(),
            age in generators::heartbeat_age_ms(),
        ) {
            let thresholds = OfflineThresholds::default();
            let record = HeartbeatRecord::new("M1", Some(now - age));
            let liveness = classify(Some(&record), now, &thresholds);
            prop_assert_eq!(liveness.is_offline(), age > thresholds.offline_ms());
        }

        #[test]
        fn test_offline_thresholds_generator(thresholds in generators::offline_thresholds()) {
            prop_assert!(thresholds.validate().is_ok());
        }

        #[test]
        fn test_cleaning_severity_is_monotonic(
            machine_type in generators::machine_type(),
            days in generators::days_since_cleaning(),
        ) {
            let table = CleaningThresholdTable::default();
            prop_assert!(table.classify(machine_type, days) <= table.classify(machine_type, days + 1));
        }

        #[test]
        fn test_operator_generator(operator in generators::operator()) {
            prop_assert!(validate_operator(&operator).is_ok());
        }

        #[test]
        fn test_generated_machine_alarms_are_valid(
            machine in generators::machine(),
            kind in generators::alarm_kind(),
            severity in generators::severity(),
        ) {
            prop_assert!(validate_machine_id(&machine.machine_id).is_ok());
            let alarm = crate::domain::NewAlarm::new(&machine.machine_id, kind, severity, machine.label());
            prop_assert_eq!(alarm.kind, kind);
            prop_assert!(alarm.message.contains(&machine.serial));
        }

        #[test]
        fn test_detector_flags_every_machine_without_heartbeat(
            machines in prop::collection::hash_set(generators::machine_id(), 1..6),
        ) {
            let machines: Vec<_> = machines
                .iter()
                .map(|id| helpers::machine(id, crate::domain::MachineType::Snack))
                .collect();
            let count = machines.len();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let harness = helpers::detector_harness(machines, 1_700_000_000_000);

            let report = runtime.block_on(harness.detector.run_cycle()).unwrap();

            prop_assert_eq!(report.flagged, count);
            prop_assert_eq!(harness.alarms.len(), count);
        }
    }
}
