//! Heartbeat staleness detection.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::alarm_engine::AlarmEngine;
use crate::controller::{
    evaluate_fleet, CycleReport, MachineCheck, MachineOutcome, PeriodicTask, DEFAULT_CONCURRENCY,
};
use crate::domain::{AlarmKind, HeartbeatRecord, HeartbeatStatus, Machine, NewAlarm, Severity};
use crate::error::MonitorError;
use crate::ports::{HeartbeatRepository, MachineRegistry};
use crate::thresholds::{OfflineThresholds, SharedOfflineThresholds};
use crate::time::{Clock, MS_PER_MINUTE};

/// Liveness of one machine at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Online,
    Offline,
    CriticalOffline,
}

impl Liveness {
    pub fn is_offline(&self) -> bool {
        !matches!(self, Liveness::Online)
    }

    fn alarm(&self) -> Option<(AlarmKind, Severity)> {
        match self {
            Liveness::Online => None,
            Liveness::Offline => Some((AlarmKind::Offline, Severity::High)),
            Liveness::CriticalOffline => Some((AlarmKind::CriticalOffline, Severity::Critical)),
        }
    }
}

/// Milliseconds since the last heartbeat; `None` means never seen
pub fn heartbeat_age_ms(record: Option<&HeartbeatRecord>, now_ms: i64) -> Option<i64> {
    record
        .and_then(|r| r.last_seen_at_ms)
        .map(|last_seen| now_ms.saturating_sub(last_seen))
}

/// Classify a heartbeat; a missing record or timestamp is infinitely stale
pub fn classify(
    record: Option<&HeartbeatRecord>,
    now_ms: i64,
    thresholds: &OfflineThresholds,
) -> Liveness {
    match heartbeat_age_ms(record, now_ms) {
        None => Liveness::CriticalOffline,
        Some(age) if age > thresholds.critical_ms() => Liveness::CriticalOffline,
        Some(age) if age > thresholds.offline_ms() => Liveness::Offline,
        Some(_) => Liveness::Online,
    }
}

/// Flags machines whose last heartbeat is older than the offline threshold.
///
/// Per machine and cycle it performs at most one status write and at most
/// one alarm-creation call. Alarms are never resolved here, even when the
/// machine comes back.
#[derive(Clone)]
pub struct OfflineDetector {
    registry: Arc<dyn MachineRegistry>,
    heartbeats: Arc<dyn HeartbeatRepository>,
    engine: Arc<AlarmEngine>,
    clock: Arc<dyn Clock>,
    thresholds: SharedOfflineThresholds,
    concurrency: usize,
}

impl OfflineDetector {
    pub fn new(
        registry: Arc<dyn MachineRegistry>,
        heartbeats: Arc<dyn HeartbeatRepository>,
        engine: Arc<AlarmEngine>,
        clock: Arc<dyn Clock>,
        thresholds: SharedOfflineThresholds,
    ) -> Self {
        Self {
            registry,
            heartbeats,
            engine,
            clock,
            thresholds,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Handle shared with the live status publisher
    pub fn thresholds(&self) -> &SharedOfflineThresholds {
        &self.thresholds
    }

    pub async fn evaluate_machine(&self, machine: &Machine) -> Result<MachineOutcome, MonitorError> {
        let record = self.heartbeats.read(&machine.machine_id).await?;
        let now_ms = self.clock.now_ms();
        let liveness = classify(record.as_ref(), now_ms, &self.thresholds.get());
        let stored = record
            .as_ref()
            .map(|r| r.status)
            .unwrap_or(HeartbeatStatus::Unknown);

        let Some((kind, severity)) = liveness.alarm() else {
            if stored == HeartbeatStatus::Offline {
                self.heartbeats
                    .write_status(&machine.machine_id, HeartbeatStatus::Online)
                    .await?;
                info!(machine_id = %machine.machine_id, "Machine back online");
            } else {
                debug!(machine_id = %machine.machine_id, "Machine online");
            }
            return Ok(MachineOutcome::default());
        };

        if stored != HeartbeatStatus::Offline {
            self.heartbeats
                .write_status(&machine.machine_id, HeartbeatStatus::Offline)
                .await?;
            info!(
                machine_id = %machine.machine_id,
                kind = %kind,
                "Machine marked offline"
            );
        }

        let age_ms = heartbeat_age_ms(record.as_ref(), now_ms);
        let creation = self
            .engine
            .create_alarm(offline_alarm(machine, kind, severity, age_ms))
            .await?;

        Ok(MachineOutcome {
            flagged: true,
            alarm_created: creation.created,
        })
    }
}

fn offline_alarm(
    machine: &Machine,
    kind: AlarmKind,
    severity: Severity,
    age_ms: Option<i64>,
) -> NewAlarm {
    let (message, age_minutes) = match age_ms {
        Some(age) => {
            let minutes = age / MS_PER_MINUTE;
            (
                format!(
                    "{} has not sent a heartbeat for {} minutes",
                    machine.label(),
                    minutes
                ),
                minutes.to_string(),
            )
        }
        None => (
            format!("{} has never sent a heartbeat", machine.label()),
            "never".to_string(),
        ),
    };

    NewAlarm::new(&machine.machine_id, kind, severity, message)
        .with_metadata("age_minutes", age_minutes)
        .with_metadata("location", &machine.location)
        .with_metadata("machine_type", machine.machine_type)
}

#[async_trait]
impl MachineCheck for OfflineDetector {
    async fn evaluate(&self, machine: &Machine) -> Result<MachineOutcome, MonitorError> {
        self.evaluate_machine(machine).await
    }
}

#[async_trait]
impl PeriodicTask for OfflineDetector {
    fn name(&self) -> &'static str {
        "offline-detector"
    }

    async fn run_cycle(&self) -> Result<CycleReport, MonitorError> {
        let started = Instant::now();
        let mut report = CycleReport::new(self.name(), self.clock.now_ms());

        let machines = self.registry.list().await?;
        evaluate_fleet(self, machines, self.concurrency, &mut report).await;

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlarmFilter, AlarmStatus, MachineType, NotificationConfig};
    use crate::id_generator::SequentialIdGenerator;
    use crate::memory::{InMemoryAlarmStore, InMemoryHeartbeatRepository, InMemoryMachineRegistry};
    use crate::ports::AlarmStore;
    use crate::time::FixedClock;

    struct Fixture {
        detector: OfflineDetector,
        heartbeats: Arc<InMemoryHeartbeatRepository>,
        alarms: Arc<InMemoryAlarmStore>,
        clock: FixedClock,
    }

    fn machine(id: &str) -> Machine {
        Machine {
            machine_id: id.to_string(),
            machine_type: MachineType::Coffee,
            name: "Coffee".to_string(),
            serial: format!("SN-{}", id),
            location: "Lobby".to_string(),
            notification: NotificationConfig::default(),
        }
    }

    fn fixture(ids: &[&str]) -> Fixture {
        let clock = FixedClock::from_rfc3339("2024-03-01T12:00:00Z").unwrap();
        let heartbeats = Arc::new(InMemoryHeartbeatRepository::new());
        let alarms = Arc::new(InMemoryAlarmStore::new());
        let registry = Arc::new(InMemoryMachineRegistry::new(
            ids.iter().map(|id| machine(id)).collect(),
        ));
        let engine = Arc::new(AlarmEngine::new(
            alarms.clone(),
            Arc::new(clock.clone()),
            Arc::new(SequentialIdGenerator::new("alarm")),
        ));
        let detector = OfflineDetector::new(
            registry,
            heartbeats.clone(),
            engine,
            Arc::new(clock.clone()),
            SharedOfflineThresholds::default(),
        );
        Fixture {
            detector,
            heartbeats,
            alarms,
            clock,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        let t = OfflineThresholds::default();
        let now = 100 * MS_PER_MINUTE;
        let at = |minutes_ago: i64| HeartbeatRecord::new("M1", Some(now - minutes_ago * MS_PER_MINUTE));

        assert_eq!(classify(Some(&at(0)), now, &t), Liveness::Online);
        // exactly at the threshold is still online
        assert_eq!(classify(Some(&at(5)), now, &t), Liveness::Online);
        assert_eq!(classify(Some(&at(6)), now, &t), Liveness::Offline);
        assert_eq!(classify(Some(&at(15)), now, &t), Liveness::Offline);
        assert_eq!(classify(Some(&at(16)), now, &t), Liveness::CriticalOffline);
    }

    #[test]
    fn test_missing_heartbeat_is_offline() {
        let t = OfflineThresholds::default();
        assert!(classify(None, 0, &t).is_offline());
        assert!(classify(Some(&HeartbeatRecord::new("M1", None)), 0, &t).is_offline());
    }

    #[test]
    fn test_degenerate_timestamps_do_not_overflow() {
        let t = OfflineThresholds::default();
        let ancient = HeartbeatRecord::new("M1", Some(i64::MIN));
        let future = HeartbeatRecord::new("M1", Some(i64::MAX));

        assert_eq!(heartbeat_age_ms(Some(&ancient), 1_705_314_600_000), Some(i64::MAX));
        assert_eq!(
            classify(Some(&ancient), 1_705_314_600_000, &t),
            Liveness::CriticalOffline
        );
        assert_eq!(classify(Some(&future), 1_705_314_600_000, &t), Liveness::Online);
    }

    #[tokio::test]
    async fn test_marks_stale_machine_offline() {
        let f = fixture(&["M1"]);
        f.heartbeats
            .record_heartbeat("M1", f.clock.now_ms() - 6 * MS_PER_MINUTE);

        let report = f.detector.run_cycle().await.unwrap();

        assert_eq!(report.evaluated, 1);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.alarms_created, 1);
        let record = f.heartbeats.snapshot("M1").unwrap();
        assert_eq!(record.status, HeartbeatStatus::Offline);
        assert_eq!(record.last_seen_at_ms, Some(f.clock.now_ms() - 6 * MS_PER_MINUTE));

        let alarms = f.alarms.all();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].kind, AlarmKind::Offline);
        assert_eq!(alarms[0].severity, Severity::High);
        assert_eq!(alarms[0].metadata.get("age_minutes").map(String::as_str), Some("6"));
    }

    #[tokio::test]
    async fn test_already_offline_skips_status_write() {
        let f = fixture(&["M1"]);
        f.heartbeats
            .record_heartbeat("M1", f.clock.now_ms() - 6 * MS_PER_MINUTE);

        f.detector.run_cycle().await.unwrap();
        let second = f.detector.run_cycle().await.unwrap();

        assert_eq!(f.heartbeats.status_writes(), 1);
        assert_eq!(second.alarms_created, 0);
        assert_eq!(f.alarms.len(), 1);
    }

    #[tokio::test]
    async fn test_escalates_to_critical() {
        let f = fixture(&["M1"]);
        f.heartbeats
            .record_heartbeat("M1", f.clock.now_ms() - 6 * MS_PER_MINUTE);
        f.detector.run_cycle().await.unwrap();

        f.clock.advance_minutes(10);
        let report = f.detector.run_cycle().await.unwrap();

        assert_eq!(report.alarms_created, 1);
        let critical = f
            .alarms
            .query(&AlarmFilter::active_for("M1", AlarmKind::CriticalOffline))
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_recovery_writes_online_and_keeps_alarm() {
        let f = fixture(&["M1"]);
        f.heartbeats
            .record_heartbeat("M1", f.clock.now_ms() - 6 * MS_PER_MINUTE);
        f.detector.run_cycle().await.unwrap();

        f.heartbeats.record_heartbeat("M1", f.clock.now_ms());
        let report = f.detector.run_cycle().await.unwrap();

        assert_eq!(report.flagged, 0);
        assert_eq!(f.heartbeats.snapshot("M1").unwrap().status, HeartbeatStatus::Online);
        assert_eq!(f.alarms.all()[0].status, AlarmStatus::Active);
    }

    #[tokio::test]
    async fn test_read_failure_is_isolated() {
        let f = fixture(&["M1", "M2", "M3"]);
        f.heartbeats.fail_reads_for("M2");

        let report = f.detector.run_cycle().await.unwrap();

        assert_eq!(report.evaluated, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.alarms_created, 2);
    }

    #[tokio::test]
    async fn test_write_failure_skips_alarm_for_that_machine() {
        let f = fixture(&["M1", "M2"]);
        f.heartbeats.fail_writes_for("M1");

        let report = f.detector.run_cycle().await.unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(f.alarms.len(), 1);
        assert_eq!(f.alarms.all()[0].machine_id, "M2");
    }

    #[tokio::test]
    async fn test_threshold_update_applies_next_cycle() {
        let f = fixture(&["M1"]);
        f.heartbeats
            .record_heartbeat("M1", f.clock.now_ms() - 3 * MS_PER_MINUTE);
        assert_eq!(f.detector.run_cycle().await.unwrap().flagged, 0);

        f.detector
            .thresholds()
            .update(OfflineThresholds::new(2, 10).unwrap())
            .unwrap();

        assert_eq!(f.detector.run_cycle().await.unwrap().flagged, 1);
    }

    #[tokio::test]
    async fn test_registry_failure_fails_cycle() {
        let registry = Arc::new(InMemoryMachineRegistry::default());
        registry.set_unavailable(true);
        let clock = FixedClock::from_epoch_ms(0);
        let engine = Arc::new(AlarmEngine::new(
            Arc::new(InMemoryAlarmStore::new()),
            Arc::new(clock.clone()),
            Arc::new(SequentialIdGenerator::new("a")),
        ));
        let detector = OfflineDetector::new(
            registry,
            Arc::new(InMemoryHeartbeatRepository::new()),
            engine,
            Arc::new(clock),
            SharedOfflineThresholds::default(),
        );

        assert!(matches!(
            detector.run_cycle().await,
            Err(MonitorError::TransientIo(_))
        ));
    }
}
