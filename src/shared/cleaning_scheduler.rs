//! Cleaning debt classification per machine type.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::alarm_engine::AlarmEngine;
use crate::controller::{
    evaluate_fleet, CycleReport, MachineCheck, MachineOutcome, PeriodicTask, DEFAULT_CONCURRENCY,
};
use crate::domain::{CleaningEntry, Machine, MachineType, NewAlarm};
use crate::error::MonitorError;
use crate::ports::{CleaningLog, MachineRegistry};
use crate::thresholds::{CleaningSeverity, CleaningThresholdTable, NO_CLEANING_HISTORY_DAYS};
use crate::time::{whole_days_between, Clock};

/// Whole days since the last cleaning; the sentinel when there is no history
pub fn days_since_cleaning(last: Option<&CleaningEntry>, now_ms: i64) -> i64 {
    last.map_or(NO_CLEANING_HISTORY_DAYS, |entry| {
        whole_days_between(entry.timestamp_ms, now_ms)
    })
}

/// Severity for a machine's cleaning debt. No history is always overdue,
/// whatever the configured day thresholds.
pub fn cleaning_severity(
    table: &CleaningThresholdTable,
    machine_type: MachineType,
    last: Option<&CleaningEntry>,
    days: i64,
) -> Option<CleaningSeverity> {
    match last {
        None => Some(CleaningSeverity::Overdue),
        Some(_) => table.classify(machine_type, days),
    }
}

#[derive(Clone)]
pub struct CleaningScheduler {
    registry: Arc<dyn MachineRegistry>,
    cleaning_log: Arc<dyn CleaningLog>,
    engine: Arc<AlarmEngine>,
    clock: Arc<dyn Clock>,
    table: Arc<CleaningThresholdTable>,
    concurrency: usize,
}

impl CleaningScheduler {
    pub fn new(
        registry: Arc<dyn MachineRegistry>,
        cleaning_log: Arc<dyn CleaningLog>,
        engine: Arc<AlarmEngine>,
        clock: Arc<dyn Clock>,
        table: CleaningThresholdTable,
    ) -> Self {
        Self {
            registry,
            cleaning_log,
            engine,
            clock,
            table: Arc::new(table),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn table(&self) -> &CleaningThresholdTable {
        &self.table
    }

    /// Raise at most one cleaning alarm, for the highest severity reached
    pub async fn evaluate_machine(&self, machine: &Machine) -> Result<MachineOutcome, MonitorError> {
        let last = self.cleaning_log.last_entry(&machine.machine_id).await?;
        let days = days_since_cleaning(last.as_ref(), self.clock.now_ms());

        let Some(severity) = cleaning_severity(&self.table, machine.machine_type, last.as_ref(), days)
        else {
            debug!(machine_id = %machine.machine_id, days, "Cleaning up to date");
            return Ok(MachineOutcome::default());
        };

        let creation = self
            .engine
            .create_alarm(cleaning_alarm(machine, severity, days, last.is_some()))
            .await?;

        Ok(MachineOutcome {
            flagged: true,
            alarm_created: creation.created,
        })
    }
}

fn cleaning_alarm(
    machine: &Machine,
    severity: CleaningSeverity,
    days: i64,
    has_history: bool,
) -> NewAlarm {
    let message = if has_history {
        format!(
            "{} needs {} cleaning: last cleaned {} days ago",
            machine.label(),
            severity.as_str(),
            days
        )
    } else {
        format!("{} has no cleaning history", machine.label())
    };

    NewAlarm::new(
        &machine.machine_id,
        severity.alarm_kind(),
        severity.alarm_severity(),
        message,
    )
    .with_metadata("days_since_cleaning", days)
    .with_metadata("machine_type", machine.machine_type)
    .with_metadata("location", &machine.location)
}

#[async_trait]
impl MachineCheck for CleaningScheduler {
    async fn evaluate(&self, machine: &Machine) -> Result<MachineOutcome, MonitorError> {
        self.evaluate_machine(machine).await
    }
}

#[async_trait]
impl PeriodicTask for CleaningScheduler {
    fn name(&self) -> &'static str {
        "cleaning-scheduler"
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
