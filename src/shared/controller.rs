//! Periodic monitor loops.
//!
//! A [`MonitorController`] owns one [`PeriodicTask`] and runs it on a fixed
//! interval until stopped. Several controllers can run side by side; none of
//! them relies on process-wide state.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::Machine;
use crate::error::MonitorError;

/// Default number of machines evaluated concurrently within a cycle
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Summary of one pass over the fleet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub task: String,
    pub started_at_ms: i64,
    pub evaluated: usize,
    /// Machines found offline or behind on cleaning
    pub flagged: usize,
    pub alarms_created: usize,
    pub failures: usize,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn new(task: &str, started_at_ms: i64) -> Self {
        Self {
            task: task.to_string(),
            started_at_ms,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: &MachineOutcome) {
        self.evaluated += 1;
        if outcome.flagged {
            self.flagged += 1;
        }
        if outcome.alarm_created {
            self.alarms_created += 1;
        }
    }
}

/// What evaluating a single machine did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineOutcome {
    pub flagged: bool,
    pub alarm_created: bool,
}

/// Per-machine step of a fleet scan
#[async_trait]
pub trait MachineCheck: Clone + Send + Sync + 'static {
    async fn evaluate(&self, machine: &Machine) -> Result<MachineOutcome, MonitorError>;
}

/// Evaluate every machine with at most `concurrency` evaluations in flight.
///
/// Each evaluation runs on its own task: an error or a panic is counted as a
/// failure for that machine and never cancels its siblings.
pub async fn evaluate_fleet<C: MachineCheck>(
    check: &C,
    machines: Vec<Machine>,
    concurrency: usize,
    report: &mut CycleReport,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(machines.len());

    for machine in machines {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "Fan-out semaphore closed");
                report.failures += 1;
                continue;
            }
        };
        let check = check.clone();
        let machine_id = machine.machine_id.clone();

        let handle = tokio::spawn(async move {
            let result = check.evaluate(&machine).await;
            drop(permit);
            result
        });
        handles.push((machine_id, handle));
    }

    for (machine_id, handle) in handles {
        match handle.await {
            Ok(Ok(outcome)) => report.record(&outcome),
            Ok(Err(e)) => {
                warn!(machine_id = %machine_id, error = %e, "Machine evaluation failed");
                report.failures += 1;
            }
            Err(e) => {
                error!(machine_id = %machine_id, error = %e, "Machine evaluation panicked");
                report.failures += 1;
            }
        }
    }
}

/// A job run once per controller tick
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_cycle(&self) -> Result<CycleReport, MonitorError>;
}

/// Point-in-time view of a controller
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub task: &'static str,
    pub running: bool,
    pub interval_secs: u64,
    pub cycles_completed: u64,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct CycleHistory {
    cycles_completed: u64,
    last_report: Option<CycleReport>,
    last_error: Option<String>,
}

impl CycleHistory {
    fn record(&mut self, result: &Result<CycleReport, MonitorError>) {
        self.cycles_completed += 1;
        match result {
            Ok(report) => {
                self.last_report = Some(report.clone());
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e.to_string()),
        }
    }
}

#[derive(Default)]
struct LoopHandle {
    cancel: Option<CancellationToken>,
    join: Option<JoinHandle<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MonitorController<T: PeriodicTask> {
    task: Arc<T>,
    interval: Duration,
    running: Arc<AtomicBool>,
    history: Arc<Mutex<CycleHistory>>,
    handle: Mutex<LoopHandle>,
}

impl<T: PeriodicTask> MonitorController<T> {
    pub fn new(task: Arc<T>, interval: Duration) -> Self {
        Self {
            task,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(CycleHistory::default())),
            handle: Mutex::new(LoopHandle::default()),
        }
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    /// Spawn the timer loop; the first cycle runs immediately.
    ///
    /// Returns false, and does nothing, when already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut handle = lock(&self.handle);
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(task = self.task.name(), "Monitor already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_loop(
            self.task.clone(),
            self.interval,
            self.history.clone(),
            cancel.clone(),
        ));

        handle.cancel = Some(cancel);
        handle.join = Some(join);

        info!(
            task = self.task.name(),
            interval_secs = self.interval.as_secs(),
            "Monitor started"
        );
        true
    }

    /// Halt the timer. A cycle already in progress runs to completion.
    ///
    /// Returns false when the controller was not running.
    pub fn stop(&self) -> bool {
        let mut handle = lock(&self.handle);
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(cancel) = handle.cancel.take() {
            cancel.cancel();
        }
        info!(task = self.task.name(), "Monitor stopping");
        true
    }

    /// Stop and wait for the in-flight cycle, if any, to finish
    pub async fn shutdown(&self) {
        self.stop();
        let join = lock(&self.handle).join.take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                error!(task = self.task.name(), error = %e, "Monitor loop panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> MonitorStatus {
        let history = lock(&self.history);
        MonitorStatus {
            task: self.task.name(),
            running: self.is_running(),
            interval_secs: self.interval.as_secs(),
            cycles_completed: history.cycles_completed,
            last_report: history.last_report.clone(),
            last_error: history.last_error.clone(),
        }
    }

    /// Run one cycle now, outside the timer, and record it
    pub async fn run_once(&self) -> Result<CycleReport, MonitorError> {
        let result = run_and_log(self.task.as_ref()).await;
        lock(&self.history).record(&result);
        result
    }
}

impl<T: PeriodicTask> Drop for MonitorController<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<T: PeriodicTask>(
    task: Arc<T>,
    period: Duration,
    history: Arc<Mutex<CycleHistory>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(task = task.name(), "Monitor stopped");
                break;
            }
            _ = interval.tick() => {
                let result = run_and_log(task.as_ref()).await;
                lock(&history).record(&result);
            }
        }
    }
}

async fn run_and_log<T: PeriodicTask + ?Sized>(task: &T) -> Result<CycleReport, MonitorError> {
    let started = Instant::now();
    let result = task.run_cycle().await;

    match &result {
        Ok(report) => info!(
            task = task.name(),
            evaluated = report.evaluated,
            flagged = report.flagged,
            alarms_created = report.alarms_created,
            failures = report.failures,
            duration_ms = report.duration_ms,
            "Monitor cycle complete"
        ),
        Err(e) => error!(
            task = task.name(),
            error = %e,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Monitor cycle failed"
        ),
    }

    result
}
