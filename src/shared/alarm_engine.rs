//! Alarm creation, deduplication and lifecycle.
//!
//! At most one `active` alarm exists per `(machine_id, kind)`. Stores that
//! offer a conditional insert enforce that atomically; for the others the
//! engine serializes check-then-insert per key within the process.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::domain::{dedup_key, Alarm, AlarmFilter, AlarmPatch, AlarmStatus, NewAlarm};
use crate::error::{MonitorError, StoreError};
use crate::id_generator::IdGenerator;
use crate::notify::AlarmNotifier;
use crate::ports::{AlarmStore, InsertOutcome};
use crate::time::{Clock, MS_PER_DAY};
use crate::validators::{validate_machine_id, validate_operator, validate_purge_days};

/// Result of `create_alarm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmCreation {
    pub alarm_id: String,
    /// False when an active alarm for the same machine and kind already existed
    pub created: bool,
}

/// Aggregate outcome of a bulk purge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub matched: usize,
    pub deleted: usize,
    pub failed: usize,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

pub struct AlarmEngine {
    store: Arc<dyn AlarmStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    notifier: Option<Arc<AlarmNotifier>>,
    key_locks: Mutex<HashMap<String, KeyLock>>,
}

impl AlarmEngine {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            notifier: None,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Hand every newly created alarm to `notifier`
    pub fn with_notifier(mut self, notifier: Arc<AlarmNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Create an active alarm unless one already exists for the same
    /// machine and kind, in which case its id is returned unchanged.
    pub async fn create_alarm(&self, request: NewAlarm) -> Result<AlarmCreation, MonitorError> {
        validate_machine_id(&request.machine_id)?;

        let alarm = Alarm {
            alarm_id: self.ids.next_id(),
            machine_id: request.machine_id,
            kind: request.kind,
            severity: request.severity,
            message: request.message,
            status: AlarmStatus::Active,
            created_at_ms: self.clock.now_ms(),
            acknowledged_at_ms: None,
            acknowledged_by: None,
            resolved_at_ms: None,
            metadata: request.metadata,
        };

        match self.insert_deduplicated(&alarm).await? {
            InsertOutcome::Existing(alarm_id) => {
                debug!(
                    machine_id = %alarm.machine_id,
                    kind = %alarm.kind,
                    alarm_id = %alarm_id,
                    "Active alarm already exists"
                );
                Ok(AlarmCreation {
                    alarm_id,
                    created: false,
                })
            }
            InsertOutcome::Inserted => {
                info!(
                    machine_id = %alarm.machine_id,
                    kind = %alarm.kind,
                    severity = alarm.severity.as_str(),
                    alarm_id = %alarm.alarm_id,
                    "Alarm created"
                );
                if let Some(notifier) = &self.notifier {
                    notifier.notify(&alarm).await;
                }
                Ok(AlarmCreation {
                    alarm_id: alarm.alarm_id,
                    created: true,
                })
            }
        }
    }

    async fn insert_deduplicated(&self, alarm: &Alarm) -> Result<InsertOutcome, StoreError> {
        if self.store.has_conditional_insert() {
            return self.store.insert_if_no_active(alarm).await;
        }

        let key = dedup_key(&alarm.machine_id, alarm.kind);
        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock().await;
            self.store.insert_if_no_active(alarm).await
        };
        drop(lock);
        self.release_key_lock(&key);
        outcome
    }

    fn key_lock(&self, key: &str) -> KeyLock {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    fn release_key_lock(&self, key: &str) {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map still holds it: nobody is waiting on this key
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    pub async fn acknowledge(
        &self,
        alarm_id: &str,
        acknowledged_by: &str,
    ) -> Result<Alarm, MonitorError> {
        validate_operator(acknowledged_by)?;
        let patch = AlarmPatch::acknowledge(acknowledged_by, self.clock.now_ms());
        let alarm = self.transition(alarm_id, patch).await?;
        info!(alarm_id = %alarm_id, acknowledged_by = %acknowledged_by, "Alarm acknowledged");
        Ok(alarm)
    }

    pub async fn resolve(&self, alarm_id: &str) -> Result<Alarm, MonitorError> {
        let patch = AlarmPatch::resolve(self.clock.now_ms());
        let alarm = self.transition(alarm_id, patch).await?;
        info!(alarm_id = %alarm_id, "Alarm resolved");
        Ok(alarm)
    }

    async fn transition(&self, alarm_id: &str, patch: AlarmPatch) -> Result<Alarm, MonitorError> {
        let current = self
            .store
            .get(alarm_id)
            .await?
            .ok_or_else(|| MonitorError::alarm_not_found(alarm_id))?;

        if !current.status.can_transition_to(patch.status) {
            return Err(MonitorError::InvalidState {
                alarm_id: alarm_id.to_string(),
                current: current.status,
                requested: patch.status,
            });
        }

        match self.store.patch(alarm_id, &patch).await {
            Ok(alarm) => Ok(alarm),
            Err(StoreError::NotFound) => Err(MonitorError::alarm_not_found(alarm_id)),
            Err(StoreError::ConditionalCheckFailed) => {
                // Lost a race with another writer; report what it left behind
                let latest = self
                    .store
                    .get(alarm_id)
                    .await?
                    .ok_or_else(|| MonitorError::alarm_not_found(alarm_id))?;
                Err(MonitorError::InvalidState {
                    alarm_id: alarm_id.to_string(),
                    current: latest.status,
                    requested: patch.status,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every resolved alarm
    pub async fn purge_resolved(&self) -> Result<PurgeReport, MonitorError> {
        let report = self
            .purge_matching(&AlarmFilter::with_status(AlarmStatus::Resolved))
            .await?;
        info!(
            matched = report.matched,
            deleted = report.deleted,
            failed = report.failed,
            "Purged resolved alarms"
        );
        Ok(report)
    }

    /// Delete every alarm created strictly before `now - days`, whatever its status
    pub async fn purge_older_than(&self, days: u32) -> Result<PurgeReport, MonitorError> {
        validate_purge_days(days)?;
        let cutoff_ms = self.clock.now_ms() - i64::from(days) * MS_PER_DAY;

        let report = self
            .purge_matching(&AlarmFilter::created_before(cutoff_ms))
            .await?;
        info!(
            days,
            cutoff_ms,
            matched = report.matched,
            deleted = report.deleted,
            failed = report.failed,
            "Purged aged alarms"
        );
        Ok(report)
    }

    async fn purge_matching(&self, filter: &AlarmFilter) -> Result<PurgeReport, MonitorError> {
        let candidates = self.store.query(filter).await?;
        let mut report = PurgeReport {
            matched: candidates.len(),
            ..PurgeReport::default()
        };

        for alarm in candidates {
            match self.store.delete(&alarm.alarm_id).await {
                Ok(true) => report.deleted += 1,
                // Already gone
                Ok(false) => {}
                Err(e) => {
                    warn!(alarm_id = %alarm.alarm_id, error = %e, "Failed to delete alarm");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Administrative removal regardless of status
    pub async fn delete(&self, alarm_id: &str) -> Result<(), MonitorError> {
        if self.store.delete(alarm_id).await? {
            info!(alarm_id = %alarm_id, "Alarm deleted");
            Ok(())
        } else {
            Err(MonitorError::alarm_not_found(alarm_id))
        }
    }

    pub async fn get(&self, alarm_id: &str) -> Result<Alarm, MonitorError> {
        self.store
            .get(alarm_id)
            .await?
            .ok_or_else(|| MonitorError::alarm_not_found(alarm_id))
    }

    /// Alarms matching `filter`, newest first
    pub async fn list(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, MonitorError> {
        let mut alarms = self.store.query(filter).await?;
        alarms.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| a.alarm_id.cmp(&b.alarm_id))
        });
        Ok(alarms)
    }
}
