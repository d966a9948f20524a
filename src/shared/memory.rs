//! In-memory collaborators used by tests and local runs.
//!
//! Each store can be told to fail for specific keys so per-machine failure
//! isolation can be exercised without a real backend.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;

use crate::domain::{
    Alarm, AlarmFilter, AlarmPatch, CleaningEntry, HeartbeatRecord, HeartbeatStatus, Machine,
    Notification,
};
use crate::error::StoreError;
use crate::ports::{
    AlarmStore, CleaningLog, HeartbeatRepository, InsertOutcome, MachineRegistry,
    NotificationDispatcher,
};

/// Default buffer capacity for the heartbeat change channel
const CHANGE_FEED_CAPACITY: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected_failure(what: &str, key: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {} failure for {}", what, key))
}

// ============================================================================
// Heartbeats
// ============================================================================

/// Heartbeat repository that broadcasts every change to subscribers
pub struct InMemoryHeartbeatRepository {
    records: RwLock<HashMap<String, HeartbeatRecord>>,
    changes: broadcast::Sender<HeartbeatRecord>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    status_writes: AtomicUsize,
}

impl Default for InMemoryHeartbeatRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHeartbeatRepository {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            changes,
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            status_writes: AtomicUsize::new(0),
        }
    }

    /// Ingestion side: record a heartbeat at `at_ms`, keeping the derived status
    pub fn record_heartbeat(&self, machine_id: &str, at_ms: i64) {
        let record = {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let record = records
                .entry(machine_id.to_string())
                .or_insert_with(|| HeartbeatRecord::new(machine_id, None));
            record.last_seen_at_ms = Some(at_ms);
            record.clone()
        };
        self.publish(record);
    }

    /// Replace a whole record (fixtures)
    pub fn upsert(&self, record: HeartbeatRecord) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.machine_id.clone(), record.clone());
        self.publish(record);
    }

    pub fn snapshot(&self, machine_id: &str) -> Option<HeartbeatRecord> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(machine_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<HeartbeatRecord> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Receiver of every subsequent heartbeat change
    pub fn subscribe_changes(&self) -> broadcast::Receiver<HeartbeatRecord> {
        self.changes.subscribe()
    }

    pub fn fail_reads_for(&self, machine_id: &str) {
        lock(&self.failing_reads).insert(machine_id.to_string());
    }

    pub fn fail_writes_for(&self, machine_id: &str) {
        lock(&self.failing_writes).insert(machine_id.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing_reads).clear();
        lock(&self.failing_writes).clear();
    }

    /// Number of successful `write_status` calls
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn publish(&self, record: HeartbeatRecord) {
        // Only fails when nobody is listening
        let _ = self.changes.send(record);
    }
}

#[async_trait]
impl HeartbeatRepository for InMemoryHeartbeatRepository {
    async fn read(&self, machine_id: &str) -> Result<Option<HeartbeatRecord>, StoreError> {
        if lock(&self.failing_reads).contains(machine_id) {
            return Err(injected_failure("read", machine_id));
        }
        Ok(self.snapshot(machine_id))
    }

    async fn write_status(
        &self,
        machine_id: &str,
        status: HeartbeatStatus,
    ) -> Result<(), StoreError> {
        if lock(&self.failing_writes).contains(machine_id) {
            return Err(injected_failure("write", machine_id));
        }

        let record = {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let record = records
                .entry(machine_id.to_string())
                .or_insert_with(|| HeartbeatRecord::new(machine_id, None));
            record.status = status;
            record.clone()
        };

        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.publish(record);
        Ok(())
    }
}

// ============================================================================
// Machines
// ============================================================================

#[derive(Default)]
pub struct InMemoryMachineRegistry {
    machines: RwLock<Vec<Machine>>,
    unavailable: AtomicBool,
}

impl InMemoryMachineRegistry {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self {
            machines: RwLock::new(machines),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn add(&self, machine: Machine) {
        self.machines
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(machine);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(injected_failure("registry", "list"));
        }
        Ok(())
    }
}

#[async_trait]
impl MachineRegistry for InMemoryMachineRegistry {
    async fn list(&self) -> Result<Vec<Machine>, StoreError> {
        self.check_available()?;
        Ok(self
            .machines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn get(&self, machine_id: &str) -> Result<Option<Machine>, StoreError> {
        self.check_available()?;
        Ok(self
            .machines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|m| m.machine_id == machine_id)
            .cloned())
    }
}

// ============================================================================
// Alarms
// ============================================================================

/// Alarm store with an atomic insert-if-no-active primitive.
///
/// Built with [`InMemoryAlarmStore::without_conditional_insert`] it instead
/// behaves like a plain key-value store and leaves a race window between the
/// active-alarm check and the insert.
pub struct InMemoryAlarmStore {
    alarms: Mutex<HashMap<String, Alarm>>,
    conditional: bool,
    failing_deletes: Mutex<HashSet<String>>,
}

impl Default for InMemoryAlarmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAlarmStore {
    pub fn new() -> Self {
        Self {
            alarms: Mutex::new(HashMap::new()),
            conditional: true,
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    pub fn without_conditional_insert() -> Self {
        Self {
            conditional: false,
            ..Self::new()
        }
    }

    pub fn fail_deletes_for(&self, alarm_id: &str) {
        lock(&self.failing_deletes).insert(alarm_id.to_string());
    }

    pub fn all(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = lock(&self.alarms).values().cloned().collect();
        alarms.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.alarm_id.cmp(&b.alarm_id))
        });
        alarms
    }

    pub fn len(&self) -> usize {
        lock(&self.alarms).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AlarmStore for InMemoryAlarmStore {
    async fn get(&self, alarm_id: &str) -> Result<Option<Alarm>, StoreError> {
        Ok(lock(&self.alarms).get(alarm_id).cloned())
    }

    async fn query(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StoreError> {
        Ok(self.all().into_iter().filter(|a| filter.matches(a)).collect())
    }

    async fn insert(&self, alarm: &Alarm) -> Result<(), StoreError> {
        let mut alarms = lock(&self.alarms);
        if alarms.contains_key(&alarm.alarm_id) {
            return Err(StoreError::ConditionalCheckFailed);
        }
        alarms.insert(alarm.alarm_id.clone(), alarm.clone());
        Ok(())
    }

    async fn insert_if_no_active(&self, alarm: &Alarm) -> Result<InsertOutcome, StoreError> {
        if !self.conditional {
            let existing = self
                .query(&AlarmFilter::active_for(&alarm.machine_id, alarm.kind))
                .await?;
            if let Some(found) = existing.into_iter().next() {
                return Ok(InsertOutcome::Existing(found.alarm_id));
            }
            // Gap between check and write, as with a remote store
            tokio::task::yield_now().await;
            self.insert(alarm).await?;
            return Ok(InsertOutcome::Inserted);
        }

        let mut alarms = lock(&self.alarms);
        let key = alarm.dedup_key();
        if let Some(found) = alarms
            .values()
            .find(|a| a.is_active() && a.dedup_key() == key)
        {
            return Ok(InsertOutcome::Existing(found.alarm_id.clone()));
        }
        alarms.insert(alarm.alarm_id.clone(), alarm.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn has_conditional_insert(&self) -> bool {
        self.conditional
    }

    async fn patch(&self, alarm_id: &str, patch: &AlarmPatch) -> Result<Alarm, StoreError> {
        let mut alarms = lock(&self.alarms);
        let alarm = alarms.get_mut(alarm_id).ok_or(StoreError::NotFound)?;
        if !patch.expected_statuses.contains(&alarm.status) {
            return Err(StoreError::ConditionalCheckFailed);
        }
        patch.apply_to(alarm);
        Ok(alarm.clone())
    }

    async fn delete(&self, alarm_id: &str) -> Result<bool, StoreError> {
        if lock(&self.failing_deletes).contains(alarm_id) {
            return Err(injected_failure("delete", alarm_id));
        }
        Ok(lock(&self.alarms).remove(alarm_id).is_some())
    }
}

// ============================================================================
// Cleaning log
// ============================================================================

#[derive(Default)]
pub struct InMemoryCleaningLog {
    entries: RwLock<HashMap<String, CleaningEntry>>,
    failing: Mutex<HashSet<String>>,
}

impl InMemoryCleaningLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; only the most recent one per machine is kept
    pub fn record(&self, entry: CleaningEntry) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let newer = entries
            .get(&entry.machine_id)
            .map_or(true, |current| entry.timestamp_ms >= current.timestamp_ms);
        if newer {
            entries.insert(entry.machine_id.clone(), entry);
        }
    }

    pub fn fail_for(&self, machine_id: &str) {
        lock(&self.failing).insert(machine_id.to_string());
    }
}

#[async_trait]
impl CleaningLog for InMemoryCleaningLog {
    async fn last_entry(&self, machine_id: &str) -> Result<Option<CleaningEntry>, StoreError> {
        if lock(&self.failing).contains(machine_id) {
            return Err(injected_failure("cleaning log", machine_id));
        }
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(machine_id)
            .cloned())
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Dispatcher that keeps every submitted notification
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn submit(&self, notification: Notification) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected_failure("dispatch", &notification.subject));
        }
        lock(&self.sent).push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlarmKind, AlarmStatus, Severity};

    fn alarm(id: &str, machine_id: &str, kind: AlarmKind, status: AlarmStatus) -> Alarm {
        Alarm {
            alarm_id: id.to_string(),
            machine_id: machine_id.to_string(),
            kind,
            severity: Severity::High,
            message: String::new(),
            status,
            created_at_ms: 0,
            acknowledged_at_ms: None,
            acknowledged_by: None,
            resolved_at_ms: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_write_status_keeps_last_seen() {
        let repo = InMemoryHeartbeatRepository::new();
        repo.record_heartbeat("M1", 1_000);

        repo.write_status("M1", HeartbeatStatus::Offline).await.unwrap();

        let record = repo.read("M1").await.unwrap().unwrap();
        assert_eq!(record.last_seen_at_ms, Some(1_000));
        assert_eq!(record.status, HeartbeatStatus::Offline);
        assert_eq!(repo.status_writes(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_changes_are_broadcast() {
        let repo = InMemoryHeartbeatRepository::new();
        let mut rx = repo.subscribe_changes();

        repo.record_heartbeat("M1", 5);
        repo.write_status("M1", HeartbeatStatus::Online).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().last_seen_at_ms, Some(5));
        assert_eq!(rx.recv().await.unwrap().status, HeartbeatStatus::Online);
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let repo = InMemoryHeartbeatRepository::new();
        repo.fail_reads_for("M1");
        assert!(matches!(
            repo.read("M1").await,
            Err(StoreError::Unavailable(_))
        ));
        repo.clear_failures();
        assert!(repo.read("M1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_insert_returns_existing_active() {
        let store = InMemoryAlarmStore::new();
        let first = alarm("a1", "M1", AlarmKind::Offline, AlarmStatus::Active);
        let second = alarm("a2", "M1", AlarmKind::Offline, AlarmStatus::Active);

        assert_eq!(
            store.insert_if_no_active(&first).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_if_no_active(&second).await.unwrap(),
            InsertOutcome::Existing("a1".to_string())
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_insert_ignores_non_active() {
        let store = InMemoryAlarmStore::new();
        store
            .insert(&alarm("a1", "M1", AlarmKind::Offline, AlarmStatus::Resolved))
            .await
            .unwrap();

        let outcome = store
            .insert_if_no_active(&alarm("a2", "M1", AlarmKind::Offline, AlarmStatus::Active))
            .await
            .unwrap();

        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_patch_respects_status_guard() {
        let store = InMemoryAlarmStore::new();
        store
            .insert(&alarm("a1", "M1", AlarmKind::Offline, AlarmStatus::Resolved))
            .await
            .unwrap();

        let result = store.patch("a1", &AlarmPatch::acknowledge("ops", 10)).await;
        assert_eq!(result, Err(StoreError::ConditionalCheckFailed));
        assert_eq!(
            store.get("a1").await.unwrap().unwrap().status,
            AlarmStatus::Resolved
        );

        let missing = store.patch("nope", &AlarmPatch::resolve(10)).await;
        assert_eq!(missing, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_cleaning_log_keeps_latest() {
        let log = InMemoryCleaningLog::new();
        log.record(CleaningEntry {
            machine_id: "M1".to_string(),
            timestamp_ms: 200,
            performed_by: None,
        });
        log.record(CleaningEntry {
            machine_id: "M1".to_string(),
            timestamp_ms: 100,
            performed_by: None,
        });

        let entry = log.last_entry("M1").await.unwrap().unwrap();
        assert_eq!(entry.timestamp_ms, 200);
        assert!(log.last_entry("M2").await.unwrap().is_none());
    }
}
