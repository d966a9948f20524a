//! Contracts of the collaborators the monitoring core talks to.
//!
//! In-memory implementations live in [`crate::memory`]; the DynamoDB-backed
//! ones live next to the binaries that use them.

use async_trait::async_trait;

use crate::domain::{
    Alarm, AlarmFilter, AlarmPatch, CleaningEntry, HeartbeatRecord, HeartbeatStatus, Machine,
    Notification,
};
use crate::error::StoreError;

/// Per-device heartbeat storage. Ingestion owns `last_seen_at_ms`; this core
/// only writes the derived status.
#[async_trait]
pub trait HeartbeatRepository: Send + Sync {
    async fn read(&self, machine_id: &str) -> Result<Option<HeartbeatRecord>, StoreError>;

    /// Update the derived status without touching `last_seen_at_ms`
    async fn write_status(
        &self,
        machine_id: &str,
        status: HeartbeatStatus,
    ) -> Result<(), StoreError>;
}

/// Read-only machine catalog
#[async_trait]
pub trait MachineRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<Machine>, StoreError>;

    async fn get(&self, machine_id: &str) -> Result<Option<Machine>, StoreError>;
}

/// Outcome of a conditional alarm insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An active alarm already exists for the same machine and kind
    Existing(String),
}

#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn get(&self, alarm_id: &str) -> Result<Option<Alarm>, StoreError>;

    async fn query(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StoreError>;

    async fn insert(&self, alarm: &Alarm) -> Result<(), StoreError>;

    /// Insert `alarm` unless an active alarm already exists for its
    /// `(machine_id, kind)`.
    ///
    /// The default is check-then-insert and only best-effort: two concurrent
    /// callers can both pass the check. Stores with a conditional write
    /// override it and report so through [`AlarmStore::has_conditional_insert`].
    async fn insert_if_no_active(&self, alarm: &Alarm) -> Result<InsertOutcome, StoreError> {
        let existing = self
            .query(&AlarmFilter::active_for(&alarm.machine_id, alarm.kind))
            .await?;
        if let Some(found) = existing.into_iter().next() {
            return Ok(InsertOutcome::Existing(found.alarm_id));
        }
        self.insert(alarm).await?;
        Ok(InsertOutcome::Inserted)
    }

    fn has_conditional_insert(&self) -> bool {
        false
    }

    /// Apply `patch` if the current status is one of `patch.expected_statuses`.
    ///
    /// Fails with `NotFound` for unknown ids and `ConditionalCheckFailed` when
    /// the status guard does not hold.
    async fn patch(&self, alarm_id: &str, patch: &AlarmPatch) -> Result<Alarm, StoreError>;

    /// Returns false when no alarm with that id existed
    async fn delete(&self, alarm_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CleaningLog: Send + Sync {
    async fn last_entry(&self, machine_id: &str) -> Result<Option<CleaningEntry>, StoreError>;
}

/// External notification delivery; retries are the dispatcher's concern
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn submit(&self, notification: Notification) -> Result<(), StoreError>;
}
