//! Push-based live status of the fleet.
//!
//! The publisher keeps `machine_id -> LiveStatus` up to date from heartbeat
//! changes and fans every change out to subscribers. Staleness uses the same
//! [`SharedOfflineThresholds`] handle as the offline detector.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{HeartbeatRecord, HeartbeatStatus};
use crate::offline_detector::classify;
use crate::thresholds::SharedOfflineThresholds;
use crate::time::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveStatus {
    pub machine_id: String,
    pub status: HeartbeatStatus,
    pub last_seen_at_ms: Option<i64>,
    pub is_offline: bool,
}

/// Subscriber callback. Runs on the notifying task and must not block; it
/// must also not drop or unsubscribe its own [`Subscription`].
pub type StatusCallback = Box<dyn Fn(&LiveStatus) + Send + Sync>;

struct Slot {
    callback: Mutex<Option<StatusCallback>>,
}

struct Inner {
    thresholds: SharedOfflineThresholds,
    clock: Arc<dyn Clock>,
    statuses: RwLock<HashMap<String, LiveStatus>>,
    subscribers: RwLock<Vec<(u64, Arc<Slot>)>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct LiveStatusPublisher {
    inner: Arc<Inner>,
}

impl LiveStatusPublisher {
    pub fn new(thresholds: SharedOfflineThresholds, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                thresholds,
                clock,
                statuses: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn thresholds(&self) -> &SharedOfflineThresholds {
        &self.inner.thresholds
    }

    /// Register `callback` for every subsequent change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LiveStatus) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let slot = Arc::new(Slot {
            callback: Mutex::new(Some(Box::new(callback))),
        });

        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, slot.clone()));

        Subscription {
            id,
            slot,
            publisher: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Recompute the entry for `record` and notify every subscriber
    pub fn on_heartbeat_change(&self, record: &HeartbeatRecord) -> LiveStatus {
        let status = self.evaluate(record);
        let previous = self
            .inner
            .statuses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(status.machine_id.clone(), status.clone());

        if previous.as_ref().map(|p| p.is_offline) != Some(status.is_offline) {
            debug!(
                machine_id = %status.machine_id,
                is_offline = status.is_offline,
                "Live status transition"
            );
        }

        self.notify(&status);
        status
    }

    /// Load initial records without notifying anyone
    pub fn seed(&self, records: impl IntoIterator<Item = HeartbeatRecord>) {
        let evaluated: Vec<LiveStatus> = records.into_iter().map(|r| self.evaluate(&r)).collect();
        let mut statuses = self
            .inner
            .statuses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for status in evaluated {
            statuses.insert(status.machine_id.clone(), status);
        }
    }

    pub fn get(&self, machine_id: &str) -> Option<LiveStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(machine_id)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, LiveStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Pump a heartbeat change feed into the publisher until the sender closes
    pub fn attach(&self, mut changes: broadcast::Receiver<HeartbeatRecord>) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(record) => {
                        publisher.on_heartbeat_change(&record);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Live status feed lagged, changes dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("Heartbeat change feed closed");
                        break;
                    }
                }
            }
        })
    }

    fn evaluate(&self, record: &HeartbeatRecord) -> LiveStatus {
        let liveness = classify(
            Some(record),
            self.inner.clock.now_ms(),
            &self.inner.thresholds.get(),
        );
        LiveStatus {
            machine_id: record.machine_id.clone(),
            status: record.status,
            last_seen_at_ms: record.last_seen_at_ms,
            is_offline: liveness.is_offline(),
        }
    }

    fn notify(&self, status: &LiveStatus) {
        let slots: Vec<Arc<Slot>> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();

        for slot in slots {
            let guard = slot
                .callback
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(callback) = guard.as_ref() {
                callback(status);
            }
        }
    }
}

/// Handle owning one subscription; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    slot: Arc<Slot>,
    publisher: Weak<Inner>,
}

impl Subscription {
    /// Detach the callback. Waits for an in-progress invocation to finish;
    /// once this returns the callback never runs again.
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn detach(&self) {
        self.slot
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(inner) = self.publisher.upgrade() {
            inner
                .subscribers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
