use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

/// Clock trait for abstracting time operations
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Current time as epoch milliseconds (heartbeat and alarm timestamps)
    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Current time as RFC3339 string (log and notification text)
    fn now_rfc3339(&self) -> String {
        self.now().to_rfc3339()
    }
}

/// Production implementation of Clock using system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for deterministic tests.
///
/// Clones share the same instant, so a test can advance time while a
/// detector holding a clone keeps running.
#[derive(Debug, Clone)]
pub struct FixedClock {
    timestamp: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Arc::new(RwLock::new(timestamp)),
        }
    }

    pub fn from_rfc3339(timestamp_str: &str) -> Result<Self, chrono::ParseError> {
        let timestamp = DateTime::parse_from_rfc3339(timestamp_str)?.with_timezone(&Utc);
        Ok(Self::new(timestamp))
    }

    /// Falls back to the epoch for out-of-range input
    pub fn from_epoch_ms(ms: i64) -> Self {
        Self::new(DateTime::from_timestamp_millis(ms).unwrap_or_default())
    }

    pub fn set_time(&self, timestamp: DateTime<Utc>) {
        if let Ok(mut guard) = self.timestamp.write() {
            *guard = timestamp;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.timestamp.write() {
            *guard += by;
        }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.timestamp
            .read()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

pub const MS_PER_MINUTE: i64 = 60 * 1000;
pub const MS_PER_DAY: i64 = 24 * 60 * MS_PER_MINUTE;

/// Whole days elapsed between two epoch-millisecond instants, never negative
pub fn whole_days_between(earlier_ms: i64, later_ms: i64) -> i64 {
    later_ms.saturating_sub(earlier_ms).max(0) / MS_PER_DAY
}
