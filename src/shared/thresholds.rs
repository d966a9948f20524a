//! Offline and cleaning threshold configuration.
//!
//! Offline thresholds are process-wide and shared between the offline detector
//! and the live status publisher through a single [`SharedOfflineThresholds`]
//! handle. Cleaning thresholds are a declarative per-machine-type table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::{AlarmKind, MachineType, Severity};
use crate::time::MS_PER_MINUTE;
use crate::validators::ValidationError;

pub const DEFAULT_OFFLINE_MINUTES: u32 = 5;
pub const CRITICAL_OFFLINE_MINUTES: u32 = 15;

/// Days reported for machines that have never been cleaned
pub const NO_CLEANING_HISTORY_DAYS: i64 = 999;

// ============================================================================
// Offline thresholds
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfflineThresholds {
    pub offline_minutes: u32,
    pub critical_minutes: u32,
}

impl Default for OfflineThresholds {
    fn default() -> Self {
        Self {
            offline_minutes: DEFAULT_OFFLINE_MINUTES,
            critical_minutes: CRITICAL_OFFLINE_MINUTES,
        }
    }
}

impl OfflineThresholds {
    pub fn new(offline_minutes: u32, critical_minutes: u32) -> Result<Self, ValidationError> {
        let thresholds = Self {
            offline_minutes,
            critical_minutes,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.offline_minutes == 0 {
            return Err(ValidationError::new(
                "offline_minutes",
                "offline threshold must be at least one minute",
            ));
        }
        if self.critical_minutes <= self.offline_minutes {
            return Err(ValidationError::new(
                "critical_minutes",
                format!(
                    "critical threshold ({}) must exceed offline threshold ({})",
                    self.critical_minutes, self.offline_minutes
                ),
            ));
        }
        Ok(())
    }

    pub fn offline_ms(&self) -> i64 {
        i64::from(self.offline_minutes) * MS_PER_MINUTE
    }

    pub fn critical_ms(&self) -> i64 {
        i64::from(self.critical_minutes) * MS_PER_MINUTE
    }
}

/// Runtime-adjustable offline thresholds shared by every component that
/// judges staleness. Clones observe the same values.
#[derive(Debug, Clone, Default)]
pub struct SharedOfflineThresholds {
    inner: Arc<RwLock<OfflineThresholds>>,
}

impl SharedOfflineThresholds {
    pub fn new(thresholds: OfflineThresholds) -> Self {
        Self {
            inner: Arc::new(RwLock::new(thresholds)),
        }
    }

    pub fn get(&self) -> OfflineThresholds {
        self.inner
            .read()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Replace the thresholds; rejected values leave the current ones in place
    pub fn update(&self, thresholds: OfflineThresholds) -> Result<(), ValidationError> {
        thresholds.validate()?;
        match self.inner.write() {
            Ok(mut guard) => *guard = thresholds,
            Err(poisoned) => *poisoned.into_inner() = thresholds,
        }
        Ok(())
    }

    /// True when both handles point at the same underlying value
    pub fn is_same(&self, other: &SharedOfflineThresholds) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Cleaning thresholds
// ============================================================================

/// Cleaning debt levels, ordered by urgency
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CleaningSeverity {
    Routine,
    Deep,
    Emergency,
    Overdue,
}

impl CleaningSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleaningSeverity::Routine => "routine",
            CleaningSeverity::Deep => "deep",
            CleaningSeverity::Emergency => "emergency",
            CleaningSeverity::Overdue => "overdue",
        }
    }

    pub fn alarm_kind(&self) -> AlarmKind {
        match self {
            CleaningSeverity::Routine => AlarmKind::CleaningRoutine,
            CleaningSeverity::Deep => AlarmKind::CleaningDeep,
            CleaningSeverity::Emergency => AlarmKind::CleaningEmergency,
            CleaningSeverity::Overdue => AlarmKind::CleaningOverdue,
        }
    }

    pub fn alarm_severity(&self) -> Severity {
        match self {
            CleaningSeverity::Routine => Severity::Low,
            CleaningSeverity::Deep => Severity::Medium,
            CleaningSeverity::Emergency => Severity::High,
            CleaningSeverity::Overdue => Severity::Critical,
        }
    }
}

/// Day thresholds for one machine type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleaningThresholds {
    pub routine: u32,
    pub deep: u32,
    pub emergency: u32,
    pub overdue: u32,
}

impl CleaningThresholds {
    pub const fn new(routine: u32, deep: u32, emergency: u32, overdue: u32) -> Self {
        Self {
            routine,
            deep,
            emergency,
            overdue,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.routine == 0 {
            return Err(ValidationError::new(
                "routine",
                "cleaning thresholds must be positive",
            ));
        }
        if !(self.routine < self.deep && self.deep < self.emergency && self.emergency < self.overdue)
        {
            return Err(ValidationError::new(
                "cleaning_thresholds",
                format!(
                    "thresholds must be strictly increasing, got {{{}, {}, {}, {}}}",
                    self.routine, self.deep, self.emergency, self.overdue
                ),
            ));
        }
        Ok(())
    }

    /// Highest severity whose threshold has been reached, if any
    pub fn classify(&self, days_since_cleaning: i64) -> Option<CleaningSeverity> {
        [
            (self.overdue, CleaningSeverity::Overdue),
            (self.emergency, CleaningSeverity::Emergency),
            (self.deep, CleaningSeverity::Deep),
            (self.routine, CleaningSeverity::Routine),
        ]
        .into_iter()
        .find(|(threshold, _)| days_since_cleaning >= i64::from(*threshold))
        .map(|(_, severity)| severity)
    }

    pub fn defaults_for(machine_type: MachineType) -> Self {
        match machine_type {
            MachineType::IceCream => Self::new(3, 7, 10, 14),
            MachineType::Coffee => Self::new(5, 10, 15, 21),
            MachineType::Snack => Self::new(7, 14, 21, 30),
            MachineType::Perfume => Self::new(10, 20, 30, 45),
        }
    }
}

/// Machine type to cleaning thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningThresholdTable {
    table: HashMap<MachineType, CleaningThresholds>,
}

impl Default for CleaningThresholdTable {
    fn default() -> Self {
        let table = MachineType::ALL
            .into_iter()
            .map(|t| (t, CleaningThresholds::defaults_for(t)))
            .collect();
        Self { table }
    }
}

impl CleaningThresholdTable {
    pub fn for_type(&self, machine_type: MachineType) -> CleaningThresholds {
        self.table
            .get(&machine_type)
            .copied()
            .unwrap_or_else(|| CleaningThresholds::defaults_for(machine_type))
    }

    pub fn with_override(
        mut self,
        machine_type: MachineType,
        thresholds: CleaningThresholds,
    ) -> Result<Self, ValidationError> {
        thresholds.validate()?;
        self.table.insert(machine_type, thresholds);
        Ok(self)
    }

    /// Defaults overlaid with a JSON object such as
    /// `{"coffee": {"routine": 4, "deep": 8, "emergency": 12, "overdue": 20}}`
    pub fn from_json_overrides(json: &str) -> Result<Self, ValidationError> {
        let overrides: HashMap<MachineType, CleaningThresholds> = serde_json::from_str(json)
            .map_err(|e| ValidationError::new("cleaning_thresholds", e.to_string()))?;

        overrides
            .into_iter()
            .try_fold(Self::default(), |table, (machine_type, thresholds)| {
                table.with_override(machine_type, thresholds)
            })
    }

    pub fn classify(
        &self,
        machine_type: MachineType,
        days_since_cleaning: i64,
    ) -> Option<CleaningSeverity> {
        self.for_type(machine_type).classify(days_since_cleaning)
    }
}
