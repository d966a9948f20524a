use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Machines
// ============================================================================

/// Machine category; drives the cleaning threshold table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MachineType {
    IceCream,
    Coffee,
    Snack,
    Perfume,
}

impl MachineType {
    pub const ALL: [MachineType; 4] = [
        MachineType::IceCream,
        MachineType::Coffee,
        MachineType::Snack,
        MachineType::Perfume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineType::IceCream => "ice_cream",
            MachineType::Coffee => "coffee",
            MachineType::Snack => "snack",
            MachineType::Perfume => "perfume",
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MachineType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown machine type: {}", s))
    }
}

/// Per-machine notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub enabled_kinds: Vec<AlarmKind>,
    /// Carried from the registry; detection uses the process-wide thresholds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_minutes: Option<u32>,
}

impl NotificationConfig {
    pub fn is_enabled(&self, kind: AlarmKind) -> bool {
        self.enabled_kinds.contains(&kind)
    }
}

/// A vending machine as known to the machine registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub machine_id: String,
    pub machine_type: MachineType,
    pub name: String,
    pub serial: String,
    pub location: String,
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl Machine {
    /// Short label used in alarm messages and notification subjects
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.serial)
    }
}

// ============================================================================
// Heartbeats
// ============================================================================

/// Derived liveness status stored next to the heartbeat
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl HeartbeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatStatus::Online => "online",
            HeartbeatStatus::Offline => "offline",
            HeartbeatStatus::Unknown => "unknown",
        }
    }

    /// Lenient parse used for records written by other services
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "online" => HeartbeatStatus::Online,
            "offline" => HeartbeatStatus::Offline,
            _ => HeartbeatStatus::Unknown,
        }
    }
}

/// Last known heartbeat of a machine.
///
/// `last_seen_at_ms` is owned by ingestion; the offline detector only ever
/// writes `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatRecord {
    pub machine_id: String,
    pub last_seen_at_ms: Option<i64>,
    #[serde(default)]
    pub status: HeartbeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HashMap<String, f64>>,
}

impl HeartbeatRecord {
    pub fn new(machine_id: impl Into<String>, last_seen_at_ms: Option<i64>) -> Self {
        Self {
            machine_id: machine_id.into(),
            last_seen_at_ms,
            status: HeartbeatStatus::Unknown,
            metrics: None,
        }
    }

    pub fn with_status(mut self, status: HeartbeatStatus) -> Self {
        self.status = status;
        self
    }
}

// ============================================================================
// Alarms
// ============================================================================

/// Category of abnormal condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AlarmKind {
    Offline,
    CriticalOffline,
    CleaningRoutine,
    CleaningDeep,
    CleaningEmergency,
    CleaningOverdue,
    Error,
}

impl AlarmKind {
    pub const ALL: [AlarmKind; 7] = [
        AlarmKind::Offline,
        AlarmKind::CriticalOffline,
        AlarmKind::CleaningRoutine,
        AlarmKind::CleaningDeep,
        AlarmKind::CleaningEmergency,
        AlarmKind::CleaningOverdue,
        AlarmKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::Offline => "offline",
            AlarmKind::CriticalOffline => "critical-offline",
            AlarmKind::CleaningRoutine => "cleaning-routine",
            AlarmKind::CleaningDeep => "cleaning-deep",
            AlarmKind::CleaningEmergency => "cleaning-emergency",
            AlarmKind::CleaningOverdue => "cleaning-overdue",
            AlarmKind::Error => "error",
        }
    }

    pub fn is_cleaning(&self) -> bool {
        matches!(
            self,
            AlarmKind::CleaningRoutine
                | AlarmKind::CleaningDeep
                | AlarmKind::CleaningEmergency
                | AlarmKind::CleaningOverdue
        )
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlarmKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown alarm kind: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Alarm lifecycle: active -> acknowledged -> resolved, or active -> resolved
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmStatus::Active => "active",
            AlarmStatus::Acknowledged => "acknowledged",
            AlarmStatus::Resolved => "resolved",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: AlarmStatus) -> bool {
        matches!(
            (self, next),
            (AlarmStatus::Active, AlarmStatus::Acknowledged)
                | (AlarmStatus::Active, AlarmStatus::Resolved)
                | (AlarmStatus::Acknowledged, AlarmStatus::Resolved)
        )
    }

    /// Statuses from which `next` is reachable
    pub fn predecessors_of(next: AlarmStatus) -> Vec<AlarmStatus> {
        [
            AlarmStatus::Active,
            AlarmStatus::Acknowledged,
            AlarmStatus::Resolved,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlarmStatus::Active),
            "acknowledged" => Ok(AlarmStatus::Acknowledged),
            "resolved" => Ok(AlarmStatus::Resolved),
            other => Err(format!("unknown alarm status: {}", other)),
        }
    }
}

/// Persisted alarm
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alarm {
    pub alarm_id: String,
    pub machine_id: String,
    pub kind: AlarmKind,
    pub severity: Severity,
    pub message: String,
    pub status: AlarmStatus,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Alarm {
    pub fn is_active(&self) -> bool {
        self.status == AlarmStatus::Active
    }

    /// Dedup key: at most one active alarm exists per key
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.machine_id, self.kind)
    }
}

pub fn dedup_key(machine_id: &str, kind: AlarmKind) -> String {
    format!("{}#{}", machine_id, kind.as_str())
}

/// Request to raise an alarm
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlarm {
    pub machine_id: String,
    pub kind: AlarmKind,
    pub severity: Severity,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

impl NewAlarm {
    pub fn new(
        machine_id: impl Into<String>,
        kind: AlarmKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            kind,
            severity,
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Alarm query filter; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmFilter {
    pub machine_id: Option<String>,
    pub kind: Option<AlarmKind>,
    pub status: Option<AlarmStatus>,
    pub created_before_ms: Option<i64>,
}

impl AlarmFilter {
    pub fn active_for(machine_id: &str, kind: AlarmKind) -> Self {
        Self {
            machine_id: Some(machine_id.to_string()),
            kind: Some(kind),
            status: Some(AlarmStatus::Active),
            created_before_ms: None,
        }
    }

    pub fn with_status(status: AlarmStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn created_before(cutoff_ms: i64) -> Self {
        Self {
            created_before_ms: Some(cutoff_ms),
            ..Self::default()
        }
    }

    pub fn matches(&self, alarm: &Alarm) -> bool {
        self.machine_id
            .as_deref()
            .map_or(true, |id| id == alarm.machine_id)
            && self.kind.map_or(true, |k| k == alarm.kind)
            && self.status.map_or(true, |s| s == alarm.status)
            && self
                .created_before_ms
                .map_or(true, |cutoff| alarm.created_at_ms < cutoff)
    }
}

/// Field changes applied by a lifecycle transition.
///
/// The store applies the patch only when the alarm's current status is one of
/// `expected_statuses`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmPatch {
    pub status: AlarmStatus,
    pub expected_statuses: Vec<AlarmStatus>,
    pub acknowledged_at_ms: Option<i64>,
    pub acknowledged_by: Option<String>,
    pub resolved_at_ms: Option<i64>,
}

impl AlarmPatch {
    pub fn acknowledge(by: impl Into<String>, at_ms: i64) -> Self {
        Self {
            status: AlarmStatus::Acknowledged,
            expected_statuses: AlarmStatus::predecessors_of(AlarmStatus::Acknowledged),
            acknowledged_at_ms: Some(at_ms),
            acknowledged_by: Some(by.into()),
            resolved_at_ms: None,
        }
    }

    pub fn resolve(at_ms: i64) -> Self {
        Self {
            status: AlarmStatus::Resolved,
            expected_statuses: AlarmStatus::predecessors_of(AlarmStatus::Resolved),
            acknowledged_at_ms: None,
            acknowledged_by: None,
            resolved_at_ms: Some(at_ms),
        }
    }

    /// Apply to an alarm in memory; callers check `expected_statuses` first
    pub fn apply_to(&self, alarm: &mut Alarm) {
        alarm.status = self.status;
        if let Some(at) = self.acknowledged_at_ms {
            alarm.acknowledged_at_ms = Some(at);
        }
        if let Some(ref by) = self.acknowledged_by {
            alarm.acknowledged_by = Some(by.clone());
        }
        if let Some(at) = self.resolved_at_ms {
            alarm.resolved_at_ms = Some(at);
        }
    }
}

// ============================================================================
// Cleaning
// ============================================================================

/// Most recent cleaning log entry of a machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleaningEntry {
    pub machine_id: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<String>,
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Normal,
    High,
    Urgent,
}

impl From<Severity> for NotificationPriority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low | Severity::Medium => NotificationPriority::Normal,
            Severity::High => NotificationPriority::High,
            Severity::Critical => NotificationPriority::Urgent,
        }
    }
}

/// Message handed to the notification dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub priority: NotificationPriority,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alarm(status: AlarmStatus) -> Alarm {
        Alarm {
            alarm_id: "a1".to_string(),
            machine_id: "M1".to_string(),
            kind: AlarmKind::Offline,
            severity: Severity::High,
            message: "offline".to_string(),
            status,
            created_at_ms: 1_000,
            acknowledged_at_ms: None,
            acknowledged_by: None,
            resolved_at_ms: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_alarm_kind_serde_names() {
        let json = serde_json::to_string(&AlarmKind::CriticalOffline).unwrap();
        assert_eq!(json, "\"critical-offline\"");
        let kind: AlarmKind = serde_json::from_str("\"cleaning-emergency\"").unwrap();
        assert_eq!(kind, AlarmKind::CleaningEmergency);
        for kind in AlarmKind::ALL {
            assert_eq!(kind.as_str().parse::<AlarmKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_machine_type_parse() {
        assert_eq!("ice_cream".parse::<MachineType>().unwrap(), MachineType::IceCream);
        assert!("fridge".parse::<MachineType>().is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(AlarmStatus::Active.can_transition_to(AlarmStatus::Acknowledged));
        assert!(AlarmStatus::Active.can_transition_to(AlarmStatus::Resolved));
        assert!(AlarmStatus::Acknowledged.can_transition_to(AlarmStatus::Resolved));
        assert!(!AlarmStatus::Acknowledged.can_transition_to(AlarmStatus::Active));
        assert!(!AlarmStatus::Resolved.can_transition_to(AlarmStatus::Acknowledged));
        assert!(!AlarmStatus::Resolved.can_transition_to(AlarmStatus::Active));
        assert!(!AlarmStatus::Active.can_transition_to(AlarmStatus::Active));
    }

    #[test]
    fn test_predecessors() {
        assert_eq!(
            AlarmStatus::predecessors_of(AlarmStatus::Acknowledged),
            vec![AlarmStatus::Active]
        );
        assert_eq!(
            AlarmStatus::predecessors_of(AlarmStatus::Resolved),
            vec![AlarmStatus::Active, AlarmStatus::Acknowledged]
        );
        assert!(AlarmStatus::predecessors_of(AlarmStatus::Active).is_empty());
    }

    #[test]
    fn test_filter_matches() {
        let alarm = sample_alarm(AlarmStatus::Active);
        assert!(AlarmFilter::default().matches(&alarm));
        assert!(AlarmFilter::active_for("M1", AlarmKind::Offline).matches(&alarm));
        assert!(!AlarmFilter::active_for("M2", AlarmKind::Offline).matches(&alarm));
        assert!(!AlarmFilter::active_for("M1", AlarmKind::CriticalOffline).matches(&alarm));
        assert!(!AlarmFilter::with_status(AlarmStatus::Resolved).matches(&alarm));
        assert!(AlarmFilter::created_before(1_001).matches(&alarm));
        // strictly older than the cutoff
        assert!(!AlarmFilter::created_before(1_000).matches(&alarm));
    }

    #[test]
    fn test_patch_apply() {
        let mut alarm = sample_alarm(AlarmStatus::Active);
        AlarmPatch::acknowledge("ops", 2_000).apply_to(&mut alarm);
        assert_eq!(alarm.status, AlarmStatus::Acknowledged);
        assert_eq!(alarm.acknowledged_by.as_deref(), Some("ops"));
        assert_eq!(alarm.acknowledged_at_ms, Some(2_000));

        AlarmPatch::resolve(3_000).apply_to(&mut alarm);
        assert_eq!(alarm.status, AlarmStatus::Resolved);
        assert_eq!(alarm.resolved_at_ms, Some(3_000));
        // acknowledgement is kept
        assert_eq!(alarm.acknowledged_by.as_deref(), Some("ops"));
    }

    #[test]
    fn test_priority_from_severity() {
        assert_eq!(NotificationPriority::from(Severity::Low), NotificationPriority::Normal);
        assert_eq!(NotificationPriority::from(Severity::High), NotificationPriority::High);
        assert_eq!(
            NotificationPriority::from(Severity::Critical),
            NotificationPriority::Urgent
        );
    }

    #[test]
    fn test_heartbeat_status_lenient_parse() {
        assert_eq!(HeartbeatStatus::parse_lenient("online"), HeartbeatStatus::Online);
        assert_eq!(HeartbeatStatus::parse_lenient("offline"), HeartbeatStatus::Offline);
        assert_eq!(HeartbeatStatus::parse_lenient("maintenance"), HeartbeatStatus::Unknown);
    }
}
