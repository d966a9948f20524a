use regex::Regex;
use std::sync::OnceLock;

use crate::error::MonitorError;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Validation error for field '{}': {}",
            self.field, self.message
        )
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for MonitorError {
    fn from(err: ValidationError) -> Self {
        MonitorError::Validation(err.to_string())
    }
}

/// Longest retention window accepted by age-based purges
pub const MAX_PURGE_DAYS: u32 = 3650;

/// Validate a machine identifier: 1-64 chars of letters, digits, `-`, `_`, `.`
pub fn validate_machine_id(machine_id: &str) -> Result<(), ValidationError> {
    static MACHINE_ID_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = MACHINE_ID_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("machine id regex is valid")
    });

    if regex.is_match(machine_id) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "machine_id",
            "Machine ID must be 1-64 characters of letters, digits, '.', '_' or '-'",
        ))
    }
}

/// Validate an alarm identifier (UUID v4 in production, but any safe token is accepted)
pub fn validate_alarm_id(alarm_id: &str) -> Result<(), ValidationError> {
    static ALARM_ID_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = ALARM_ID_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9-]{1,64}$").expect("alarm id regex is valid")
    });

    if regex.is_match(alarm_id) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "alarm_id",
            "Alarm ID must be 1-64 characters of letters, digits or '-'",
        ))
    }
}

/// Validate UUID v4 format
pub fn validate_uuid_v4(uuid_str: &str) -> Result<(), ValidationError> {
    match uuid::Uuid::parse_str(uuid_str) {
        Ok(uuid) if uuid.get_version_num() == 4 => Ok(()),
        Ok(uuid) => Err(ValidationError::new(
            "uuid",
            format!(
                "UUID must be version 4, got version {}",
                uuid.get_version_num()
            ),
        )),
        Err(_) => Err(ValidationError::new("uuid", "Invalid UUID format")),
    }
}

/// Validate the operator name recorded on acknowledgement
/// Max 128 chars, printable ASCII only
pub fn validate_operator(operator: &str) -> Result<(), ValidationError> {
    if operator.trim().is_empty() {
        return Err(ValidationError::new(
            "acknowledged_by",
            "Operator cannot be empty",
        ));
    }

    if operator.len() > 128 {
        return Err(ValidationError::new(
            "acknowledged_by",
            format!(
                "Operator length {} exceeds maximum of 128 characters",
                operator.len()
            ),
        ));
    }

    if !operator
        .chars()
        .all(|c| c.is_ascii() && (' '..='~').contains(&c))
    {
        return Err(ValidationError::new(
            "acknowledged_by",
            "Operator must contain only printable ASCII characters",
        ));
    }

    Ok(())
}

/// Validate the retention window of an age-based purge
pub fn validate_purge_days(days: u32) -> Result<(), ValidationError> {
    if days == 0 {
        return Err(ValidationError::new(
            "older_than_days",
            "Retention must be at least one day",
        ));
    }

    if days > MAX_PURGE_DAYS {
        return Err(ValidationError::new(
            "older_than_days",
            format!("Retention cannot exceed {} days", MAX_PURGE_DAYS),
        ));
    }

    Ok(())
}
