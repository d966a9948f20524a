use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::AlarmStatus;

/// Errors surfaced by the monitoring core
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("alarm {alarm_id} cannot move from {current} to {requested}")]
    InvalidState {
        alarm_id: String,
        current: AlarmStatus,
        requested: AlarmStatus,
    },

    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl MonitorError {
    pub fn alarm_not_found(alarm_id: &str) -> Self {
        MonitorError::NotFound {
            entity: "alarm",
            id: alarm_id.to_string(),
        }
    }

    pub fn machine_not_found(machine_id: &str) -> Self {
        MonitorError::NotFound {
            entity: "machine",
            id: machine_id.to_string(),
        }
    }

    /// Stable machine-readable code for API payloads
    pub fn code(&self) -> &'static str {
        match self {
            MonitorError::NotFound { entity: "alarm", .. } => error_codes::ALARM_NOT_FOUND,
            MonitorError::NotFound { entity: "machine", .. } => error_codes::MACHINE_NOT_FOUND,
            MonitorError::NotFound { .. } => error_codes::NOT_FOUND,
            MonitorError::InvalidState { .. } => error_codes::INVALID_STATE,
            MonitorError::TransientIo(_) => error_codes::STORE_UNAVAILABLE,
            MonitorError::Validation(_) => error_codes::INVALID_VALUE,
        }
    }
}

/// Failures reported by collaborator stores
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("item not found")]
    NotFound,

    #[error("conditional check failed")]
    ConditionalCheckFailed,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        MonitorError::TransientIo(err.to_string())
    }
}

/// Standard error response payload
/// Contains stable machine-readable error code, human-readable message, and request ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable error code (e.g., "ALARM_NOT_FOUND", "UNAUTHORIZED")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Request ID for tracing and debugging
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(
        error: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            request_id: request_id.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Common error codes used across the control API
pub mod error_codes {
    // Authentication errors
    pub const MISSING_TOKEN: &str = "MISSING_TOKEN";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";

    // Validation errors
    pub const MISSING_FIELD: &str = "MISSING_FIELD";
    pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
    pub const INVALID_VALUE: &str = "INVALID_VALUE";
    pub const INVALID_CURSOR: &str = "INVALID_CURSOR";

    // Not found errors
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALARM_NOT_FOUND: &str = "ALARM_NOT_FOUND";
    pub const MACHINE_NOT_FOUND: &str = "MACHINE_NOT_FOUND";

    // Lifecycle errors
    pub const INVALID_STATE: &str = "INVALID_STATE";

    // Store errors
    pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";

    // Internal errors
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}
