//! DynamoDB implementations of the monitoring ports.

pub mod alarms;
pub mod cleaning_log;
pub mod heartbeats;
pub mod machines;
pub mod notifications;

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

use vending_monitor::shared::error::StoreError;

pub use alarms::DynamoAlarmStore;
pub use cleaning_log::DynamoCleaningLog;
pub use heartbeats::DynamoHeartbeatRepository;
pub use machines::DynamoMachineRegistry;
pub use notifications::DynamoNotificationOutbox;

pub type Item = HashMap<String, AttributeValue>;

/// Wrap an SDK failure as a transient store error
pub fn unavailable<E: std::fmt::Debug>(err: E) -> StoreError {
    StoreError::Unavailable(format!("{:?}", err))
}

pub fn required_s(item: &Item, field: &str) -> Result<String, StoreError> {
    item.get(field)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Serialization(format!("missing or invalid {}", field)))
}

pub fn optional_s(item: &Item, field: &str) -> Option<String> {
    item.get(field).and_then(|v| v.as_s().ok()).cloned()
}

pub fn optional_n(item: &Item, field: &str) -> Option<i64> {
    item.get(field)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
}

pub fn required_n(item: &Item, field: &str) -> Result<i64, StoreError> {
    optional_n(item, field)
        .ok_or_else(|| StoreError::Serialization(format!("missing or invalid {}", field)))
}
