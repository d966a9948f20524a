use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::domain::Alarm;

/// Cursor for alarm list pagination: the last alarm of the previous page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlarmListCursor {
    pub created_at_ms: i64,
    pub alarm_id: String,
}

impl AlarmListCursor {
    pub fn after(alarm: &Alarm) -> Self {
        Self {
            created_at_ms: alarm.created_at_ms,
            alarm_id: alarm.alarm_id.clone(),
        }
    }

    /// Whether `alarm` sorts after this cursor in newest-first order
    pub fn precedes(&self, alarm: &Alarm) -> bool {
        alarm.created_at_ms < self.created_at_ms
            || (alarm.created_at_ms == self.created_at_ms && alarm.alarm_id > self.alarm_id)
    }
}

/// Cursor encoding/decoding error
#[derive(Debug, Clone)]
pub struct CursorError {
    pub message: String,
}

impl CursorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cursor error: {}", self.message)
    }
}

impl std::error::Error for CursorError {}

/// Encode alarm list cursor to base64 string
pub fn encode_alarm_cursor(cursor: &AlarmListCursor) -> Result<String, CursorError> {
    let json = serde_json::to_string(cursor)
        .map_err(|e| CursorError::new(format!("Failed to serialize cursor: {}", e)))?;

    Ok(general_purpose::STANDARD.encode(json.as_bytes()))
}

/// Decode alarm list cursor from base64 string
pub fn decode_alarm_cursor(cursor: &str) -> Result<AlarmListCursor, CursorError> {
    let bytes = general_purpose::STANDARD
        .decode(cursor)
        .map_err(|e| CursorError::new(format!("Failed to decode base64: {}", e)))?;

    let json = String::from_utf8(bytes)
        .map_err(|e| CursorError::new(format!("Failed to decode UTF-8: {}", e)))?;

    serde_json::from_str(&json)
        .map_err(|e| CursorError::new(format!("Failed to deserialize cursor: {}", e)))
}

/// One page of a newest-first alarm list, plus the cursor of the next page
pub fn paginate(
    alarms: Vec<Alarm>,
    after: Option<&AlarmListCursor>,
    limit: usize,
) -> Result<(Vec<Alarm>, Option<String>), CursorError> {
    let mut remaining: Vec<Alarm> = alarms
        .into_iter()
        .filter(|alarm| after.map_or(true, |cursor| cursor.precedes(alarm)))
        .collect();

    let limit = limit.max(1);
    if remaining.len() <= limit {
        return Ok((remaining, None));
    }

    remaining.truncate(limit);
    let next = remaining
        .last()
        .map(|last| encode_alarm_cursor(&AlarmListCursor::after(last)))
        .transpose()?;
    Ok((remaining, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlarmKind, AlarmStatus, Severity};
    use std::collections::HashMap;

    fn alarm(id: &str, created_at_ms: i64) -> Alarm {
        Alarm {
            alarm_id: id.to_string(),
            machine_id: "M1".to_string(),
            kind: AlarmKind::Offline,
            severity: Severity::High,
            message: String::new(),
            status: AlarmStatus::Active,
            created_at_ms,
            acknowledged_at_ms: None,
            acknowledged_by: None,
            resolved_at_ms: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_encode_decode_alarm_cursor() {
        let cursor = AlarmListCursor {
            created_at_ms: 1_705_314_600_000,
            alarm_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
        };

        let encoded = encode_alarm_cursor(&cursor).unwrap();

        assert_eq!(decode_alarm_cursor(&encoded).unwrap(), cursor);
    }

    #[test]
    fn test_decode_invalid_cursor() {
        // Invalid base64
        assert!(decode_alarm_cursor("not-valid-base64!@#").is_err());

        // Valid base64 but invalid JSON
        let invalid_json = general_purpose::STANDARD.encode(b"not json");
        assert!(decode_alarm_cursor(&invalid_json).is_err());

        // Valid JSON but wrong structure
        let wrong_structure = general_purpose::STANDARD.encode(b"{\"wrong\":\"fields\"}");
        assert!(decode_alarm_cursor(&wrong_structure).is_err());
    }

    #[test]
    fn test_paginate_walks_all_pages() {
        // newest first, with a tie on created_at_ms
        let alarms = vec![
            alarm("e", 50),
            alarm("c", 40),
            alarm("d", 40),
            alarm("b", 20),
            alarm("a", 10),
        ];

        let (page1, next1) = paginate(alarms.clone(), None, 2).unwrap();
        let cursor1 = decode_alarm_cursor(&next1.unwrap()).unwrap();
        let (page2, next2) = paginate(alarms.clone(), Some(&cursor1), 2).unwrap();
        let cursor2 = decode_alarm_cursor(&next2.unwrap()).unwrap();
        let (page3, next3) = paginate(alarms, Some(&cursor2), 2).unwrap();

        let ids = |page: &[Alarm]| page.iter().map(|a| a.alarm_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&page1), vec!["e", "c"]);
        assert_eq!(ids(&page2), vec!["d", "b"]);
        assert_eq!(ids(&page3), vec!["a"]);
        assert!(next3.is_none());
    }
}
