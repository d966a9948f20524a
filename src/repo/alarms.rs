//! Alarm table.
//!
//! Every alarm is one item keyed by `alarm_id`. Each active alarm also owns a
//! guard item keyed by `guard#<machine_id>#<kind>`; the guard is written in
//! the same transaction as the alarm with `attribute_not_exists`, which makes
//! "at most one active alarm per machine and kind" a store-level guarantee.
//! Leaving `active` releases the guard.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, Put, ReturnValue, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{optional_n, optional_s, required_n, required_s, unavailable, Item};
use vending_monitor::shared::domain::{dedup_key, Alarm, AlarmFilter, AlarmKind, AlarmPatch};
use vending_monitor::shared::error::StoreError;
use vending_monitor::shared::ports::{AlarmStore, InsertOutcome};

const ITEM_TYPE_ALARM: &str = "alarm";
const ITEM_TYPE_GUARD: &str = "guard";
const GUARD_PREFIX: &str = "guard#";
const MAX_INSERT_ATTEMPTS: usize = 3;

pub struct DynamoAlarmStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoAlarmStore {
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("alarm_id", AttributeValue::S(key.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(unavailable)?;

        Ok(result.item)
    }

    async fn put_alarm_with_guard(&self, alarm: &Alarm) -> Result<bool, StoreError> {
        let guard_put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(guard_to_item(alarm)))
            .condition_expression("attribute_not_exists(alarm_id)")
            .build()
            .map_err(|e| StoreError::Serialization(format!("Failed to build guard Put: {}", e)))?;

        let alarm_put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(alarm_to_item(alarm)))
            .condition_expression("attribute_not_exists(alarm_id)")
            .build()
            .map_err(|e| StoreError::Serialization(format!("Failed to build alarm Put: {}", e)))?;

        let transact_items = vec![
            TransactWriteItem::builder().put(guard_put).build(),
            TransactWriteItem::builder().put(alarm_put).build(),
        ];

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_conditional_check_failed(&err) => Ok(false),
            Err(err) => Err(unavailable(err)),
        }
    }

    /// Delete the guard for `(machine_id, kind)` if `alarm_id` still holds it
    async fn release_guard(
        &self,
        machine_id: &str,
        kind: AlarmKind,
        alarm_id: &str,
    ) -> Result<(), StoreError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("alarm_id", AttributeValue::S(guard_key(machine_id, kind)))
            .condition_expression("active_alarm_id = :alarm_id")
            .expression_attribute_values(":alarm_id", AttributeValue::S(alarm_id.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            // Held by someone else, or already gone
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_conditional_check_failed_exception()) =>
            {
                Ok(())
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn put_alarm(&self, alarm: &Alarm) -> Result<(), StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(alarm_to_item(alarm)))
            .condition_expression("attribute_not_exists(alarm_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::ConditionalCheckFailed)
            }
            Err(err) => Err(unavailable(err)),
        }
    }
}

#[async_trait]
impl AlarmStore for DynamoAlarmStore {
    async fn get(&self, alarm_id: &str) -> Result<Option<Alarm>, StoreError> {
        match self.get_item(alarm_id).await? {
            Some(item) if is_alarm_item(&item) => item_to_alarm(&item).map(Some),
            _ => Ok(None),
        }
    }

    async fn query(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StoreError> {
        let (expression, names, values) = filter_expression(filter);

        let mut alarms = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression(&expression)
                // DynamoDB rejects an empty name map
                .set_expression_attribute_names((!names.is_empty()).then(|| names.clone()))
                .set_expression_attribute_values(Some(values.clone()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(unavailable)?;

            for item in result.items.unwrap_or_default() {
                match item_to_alarm(&item) {
                    Ok(alarm) => alarms.push(alarm),
                    Err(e) => warn!(error = %e, "Skipping malformed alarm item"),
                }
            }

            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        debug!(count = alarms.len(), "Alarm scan completed");
        Ok(alarms)
    }

    async fn insert(&self, alarm: &Alarm) -> Result<(), StoreError> {
        if !alarm.is_active() {
            return self.put_alarm(alarm).await;
        }
        match self.insert_if_no_active(alarm).await? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Existing(_) => Err(StoreError::ConditionalCheckFailed),
        }
    }

    async fn insert_if_no_active(&self, alarm: &Alarm) -> Result<InsertOutcome, StoreError> {
        for attempt in 1..=MAX_INSERT_ATTEMPTS {
            if self.put_alarm_with_guard(alarm).await? {
                return Ok(InsertOutcome::Inserted);
            }

            // Guard held: report its alarm unless that alarm has left `active`
            let Some(guard) = self.get_item(&guard_key(&alarm.machine_id, alarm.kind)).await?
            else {
                continue;
            };
            let holder = required_s(&guard, "active_alarm_id")?;
            match self.get(&holder).await? {
                Some(existing) if existing.is_active() => {
                    return Ok(InsertOutcome::Existing(existing.alarm_id));
                }
                _ => {
                    warn!(
                        machine_id = %alarm.machine_id,
                        kind = %alarm.kind,
                        holder = %holder,
                        attempt,
                        "Releasing stale alarm guard"
                    );
                    self.release_guard(&alarm.machine_id, alarm.kind, &holder)
                        .await?;
                }
            }
        }

        Err(StoreError::ConditionalCheckFailed)
    }

    fn has_conditional_insert(&self) -> bool {
        true
    }

    async fn patch(&self, alarm_id: &str, patch: &AlarmPatch) -> Result<Alarm, StoreError> {
        if patch.expected_statuses.is_empty() {
            return Err(StoreError::ConditionalCheckFailed);
        }

        let (update, condition, names, values) = patch_expressions(patch);

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("alarm_id", AttributeValue::S(alarm_id.to_string()))
            .update_expression(update)
            .condition_expression(condition)
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        let attributes = match result {
            Ok(output) => output.attributes.unwrap_or_default(),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_conditional_check_failed_exception()) =>
            {
                return match self.get(alarm_id).await? {
                    Some(_) => Err(StoreError::ConditionalCheckFailed),
                    None => Err(StoreError::NotFound),
                };
            }
            Err(err) => return Err(unavailable(err)),
        };

        let alarm = item_to_alarm(&attributes)?;
        if !alarm.is_active() {
            // A leftover guard is cleared by the next insert for the same key
            if let Err(e) = self
                .release_guard(&alarm.machine_id, alarm.kind, &alarm.alarm_id)
                .await
            {
                warn!(alarm_id = %alarm.alarm_id, error = %e, "Failed to release alarm guard");
            }
        }
        Ok(alarm)
    }

    async fn delete(&self, alarm_id: &str) -> Result<bool, StoreError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("alarm_id", AttributeValue::S(alarm_id.to_string()))
            .condition_expression("item_type = :alarm_type")
            .expression_attribute_values(
                ":alarm_type",
                AttributeValue::S(ITEM_TYPE_ALARM.to_string()),
            )
            .return_values(ReturnValue::AllOld)
            .send()
            .await;

        let old = match result {
            Ok(output) => output.attributes,
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_conditional_check_failed_exception()) =>
            {
                return Ok(false);
            }
            Err(err) => return Err(unavailable(err)),
        };

        if let Some(alarm) = old.as_ref().and_then(|item| item_to_alarm(item).ok()) {
            if alarm.is_active() {
                self.release_guard(&alarm.machine_id, alarm.kind, &alarm.alarm_id)
                    .await?;
            }
        }
        Ok(old.is_some())
    }
}

fn guard_key(machine_id: &str, kind: AlarmKind) -> String {
    format!("{}{}", GUARD_PREFIX, dedup_key(machine_id, kind))
}

fn is_alarm_item(item: &Item) -> bool {
    optional_s(item, "item_type").as_deref() == Some(ITEM_TYPE_ALARM)
}

/// Scan filter for `filter`, always restricted to alarm items
fn filter_expression(
    filter: &AlarmFilter,
) -> (String, HashMap<String, String>, HashMap<String, AttributeValue>) {
    let mut conditions = vec!["item_type = :alarm_type".to_string()];
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    values.insert(
        ":alarm_type".to_string(),
        AttributeValue::S(ITEM_TYPE_ALARM.to_string()),
    );

    if let Some(ref machine_id) = filter.machine_id {
        conditions.push("machine_id = :machine_id".to_string());
        values.insert(
            ":machine_id".to_string(),
            AttributeValue::S(machine_id.clone()),
        );
    }
    if let Some(kind) = filter.kind {
        conditions.push("#kind = :kind".to_string());
        names.insert("#kind".to_string(), "kind".to_string());
        values.insert(":kind".to_string(), AttributeValue::S(kind.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        conditions.push("#status = :status".to_string());
        names.insert("#status".to_string(), "status".to_string());
        values.insert(
            ":status".to_string(),
            AttributeValue::S(status.as_str().to_string()),
        );
    }
    if let Some(cutoff) = filter.created_before_ms {
        conditions.push("created_at_ms < :cutoff".to_string());
        values.insert(":cutoff".to_string(), AttributeValue::N(cutoff.to_string()));
    }

    (conditions.join(" AND "), names, values)
}

/// Update and condition expressions applying `patch` behind its status guard
fn patch_expressions(
    patch: &AlarmPatch,
) -> (
    String,
    String,
    HashMap<String, String>,
    HashMap<String, AttributeValue>,
) {
    let mut names = HashMap::new();
    names.insert("#status".to_string(), "status".to_string());

    let mut values = HashMap::new();
    values.insert(
        ":status".to_string(),
        AttributeValue::S(patch.status.as_str().to_string()),
    );
    values.insert(
        ":alarm_type".to_string(),
        AttributeValue::S(ITEM_TYPE_ALARM.to_string()),
    );

    let mut sets = vec!["#status = :status".to_string()];
    if let Some(at) = patch.acknowledged_at_ms {
        sets.push("acknowledged_at_ms = :acknowledged_at".to_string());
        values.insert(":acknowledged_at".to_string(), AttributeValue::N(at.to_string()));
    }
    if let Some(ref by) = patch.acknowledged_by {
        sets.push("acknowledged_by = :acknowledged_by".to_string());
        values.insert(":acknowledged_by".to_string(), AttributeValue::S(by.clone()));
    }
    if let Some(at) = patch.resolved_at_ms {
        sets.push("resolved_at_ms = :resolved_at".to_string());
        values.insert(":resolved_at".to_string(), AttributeValue::N(at.to_string()));
    }

    let expected: Vec<String> = patch
        .expected_statuses
        .iter()
        .enumerate()
        .map(|(i, status)| {
            let placeholder = format!(":expected{}", i);
            values.insert(
                placeholder.clone(),
                AttributeValue::S(status.as_str().to_string()),
            );
            placeholder
        })
        .collect();

    let update = format!("SET {}", sets.join(", "));
    let condition = format!(
        "item_type = :alarm_type AND #status IN ({})",
        expected.join(", ")
    );
    (update, condition, names, values)
}

fn guard_to_item(alarm: &Alarm) -> Item {
    let mut item = HashMap::new();
    item.insert(
        "alarm_id".to_string(),
        AttributeValue::S(guard_key(&alarm.machine_id, alarm.kind)),
    );
    item.insert(
        "item_type".to_string(),
        AttributeValue::S(ITEM_TYPE_GUARD.to_string()),
    );
    item.insert(
        "active_alarm_id".to_string(),
        AttributeValue::S(alarm.alarm_id.clone()),
    );
    item
}

fn alarm_to_item(alarm: &Alarm) -> Item {
    let mut item = HashMap::new();

    // Partition key
    item.insert(
        "alarm_id".to_string(),
        AttributeValue::S(alarm.alarm_id.clone()),
    );
    item.insert(
        "item_type".to_string(),
        AttributeValue::S(ITEM_TYPE_ALARM.to_string()),
    );

    item.insert(
        "machine_id".to_string(),
        AttributeValue::S(alarm.machine_id.clone()),
    );
    item.insert(
        "kind".to_string(),
        AttributeValue::S(alarm.kind.as_str().to_string()),
    );
    item.insert(
        "severity".to_string(),
        AttributeValue::S(alarm.severity.as_str().to_string()),
    );
    item.insert(
        "message".to_string(),
        AttributeValue::S(alarm.message.clone()),
    );
    item.insert(
        "status".to_string(),
        AttributeValue::S(alarm.status.as_str().to_string()),
    );
    item.insert(
        "created_at_ms".to_string(),
        AttributeValue::N(alarm.created_at_ms.to_string()),
    );

    if let Some(at) = alarm.acknowledged_at_ms {
        item.insert(
            "acknowledged_at_ms".to_string(),
            AttributeValue::N(at.to_string()),
        );
    }
    if let Some(ref by) = alarm.acknowledged_by {
        item.insert("acknowledged_by".to_string(), AttributeValue::S(by.clone()));
    }
    if let Some(at) = alarm.resolved_at_ms {
        item.insert(
            "resolved_at_ms".to_string(),
            AttributeValue::N(at.to_string()),
        );
    }

    let metadata = alarm
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), AttributeValue::S(v.clone())))
        .collect();
    item.insert("metadata".to_string(), AttributeValue::M(metadata));

    item
}

fn item_to_alarm(item: &Item) -> Result<Alarm, StoreError> {
    let kind = required_s(item, "kind")?
        .parse()
        .map_err(StoreError::Serialization)?;
    let status = required_s(item, "status")?
        .parse()
        .map_err(StoreError::Serialization)?;
    let severity = serde_json::from_value(serde_json::Value::String(required_s(
        item, "severity",
    )?))
    .map_err(|e| StoreError::Serialization(format!("invalid severity: {}", e)))?;

    let metadata = item
        .get("metadata")
        .and_then(|v| v.as_m().ok())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_s().ok().map(|s| (k.clone(), s.clone())))
                .collect()
        })
        .unwrap_or_default();

    Ok(Alarm {
        alarm_id: required_s(item, "alarm_id")?,
        machine_id: required_s(item, "machine_id")?,
        kind,
        severity,
        message: optional_s(item, "message").unwrap_or_default(),
        status,
        created_at_ms: required_n(item, "created_at_ms")?,
        acknowledged_at_ms: optional_n(item, "acknowledged_at_ms"),
        acknowledged_by: optional_s(item, "acknowledged_by"),
        resolved_at_ms: optional_n(item, "resolved_at_ms"),
        metadata,
    })
}

/// Check if the error is a TransactionCanceledException due to conditional check failure
fn is_conditional_check_failed(
    err: &aws_sdk_dynamodb::error::SdkError<
        aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError,
    >,
) -> bool {
    use aws_sdk_dynamodb::error::SdkError;
    use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;

    match err {
        SdkError::ServiceError(service_err) => {
            matches!(
                service_err.err(),
                TransactWriteItemsError::TransactionCanceledException(_)
            )
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vending_monitor::shared::domain::{AlarmStatus, Severity};

    fn sample_alarm() -> Alarm {
        let mut metadata = HashMap::new();
        metadata.insert("age_minutes".to_string(), "6".to_string());
        metadata.insert("location".to_string(), "Lobby".to_string());

        Alarm {
            alarm_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            machine_id: "M1".to_string(),
            kind: AlarmKind::CriticalOffline,
            severity: Severity::Critical,
            message: "Lobby coffee (SN-1) offline".to_string(),
            status: AlarmStatus::Acknowledged,
            created_at_ms: 1_705_314_600_000,
            acknowledged_at_ms: Some(1_705_314_700_000),
            acknowledged_by: Some("ops@example.com".to_string()),
            resolved_at_ms: None,
            metadata,
        }
    }

    #[test]
    fn test_alarm_item_conversion() {
        let alarm = sample_alarm();

        let item = alarm_to_item(&alarm);

        assert_eq!(item.get("kind").unwrap().as_s().unwrap(), "critical-offline");
        assert_eq!(item.get("severity").unwrap().as_s().unwrap(), "critical");
        assert_eq!(item.get("item_type").unwrap().as_s().unwrap(), "alarm");
        assert!(!item.contains_key("resolved_at_ms"));
        assert!(is_alarm_item(&item));
        assert_eq!(item_to_alarm(&item).unwrap(), alarm);
    }

    #[test]
    fn test_item_to_alarm_rejects_unknown_kind() {
        let mut item = alarm_to_item(&sample_alarm());
        item.insert("kind".to_string(), AttributeValue::S("meltdown".to_string()));

        assert!(matches!(
            item_to_alarm(&item),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_guard_item_points_at_alarm() {
        let alarm = sample_alarm();

        let guard = guard_to_item(&alarm);

        assert_eq!(
            guard.get("alarm_id").unwrap().as_s().unwrap(),
            "guard#M1#critical-offline"
        );
        assert_eq!(
            guard.get("active_alarm_id").unwrap().as_s().unwrap(),
            &alarm.alarm_id
        );
        assert!(!is_alarm_item(&guard));
    }

    #[test]
    fn test_filter_expression_combines_conditions() {
        let filter = AlarmFilter {
            machine_id: Some("M1".to_string()),
            kind: Some(AlarmKind::Offline),
            status: Some(AlarmStatus::Active),
            created_before_ms: Some(1_000),
        };

        let (expression, names, values) = filter_expression(&filter);

        assert_eq!(
            expression,
            "item_type = :alarm_type AND machine_id = :machine_id AND #kind = :kind \
             AND #status = :status AND created_at_ms < :cutoff"
        );
        assert_eq!(names.len(), 2);
        assert_eq!(values.get(":cutoff").unwrap().as_n().unwrap(), "1000");
    }

    #[test]
    fn test_filter_expression_default_matches_all_alarms() {
        let (expression, names, values) = filter_expression(&AlarmFilter::default());

        assert_eq!(expression, "item_type = :alarm_type");
        assert!(names.is_empty());
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_patch_expressions_for_resolve() {
        let (update, condition, _, values) = patch_expressions(&AlarmPatch::resolve(42));

        assert_eq!(update, "SET #status = :status, resolved_at_ms = :resolved_at");
        assert_eq!(
            condition,
            "item_type = :alarm_type AND #status IN (:expected0, :expected1)"
        );
        assert_eq!(values.get(":status").unwrap().as_s().unwrap(), "resolved");
        assert_eq!(values.get(":expected0").unwrap().as_s().unwrap(), "active");
        assert_eq!(
            values.get(":expected1").unwrap().as_s().unwrap(),
            "acknowledged"
        );
    }

    #[test]
    fn test_patch_expressions_for_acknowledge() {
        let (update, condition, _, values) =
            patch_expressions(&AlarmPatch::acknowledge("ops", 7));

        assert_eq!(
            update,
            "SET #status = :status, acknowledged_at_ms = :acknowledged_at, acknowledged_by = :acknowledged_by"
        );
        assert_eq!(condition, "item_type = :alarm_type AND #status IN (:expected0)");
        assert_eq!(values.get(":acknowledged_by").unwrap().as_s().unwrap(), "ops");
    }
}
