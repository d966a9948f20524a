use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::collections::HashMap;

use super::{optional_n, optional_s, required_s, unavailable, Item};
use vending_monitor::shared::domain::{HeartbeatRecord, HeartbeatStatus};
use vending_monitor::shared::error::StoreError;
use vending_monitor::shared::ports::HeartbeatRepository;

/// Heartbeat table keyed by `machine_id`; ingestion writes `last_seen_at_ms`
pub struct DynamoHeartbeatRepository {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoHeartbeatRepository {
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl HeartbeatRepository for DynamoHeartbeatRepository {
    async fn read(&self, machine_id: &str) -> Result<Option<HeartbeatRecord>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("machine_id", AttributeValue::S(machine_id.to_string()))
            .send()
            .await
            .map_err(unavailable)?;

        result.item.as_ref().map(item_to_heartbeat).transpose()
    }

    async fn write_status(
        &self,
        machine_id: &str,
        status: HeartbeatStatus,
    ) -> Result<(), StoreError> {
        // SET on status only; last_seen_at_ms stays as ingestion wrote it
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("machine_id", AttributeValue::S(machine_id.to_string()))
            .update_expression("SET #status = :status")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(status.as_str().to_string()))
            .send()
            .await
            .map_err(unavailable)?;

        Ok(())
    }
}

pub fn item_to_heartbeat(item: &Item) -> Result<HeartbeatRecord, StoreError> {
    let status = optional_s(item, "status")
        .map(|s| HeartbeatStatus::parse_lenient(&s))
        .unwrap_or_default();

    let metrics = item.get("metrics").and_then(|v| v.as_m().ok()).map(|m| {
        m.iter()
            .filter_map(|(k, v)| {
                v.as_n()
                    .ok()
                    .and_then(|n| n.parse::<f64>().ok())
                    .map(|n| (k.clone(), n))
            })
            .collect::<HashMap<_, _>>()
    });

    Ok(HeartbeatRecord {
        machine_id: required_s(item, "machine_id")?,
        last_seen_at_ms: optional_n(item, "last_seen_at_ms"),
        status,
        metrics,
    })
}
