use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;

use super::unavailable;
use vending_monitor::shared::domain::CleaningEntry;
use vending_monitor::shared::error::StoreError;
use vending_monitor::shared::ports::CleaningLog;

/// Cleaning log keyed by `machine_id` with `timestamp_ms` as sort key
pub struct DynamoCleaningLog {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoCleaningLog {
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl CleaningLog for DynamoCleaningLog {
    async fn last_entry(&self, machine_id: &str) -> Result<Option<CleaningEntry>, StoreError> {
        let result = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("machine_id = :machine_id")
            .expression_attribute_values(
                ":machine_id",
                AttributeValue::S(machine_id.to_string()),
            )
            .scan_index_forward(false) // Most recent first
            .limit(1)
            .send()
            .await
            .map_err(unavailable)?;

        result
            .items
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|item| {
                serde_dynamo::from_item(item).map_err(|e| {
                    StoreError::Serialization(format!("invalid cleaning entry: {}", e))
                })
            })
            .transpose()
    }
}
