use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use tracing::{debug, warn};

use super::{unavailable, Item};
use vending_monitor::shared::domain::Machine;
use vending_monitor::shared::error::StoreError;
use vending_monitor::shared::ports::MachineRegistry;

/// Machine registry table keyed by `machine_id`.
///
/// Items carry the `Machine` fields under their serde names, with
/// `notification` as a nested map.
pub struct DynamoMachineRegistry {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoMachineRegistry {
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl MachineRegistry for DynamoMachineRegistry {
    async fn list(&self) -> Result<Vec<Machine>, StoreError> {
        let mut machines = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(unavailable)?;

            for item in result.items.unwrap_or_default() {
                // One bad registry row must not hide the rest of the fleet
                match item_to_machine(item) {
                    Ok(machine) => machines.push(machine),
                    Err(e) => warn!(error = %e, "Skipping malformed machine item"),
                }
            }

            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        debug!(count = machines.len(), "Loaded machine registry");
        Ok(machines)
    }

    async fn get(&self, machine_id: &str) -> Result<Option<Machine>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("machine_id", AttributeValue::S(machine_id.to_string()))
            .send()
            .await
            .map_err(unavailable)?;

        result.item.map(item_to_machine).transpose()
    }
}

fn item_to_machine(item: Item) -> Result<Machine, StoreError> {
    serde_dynamo::from_item(item)
        .map_err(|e| StoreError::Serialization(format!("invalid machine item: {}", e)))
}
