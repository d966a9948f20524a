use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::sync::Arc;
use tracing::info;

use super::{unavailable, Item};
use vending_monitor::shared::domain::Notification;
use vending_monitor::shared::error::StoreError;
use vending_monitor::shared::id_generator::IdGenerator;
use vending_monitor::shared::ports::NotificationDispatcher;
use vending_monitor::shared::time::Clock;

/// Outbox rows expire after a week
const OUTBOX_RETENTION_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Notification outbox table; a delivery worker drains `pending` rows
pub struct DynamoNotificationOutbox {
    client: DynamoDbClient,
    table_name: String,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl DynamoNotificationOutbox {
    pub fn new(
        client: DynamoDbClient,
        table_name: impl Into<String>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            clock,
            ids,
        }
    }
}

#[async_trait]
impl NotificationDispatcher for DynamoNotificationOutbox {
    async fn submit(&self, notification: Notification) -> Result<(), StoreError> {
        let notification_id = self.ids.next_id();
        let item = outbox_item(&notification_id, &notification, self.clock.now_ms())?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(unavailable)?;

        info!(
            notification_id = %notification_id,
            recipients = notification.recipients.len(),
            "Notification queued"
        );
        Ok(())
    }
}

fn outbox_item(
    notification_id: &str,
    notification: &Notification,
    now_ms: i64,
) -> Result<Item, StoreError> {
    let mut item: Item = serde_dynamo::to_item(notification)
        .map_err(|e| StoreError::Serialization(format!("invalid notification: {}", e)))?;

    item.insert(
        "notification_id".to_string(),
        AttributeValue::S(notification_id.to_string()),
    );
    item.insert(
        "delivery_status".to_string(),
        AttributeValue::S("pending".to_string()),
    );
    item.insert(
        "created_at_ms".to_string(),
        AttributeValue::N(now_ms.to_string()),
    );
    item.insert(
        "expiration_time".to_string(),
        AttributeValue::N((now_ms / 1000 + OUTBOX_RETENTION_SECONDS).to_string()),
    );

    Ok(item)
}
