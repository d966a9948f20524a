// Heartbeat stream Lambda: feeds heartbeat table changes into the live status publisher

mod config;

use aws_lambda_events::event::dynamodb::{Event as DynamoDbEvent, EventRecord};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use vending_monitor::shared::domain::{HeartbeatRecord, HeartbeatStatus};
use vending_monitor::shared::live_status::LiveStatusPublisher;
use vending_monitor::shared::thresholds::SharedOfflineThresholds;
use vending_monitor::shared::time::SystemClock;

/// Heartbeat row as written by ingestion; `status` is whatever the last
/// writer stored and is parsed leniently
#[derive(Debug, Deserialize)]
struct HeartbeatImage {
    machine_id: String,
    #[serde(default)]
    last_seen_at_ms: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metrics: Option<HashMap<String, f64>>,
}

impl From<HeartbeatImage> for HeartbeatRecord {
    fn from(image: HeartbeatImage) -> Self {
        HeartbeatRecord {
            machine_id: image.machine_id,
            last_seen_at_ms: image.last_seen_at_ms,
            status: image
                .status
                .as_deref()
                .map(HeartbeatStatus::parse_lenient)
                .unwrap_or_default(),
            metrics: image.metrics,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let thresholds = config::offline_thresholds_from_env()?;
    info!(
        offline_minutes = thresholds.offline_minutes,
        critical_minutes = thresholds.critical_minutes,
        "Starting heartbeat stream processor"
    );

    let publisher = LiveStatusPublisher::new(
        SharedOfflineThresholds::new(thresholds),
        Arc::new(SystemClock::new()),
    );

    // Lives as long as the warm container
    let _subscription = publisher.subscribe(|status| {
        debug!(
            machine_id = %status.machine_id,
            status = status.status.as_str(),
            is_offline = status.is_offline,
            "Live status published"
        );
    });

    run(service_fn(|event: LambdaEvent<DynamoDbEvent>| {
        function_handler(event, &publisher)
    }))
    .await
}

async fn function_handler(
    event: LambdaEvent<DynamoDbEvent>,
    publisher: &LiveStatusPublisher,
) -> Result<(), Error> {
    info!(
        "Processing heartbeat stream batch with {} records",
        event.payload.records.len()
    );

    let mut processed_count = 0;
    let mut skipped_count = 0;
    let mut error_count = 0;

    for record in &event.payload.records {
        match process_record(record, publisher) {
            Ok(true) => processed_count += 1,
            Ok(false) => skipped_count += 1,
            Err(e) => {
                error_count += 1;
                error!("Error processing record: {}", e);
                // Continue processing other records
            }
        }
    }

    info!(
        "Batch processing complete: {} processed, {} skipped, {} errors",
        processed_count, skipped_count, error_count
    );

    Ok(())
}

fn process_record(record: &EventRecord, publisher: &LiveStatusPublisher) -> Result<bool, Error> {
    if !is_upsert(&record.event_name) {
        return Ok(false);
    }

    let heartbeat = heartbeat_from_image(record.change.new_image.clone())?;
    publish(publisher, &heartbeat);
    Ok(true)
}

/// Only INSERT and MODIFY carry a new image
fn is_upsert(event_name: &str) -> bool {
    matches!(event_name, "INSERT" | "MODIFY")
}

fn heartbeat_from_image(image: serde_dynamo::Item) -> Result<HeartbeatRecord, Error> {
    let image: HeartbeatImage = serde_dynamo::from_item(image)
        .map_err(|e| format!("Failed to deserialize heartbeat: {}", e))?;
    Ok(image.into())
}

/// Publish one heartbeat and log offline/online flips
fn publish(publisher: &LiveStatusPublisher, heartbeat: &HeartbeatRecord) {
    let previous = publisher.get(&heartbeat.machine_id);
    let current = publisher.on_heartbeat_change(heartbeat);

    match previous {
        Some(previous) if previous.is_offline == current.is_offline => {}
        Some(_) if current.is_offline => {
            warn!(machine_id = %current.machine_id, "Machine went offline");
        }
        Some(_) => {
            info!(machine_id = %current.machine_id, "Machine back online");
        }
        None => {
            debug!(
                machine_id = %current.machine_id,
                is_offline = current.is_offline,
                "First heartbeat seen in this container"
            );
        }
    }
}
