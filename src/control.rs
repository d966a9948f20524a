// Alarm control API entry point

#[path = "control/error.rs"]
mod error;

#[path = "control/config.rs"]
mod config;

#[path = "control/cors.rs"]
pub mod cors;

#[path = "control/auth.rs"]
pub mod auth;

#[path = "control/router.rs"]
mod router;

#[path = "control/handlers/mod.rs"]
mod handlers;

// DynamoDB repositories shared with the monitor daemon
mod repo;

use lambda_http::{run, service_fn, Error, Request};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repo::DynamoAlarmStore;
use router::ControlState;
use vending_monitor::shared::alarm_engine::AlarmEngine;
use vending_monitor::shared::id_generator::RandomIdGenerator;
use vending_monitor::shared::time::SystemClock;

async fn function_handler(
    event: Request,
    state: &ControlState,
) -> Result<lambda_http::Response<lambda_http::Body>, Error> {
    router::route_request(event, state).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .without_time()
        .init();

    // Load configuration once per cold start
    let config = config::ControlConfig::from_env().await.map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        Error::from(format!("Configuration error: {}", e))
    })?;

    let engine = AlarmEngine::new(
        Arc::new(DynamoAlarmStore::new(
            config.dynamodb_client.clone(),
            &config.alarms_table,
        )),
        Arc::new(SystemClock::new()),
        Arc::new(RandomIdGenerator::new()),
    );
    let state = ControlState {
        engine: Arc::new(engine),
        admin_token: config.admin_token,
    };

    run(service_fn(|event: Request| function_handler(event, &state))).await
}
