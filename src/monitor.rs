// Monitor daemon entry point: offline detector and cleaning scheduler

mod config;
mod repo;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::MonitorConfig;
use repo::{
    DynamoAlarmStore, DynamoCleaningLog, DynamoHeartbeatRepository, DynamoMachineRegistry,
    DynamoNotificationOutbox,
};
use vending_monitor::shared::alarm_engine::AlarmEngine;
use vending_monitor::shared::cleaning_scheduler::CleaningScheduler;
use vending_monitor::shared::controller::MonitorController;
use vending_monitor::shared::id_generator::RandomIdGenerator;
use vending_monitor::shared::notify::AlarmNotifier;
use vending_monitor::shared::offline_detector::OfflineDetector;
use vending_monitor::shared::thresholds::SharedOfflineThresholds;
use vending_monitor::shared::time::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let config = MonitorConfig::from_env()
        .await
        .context("failed to load monitor configuration")?;

    info!(
        offline_minutes = config.offline_thresholds.offline_minutes,
        critical_minutes = config.offline_thresholds.critical_minutes,
        detector_interval_secs = config.detector_interval.as_secs(),
        cleaning_interval_secs = config.cleaning_interval.as_secs(),
        concurrency = config.concurrency,
        "Starting vending fleet monitor"
    );

    let client = config.dynamodb_client.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let ids = Arc::new(RandomIdGenerator::new());

    let registry = Arc::new(DynamoMachineRegistry::new(
        client.clone(),
        &config.tables.machines,
    ));
    let outbox = Arc::new(DynamoNotificationOutbox::new(
        client.clone(),
        &config.tables.notifications,
        clock.clone(),
        ids.clone(),
    ));
    let notifier = Arc::new(AlarmNotifier::new(registry.clone(), outbox));
    let engine = Arc::new(
        AlarmEngine::new(
            Arc::new(DynamoAlarmStore::new(client.clone(), &config.tables.alarms)),
            clock.clone(),
            ids,
        )
        .with_notifier(notifier),
    );

    let detector = OfflineDetector::new(
        registry.clone(),
        Arc::new(DynamoHeartbeatRepository::new(
            client.clone(),
            &config.tables.heartbeats,
        )),
        engine.clone(),
        clock.clone(),
        SharedOfflineThresholds::new(config.offline_thresholds),
    )
    .with_concurrency(config.concurrency);

    let scheduler = CleaningScheduler::new(
        registry,
        Arc::new(DynamoCleaningLog::new(client, &config.tables.cleaning_log)),
        engine,
        clock,
        config.cleaning_thresholds.clone(),
    )
    .with_concurrency(config.concurrency);

    let detector = MonitorController::new(Arc::new(detector), config.detector_interval);
    let scheduler = MonitorController::new(Arc::new(scheduler), config.cleaning_interval);
    detector.start();
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested, stopping monitors");

    detector.shutdown().await;
    scheduler.shutdown().await;

    for status in [detector.status(), scheduler.status()] {
        info!(
            task = status.task,
            cycles = status.cycles_completed,
            last_error = ?status.last_error,
            "Monitor stopped"
        );
    }
    Ok(())
}
