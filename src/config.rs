use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::time::Duration;

use vending_monitor::shared::thresholds::{CleaningThresholdTable, OfflineThresholds};
use vending_monitor::shared::controller::DEFAULT_CONCURRENCY;

const DEFAULT_DETECTOR_INTERVAL_SECS: u64 = 120;
const DEFAULT_CLEANING_INTERVAL_SECS: u64 = 3600;

/// Configuration for the monitor daemon
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// DynamoDB client
    pub dynamodb_client: DynamoDbClient,
    pub tables: TableNames,
    pub offline_thresholds: OfflineThresholds,
    pub cleaning_thresholds: CleaningThresholdTable,
    /// Seconds between offline detector cycles
    pub detector_interval: Duration,
    /// Seconds between cleaning scheduler cycles
    pub cleaning_interval: Duration,
    /// Machines evaluated in parallel per cycle
    pub concurrency: usize,
}

/// DynamoDB table names used by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub machines: String,
    pub heartbeats: String,
    pub alarms: String,
    pub cleaning_log: String,
    pub notifications: String,
}

impl TableNames {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(TableNames {
            machines: required_var("MACHINES_TABLE")?,
            heartbeats: required_var("HEARTBEATS_TABLE")?,
            alarms: required_var("ALARMS_TABLE")?,
            cleaning_log: required_var("CLEANING_LOG_TABLE")?,
            notifications: required_var("NOTIFICATIONS_TABLE")?,
        })
    }
}

impl MonitorConfig {
    /// Create a new MonitorConfig instance from environment variables
    pub async fn from_env() -> Result<Self, ConfigError> {
        // Validate everything local before touching AWS
        let tables = TableNames::from_env()?;
        let offline_thresholds = offline_thresholds_from_env()?;
        let cleaning_thresholds = cleaning_thresholds_from_env()?;

        let detector_interval = Duration::from_secs(parse_var(
            "DETECTOR_INTERVAL_SECONDS",
            DEFAULT_DETECTOR_INTERVAL_SECS,
        )?);
        let cleaning_interval = Duration::from_secs(parse_var(
            "CLEANING_INTERVAL_SECONDS",
            DEFAULT_CLEANING_INTERVAL_SECS,
        )?);
        if detector_interval.is_zero() || cleaning_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "cycle intervals must be at least one second".to_string(),
            ));
        }

        let concurrency: usize = parse_var("MONITOR_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid(
                "MONITOR_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let dynamodb_client = dynamodb_client().await;

        Ok(MonitorConfig {
            dynamodb_client,
            tables,
            offline_thresholds,
            cleaning_thresholds,
            detector_interval,
            cleaning_interval,
            concurrency,
        })
    }

    /// Create a test configuration against a local DynamoDB endpoint
    #[cfg(test)]
    pub async fn for_test(endpoint_url: &str, tables: TableNames) -> Self {
        MonitorConfig {
            dynamodb_client: test_dynamodb_client(endpoint_url),
            tables,
            offline_thresholds: OfflineThresholds::default(),
            cleaning_thresholds: CleaningThresholdTable::default(),
            detector_interval: Duration::from_secs(DEFAULT_DETECTOR_INTERVAL_SECS),
            cleaning_interval: Duration::from_secs(DEFAULT_CLEANING_INTERVAL_SECS),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Build the DynamoDB client with operation timeouts
pub async fn dynamodb_client() -> DynamoDbClient {
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;

    let dynamodb_config = aws_sdk_dynamodb::config::Builder::from(&aws_config)
        .timeout_config(
            aws_sdk_dynamodb::config::timeout::TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(25))
                .operation_attempt_timeout(Duration::from_secs(10))
                .build(),
        )
        .build();

    DynamoDbClient::from_conf(dynamodb_config)
}

#[cfg(test)]
pub fn test_dynamodb_client(endpoint_url: &str) -> DynamoDbClient {
    use aws_sdk_dynamodb::config::{Credentials, Region};

    let credentials = Credentials::new("test_access_key", "test_secret_key", None, None, "test");

    let dynamodb_config = aws_sdk_dynamodb::config::Builder::new()
        .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(endpoint_url)
        .timeout_config(
            aws_sdk_dynamodb::config::timeout::TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(10))
                .operation_attempt_timeout(Duration::from_secs(5))
                .build(),
        )
        .build();

    DynamoDbClient::from_conf(dynamodb_config)
}

/// Offline thresholds from `OFFLINE_THRESHOLD_MINUTES` and
/// `CRITICAL_OFFLINE_THRESHOLD_MINUTES`, defaulting to 5 and 15 minutes
pub fn offline_thresholds_from_env() -> Result<OfflineThresholds, ConfigError> {
    let defaults = OfflineThresholds::default();
    let offline = parse_var("OFFLINE_THRESHOLD_MINUTES", defaults.offline_minutes)?;
    let critical = parse_var(
        "CRITICAL_OFFLINE_THRESHOLD_MINUTES",
        defaults.critical_minutes,
    )?;

    OfflineThresholds::new(offline, critical)
        .map_err(|e| ConfigError::Invalid(format!("offline thresholds: {}", e)))
}

/// Cleaning thresholds, with optional per-type overrides from
/// `CLEANING_THRESHOLDS_JSON`
pub fn cleaning_thresholds_from_env() -> Result<CleaningThresholdTable, ConfigError> {
    match std::env::var("CLEANING_THRESHOLDS_JSON") {
        Ok(json) if !json.trim().is_empty() => CleaningThresholdTable::from_json_overrides(&json)
            .map_err(|e| ConfigError::Invalid(format!("CLEANING_THRESHOLDS_JSON: {}", e))),
        _ => Ok(CleaningThresholdTable::default()),
    }
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{} is not a valid number: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
