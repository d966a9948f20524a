use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::time::Duration;

/// Configuration for the alarm control API
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// DynamoDB client
    pub dynamodb_client: DynamoDbClient,
    /// Alarms table name
    pub alarms_table: String,
    /// Admin token for Bearer authentication
    pub admin_token: String,
}

impl ControlConfig {
    /// Create a new ControlConfig instance from environment variables
    pub async fn from_env() -> Result<Self, ControlConfigError> {
        let alarms_table = std::env::var("ALARMS_TABLE")
            .map_err(|_| ControlConfigError::MissingEnvVar("ALARMS_TABLE".to_string()))?;

        let admin_token = std::env::var("ADMIN_TOKEN")
            .map_err(|_| ControlConfigError::MissingEnvVar("ADMIN_TOKEN".to_string()))?;
        if admin_token.trim().is_empty() {
            return Err(ControlConfigError::MissingEnvVar("ADMIN_TOKEN".to_string()));
        }

        // Load AWS configuration with behavior version
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        // Create DynamoDB client with appropriate timeouts
        let dynamodb_config = aws_sdk_dynamodb::config::Builder::from(&aws_config)
            .timeout_config(
                aws_sdk_dynamodb::config::timeout::TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(25)) // Leave 5s buffer for Lambda timeout
                    .operation_attempt_timeout(Duration::from_secs(10))
                    .build(),
            )
            .build();

        let dynamodb_client = DynamoDbClient::from_conf(dynamodb_config);

        Ok(ControlConfig {
            dynamodb_client,
            alarms_table,
            admin_token,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ControlConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}
