use lambda_http::{Body, Response};
use thiserror::Error;

use vending_monitor::shared::error::{error_codes, ErrorResponse, MonitorError};

/// Main error type for the alarm control API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Route not found")]
    RouteNotFound,

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Authentication-specific errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header is missing")]
    MissingToken,

    #[error("Bearer token is invalid")]
    InvalidToken,

    #[error("Authorization header format is invalid")]
    InvalidFormat,

    #[error("Admin token configuration error")]
    ConfigError,
}

/// Malformed request input
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Required field missing: {0}")]
    MissingField(String),

    #[error("Invalid format for field: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for field: {0}")]
    InvalidValue(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid cursor format")]
    InvalidCursor,
}

impl From<vending_monitor::shared::validators::ValidationError> for ApiError {
    fn from(err: vending_monitor::shared::validators::ValidationError) -> Self {
        ApiError::Request(RequestError::InvalidFormat(err.field))
    }
}

impl ApiError {
    fn parts(&self) -> (u16, &'static str, String) {
        match self {
            // Authentication errors
            ApiError::Auth(AuthError::MissingToken) => (
                401,
                error_codes::MISSING_TOKEN,
                String::from("Authorization header is required"),
            ),
            ApiError::Auth(AuthError::InvalidToken) => (
                401,
                error_codes::INVALID_TOKEN,
                String::from("Bearer token is invalid"),
            ),
            ApiError::Auth(AuthError::InvalidFormat) => (
                401,
                error_codes::UNAUTHORIZED,
                String::from("Authorization header format is invalid"),
            ),
            ApiError::Auth(AuthError::ConfigError) => (
                500,
                error_codes::INTERNAL_ERROR,
                String::from("Admin token configuration error"),
            ),

            // Request errors
            ApiError::Request(RequestError::MissingField(field)) => (
                400,
                error_codes::MISSING_FIELD,
                format!("Required field missing: {}", field),
            ),
            ApiError::Request(RequestError::InvalidFormat(field)) => (
                400,
                error_codes::INVALID_FORMAT,
                format!("Invalid format for field: {}", field),
            ),
            ApiError::Request(RequestError::InvalidValue(field)) => (
                400,
                error_codes::INVALID_VALUE,
                format!("Invalid value for field: {}", field),
            ),
            ApiError::Request(RequestError::InvalidBody(msg)) => {
                (400, error_codes::INVALID_FORMAT, msg.clone())
            }
            ApiError::Request(RequestError::InvalidCursor) => (
                400,
                error_codes::INVALID_CURSOR,
                String::from("Invalid cursor format"),
            ),

            ApiError::RouteNotFound => (
                404,
                error_codes::NOT_FOUND,
                String::from("Resource not found"),
            ),

            // Monitoring core errors
            ApiError::Monitor(err @ MonitorError::NotFound { .. }) => {
                (404, err.code(), err.to_string())
            }
            ApiError::Monitor(err @ MonitorError::InvalidState { .. }) => {
                (409, err.code(), err.to_string())
            }
            ApiError::Monitor(err @ MonitorError::Validation(msg)) => (400, err.code(), msg.clone()),
            ApiError::Monitor(err @ MonitorError::TransientIo(_)) => (
                503,
                err.code(),
                String::from("Alarm store is temporarily unavailable"),
            ),

            // Internal errors
            ApiError::Internal(_) => (
                500,
                error_codes::INTERNAL_ERROR,
                String::from("Internal server error occurred"),
            ),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.parts().0
    }

    /// Convert error to HTTP response with appropriate status code and error payload
    pub fn to_http_response(&self, request_id: &str) -> Response<Body> {
        let (status, error_code, message) = self.parts();

        let error_response = ErrorResponse::new(error_code, message, request_id);

        let body = error_response
            .to_json()
            .unwrap_or_else(|_| String::from(r#"{"error":"INTERNAL_ERROR","message":"Failed to serialize error response","request_id":""}"#));

        super::handlers::json_body(status, body)
    }
}
