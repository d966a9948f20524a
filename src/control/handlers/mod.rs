pub mod alarms;

use lambda_http::http::header::CONTENT_TYPE;
use lambda_http::http::{HeaderValue, StatusCode};
use lambda_http::{Body, Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ApiError, RequestError};

/// JSON response with the given status
pub fn json_body(status: u16, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn json_response<T: Serialize>(status: u16, value: &T) -> Result<Response<Body>, ApiError> {
    let body = serde_json::to_string(value)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize response: {}", e)))?;
    Ok(json_body(status, body))
}

/// Deserialize a JSON request body; an empty body reads as `{}`
pub fn parse_json_body<T: DeserializeOwned>(event: &Request) -> Result<T, ApiError> {
    let body = match event.body() {
        Body::Text(text) => text.as_str(),
        Body::Binary(bytes) => std::str::from_utf8(bytes).map_err(|_| {
            RequestError::InvalidBody("Request body must be valid UTF-8".to_string())
        })?,
        Body::Empty => "{}",
    };

    serde_json::from_str(body)
        .map_err(|e| RequestError::InvalidBody(format!("Invalid JSON: {}", e)).into())
}
