use super::error::AuthError;
use lambda_http::Request;

/// Validates the Bearer token from the Authorization header against the
/// configured admin token
///
/// # Security Note
/// Uses constant-time comparison to prevent timing attacks
pub fn validate_bearer_token(event: &Request, expected_token: &str) -> Result<(), AuthError> {
    // Extract Authorization header
    let auth_header = event
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?;

    // Reject empty tokens
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }

    if expected_token.is_empty() {
        return Err(AuthError::ConfigError);
    }

    if !constant_time_compare(token, expected_token) {
        return Err(AuthError::InvalidToken);
    }

    Ok(())
}

/// Performs constant-time string comparison to prevent timing attacks
///
/// All bytes are compared so the running time does not leak the position of
/// the first mismatch.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() != b_bytes.len() {
        return false;
    }

    // XOR all bytes and accumulate result
    let mut result = 0u8;
    for (a_byte, b_byte) in a_bytes.iter().zip(b_bytes.iter()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}
