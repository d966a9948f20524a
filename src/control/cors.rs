use lambda_http::http::HeaderValue;
use lambda_http::{Body, Response};

const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Add CORS headers to a response
///
/// Reads the CORS_ALLOWED_ORIGIN environment variable to determine the allowed origin.
/// If not set (or not a valid header value), defaults to "*".
pub fn add_cors_headers(mut response: Response<Body>) -> Response<Body> {
    let allowed_origin = std::env::var("CORS_ALLOWED_ORIGIN")
        .ok()
        .and_then(|origin| HeaderValue::from_str(&origin).ok())
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", allowed_origin);
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("3600"));

    response
}

/// 200 response with CORS headers and an empty body, for OPTIONS requests
pub fn preflight_response() -> Response<Body> {
    add_cors_headers(Response::new(Body::Empty))
}
