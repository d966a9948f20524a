use lambda_http::{http::Method, Body, Request, RequestExt, Response};
use std::sync::Arc;
use tracing::{info, warn};

use super::cors;
use super::error::ApiError;
use super::handlers;
use vending_monitor::shared::alarm_engine::AlarmEngine;

/// Long-lived state shared by every invocation of a warm Lambda
pub struct ControlState {
    pub engine: Arc<AlarmEngine>,
    pub admin_token: String,
}

#[cfg(test)]
impl ControlState {
    /// State backed by an in-memory alarm store and a controllable clock
    pub fn in_memory(admin_token: &str) -> (Self, vending_monitor::shared::time::FixedClock) {
        use vending_monitor::shared::id_generator::SequentialIdGenerator;
        use vending_monitor::shared::memory::InMemoryAlarmStore;
        use vending_monitor::shared::time::FixedClock;

        let clock = FixedClock::from_epoch_ms(1_705_314_600_000);
        let engine = AlarmEngine::new(
            Arc::new(InMemoryAlarmStore::new()),
            Arc::new(clock.clone()),
            Arc::new(SequentialIdGenerator::new("alarm")),
        );
        let state = ControlState {
            engine: Arc::new(engine),
            admin_token: admin_token.to_string(),
        };
        (state, clock)
    }
}

pub async fn route_request(
    event: Request,
    state: &ControlState,
) -> Result<Response<Body>, lambda_http::Error> {
    let path = normalize_path(event.uri().path());
    let method = event.method().clone();

    let request_id = event.lambda_context().request_id.clone();

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Routing control request"
    );

    if method == Method::OPTIONS {
        info!(
            request_id = %request_id,
            "Handling CORS preflight request"
        );
        return Ok(cors::preflight_response());
    }

    let result = match (&method, path.as_str()) {
        (&Method::GET, "/health") => Ok(handle_health(&request_id)),

        (&Method::GET, "/alarms") => handlers::alarms::list_alarms(event, state).await,
        (&Method::POST, "/alarms/purge") => handlers::alarms::purge_alarms(event, state).await,
        (_, path) if path.starts_with("/alarms/") => {
            let parts: Vec<String> = path
                .trim_start_matches("/alarms/")
                .split('/')
                .map(str::to_string)
                .collect();
            route_alarm_path(event, state, &method, &parts).await
        }

        _ => Err(ApiError::RouteNotFound),
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = e.status_code(),
                error = %e,
                "Control request failed"
            );
            e.to_http_response(&request_id)
        }
    };

    Ok(cors::add_cors_headers(response))
}

async fn route_alarm_path(
    event: Request,
    state: &ControlState,
    method: &Method,
    parts: &[String],
) -> Result<Response<Body>, ApiError> {
    match (method, parts) {
        (&Method::GET, [alarm_id]) => handlers::alarms::get_alarm(event, state, alarm_id).await,
        (&Method::DELETE, [alarm_id]) => {
            handlers::alarms::delete_alarm(event, state, alarm_id).await
        }
        (&Method::POST, [alarm_id, action]) if action == "acknowledge" => {
            handlers::alarms::acknowledge_alarm(event, state, alarm_id).await
        }
        (&Method::POST, [alarm_id, action]) if action == "resolve" => {
            handlers::alarms::resolve_alarm(event, state, alarm_id).await
        }
        _ => Err(ApiError::RouteNotFound),
    }
}

fn normalize_path(path: &str) -> String {
    if path == "/" {
        return path.to_string();
    }

    // Strip CloudFront path prefix if present
    let path = path.strip_prefix("/api/control").unwrap_or(path);

    path.trim_end_matches('/').to_string()
}

fn handle_health(request_id: &str) -> Response<Body> {
    let body = serde_json::json!({
        "status": "healthy",
        "service": "alarm-control-api",
        "request_id": request_id
    });

    handlers::json_body(200, body.to_string())
}
