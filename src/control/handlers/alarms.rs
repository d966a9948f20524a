use lambda_http::{Body, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{json_response, parse_json_body};
use crate::auth::validate_bearer_token;
use crate::error::{ApiError, RequestError};
use crate::router::ControlState;
use vending_monitor::shared::cursor::{decode_alarm_cursor, paginate};
use vending_monitor::shared::domain::{Alarm, AlarmFilter, AlarmKind, AlarmStatus};
use vending_monitor::shared::validators::{validate_alarm_id, validate_machine_id};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;

/// Response payload for alarm listing
#[derive(Debug, Serialize)]
pub struct ListAlarmsResponse {
    pub alarms: Vec<Alarm>,
    /// Opaque cursor for the next page, absent on the last page
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub acknowledged_by: Option<String>,
}

/// Exactly one of `resolved: true` or `older_than_days` must be given
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeRequest {
    #[serde(default)]
    pub resolved: bool,
    pub older_than_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DeleteAlarmResponse {
    pub message: String,
    pub alarm_id: String,
}

/// Handler for GET /alarms
///
/// # Query Parameters
/// * `machine_id`, `kind`, `status` - Optional filters
/// * `limit` - Page size (default 50, max 100)
/// * `cursor` - Cursor from a previous response
pub async fn list_alarms(event: Request, state: &ControlState) -> Result<Response<Body>, ApiError> {
    let request_id = event.lambda_context().request_id.clone();
    validate_bearer_token(&event, &state.admin_token)?;

    let params = event.query_string_parameters();

    let machine_id = match params.first("machine_id") {
        Some(id) => {
            validate_machine_id(id)?;
            Some(id.to_string())
        }
        None => None,
    };
    let kind = params
        .first("kind")
        .map(|k| k.parse::<AlarmKind>())
        .transpose()
        .map_err(|_| RequestError::InvalidValue("kind".to_string()))?;
    let status = params
        .first("status")
        .map(|s| s.parse::<AlarmStatus>())
        .transpose()
        .map_err(|_| RequestError::InvalidValue("status".to_string()))?;
    let limit = match params.first("limit") {
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|l| *l >= 1)
            .ok_or_else(|| RequestError::InvalidValue("limit".to_string()))?
            .min(MAX_PAGE_SIZE),
        None => DEFAULT_PAGE_SIZE,
    };
    let cursor = params
        .first("cursor")
        .map(decode_alarm_cursor)
        .transpose()
        .map_err(|_| RequestError::InvalidCursor)?;

    let filter = AlarmFilter {
        machine_id,
        kind,
        status,
        created_before_ms: None,
    };
    let alarms = state.engine.list(&filter).await?;
    let total = alarms.len();
    let (alarms, next_cursor) = paginate(alarms, cursor.as_ref(), limit)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(
        request_id = %request_id,
        matched = total,
        returned = alarms.len(),
        has_next_cursor = next_cursor.is_some(),
        "Listed alarms"
    );

    json_response(
        200,
        &ListAlarmsResponse {
            alarms,
            next_cursor,
        },
    )
}

/// Handler for GET /alarms/{alarm_id}
pub async fn get_alarm(
    event: Request,
    state: &ControlState,
    alarm_id: &str,
) -> Result<Response<Body>, ApiError> {
    validate_bearer_token(&event, &state.admin_token)?;
    validate_alarm_id(alarm_id)?;

    let alarm = state.engine.get(alarm_id).await?;
    json_response(200, &alarm)
}

/// Handler for POST /alarms/{alarm_id}/acknowledge
pub async fn acknowledge_alarm(
    event: Request,
    state: &ControlState,
    alarm_id: &str,
) -> Result<Response<Body>, ApiError> {
    let request_id = event.lambda_context().request_id.clone();
    validate_bearer_token(&event, &state.admin_token)?;
    validate_alarm_id(alarm_id)?;

    let request: AcknowledgeRequest = parse_json_body(&event)?;
    let acknowledged_by = request
        .acknowledged_by
        .ok_or_else(|| RequestError::MissingField("acknowledged_by".to_string()))?;

    let alarm = state.engine.acknowledge(alarm_id, &acknowledged_by).await?;

    info!(
        request_id = %request_id,
        alarm_id = %alarm_id,
        "Alarm acknowledged via control API"
    );
    json_response(200, &alarm)
}

/// Handler for POST /alarms/{alarm_id}/resolve
pub async fn resolve_alarm(
    event: Request,
    state: &ControlState,
    alarm_id: &str,
) -> Result<Response<Body>, ApiError> {
    let request_id = event.lambda_context().request_id.clone();
    validate_bearer_token(&event, &state.admin_token)?;
    validate_alarm_id(alarm_id)?;

    let alarm = state.engine.resolve(alarm_id).await?;

    info!(
        request_id = %request_id,
        alarm_id = %alarm_id,
        "Alarm resolved via control API"
    );
    json_response(200, &alarm)
}

/// Handler for DELETE /alarms/{alarm_id}
pub async fn delete_alarm(
    event: Request,
    state: &ControlState,
    alarm_id: &str,
) -> Result<Response<Body>, ApiError> {
    validate_bearer_token(&event, &state.admin_token)?;
    validate_alarm_id(alarm_id)?;

    state.engine.delete(alarm_id).await?;

    json_response(
        200,
        &DeleteAlarmResponse {
            message: "Alarm deleted".to_string(),
            alarm_id: alarm_id.to_string(),
        },
    )
}

/// Handler for POST /alarms/purge
pub async fn purge_alarms(event: Request, state: &ControlState) -> Result<Response<Body>, ApiError> {
    let request_id = event.lambda_context().request_id.clone();
    validate_bearer_token(&event, &state.admin_token)?;

    let request: PurgeRequest = parse_json_body(&event)?;
    let report = match (request.resolved, request.older_than_days) {
        (true, None) => state.engine.purge_resolved().await?,
        (false, Some(days)) => state.engine.purge_older_than(days).await?,
        (false, None) => {
            return Err(RequestError::MissingField("resolved or older_than_days".to_string()).into())
        }
        (true, Some(_)) => {
            return Err(RequestError::InvalidValue(
                "resolved and older_than_days are mutually exclusive".to_string(),
            )
            .into())
        }
    };

    info!(
        request_id = %request_id,
        matched = report.matched,
        deleted = report.deleted,
        failed = report.failed,
        "Purge completed via control API"
    );
    json_response(200, &report)
}
