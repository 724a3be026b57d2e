use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::{require_capabilities, AuthUser};
use crate::routes::events::ApiError;
use crate::services::cep::CepStatus;
use crate::services::error::EventError;
use crate::services::poller::{PollerStatus, PollingRule};
use crate::state::AppState;

fn polling_rule_for(rule: &crate::services::types::Rule) -> PollingRule {
    PollingRule {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        sql: rule.sql.clone(),
        field_name: rule.field_name.clone(),
        check_interval_minutes: rule.check_interval_minutes,
        action_type: rule.action_type,
    }
}

#[utoipa::path(
    get,
    path = "/api/events/scheduler/status",
    tag = "events",
    responses((status = 200, description = "Poller status and per-rule schedule", body = PollerStatus))
)]
pub(crate) async fn status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<PollerStatus>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(state.poller.status()))
}

#[utoipa::path(
    get,
    path = "/api/events/cep/status",
    tag = "events",
    responses((status = 200, description = "In-process CEP engine status", body = CepStatus))
)]
pub(crate) async fn cep_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<CepStatus>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(state.cep.status()))
}

#[utoipa::path(
    post,
    path = "/api/events/scheduler/rules/{rule_id}/start",
    tag = "events",
    params(("rule_id" = String, Path, description = "Rule id")),
    responses(
        (status = 204, description = "Rule scheduled for polling"),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn start_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    let rule = state
        .registry
        .get(&rule_id)
        .ok_or(EventError::RuleNotFound(rule_id))?;
    state.poller.register_polling_rule(polling_rule_for(&rule));
    Ok(StatusCode::NO_CONTENT)
}

/// Schedules every active rule with a positive interval, re-registering any
/// already-running task. Used to bring the scheduler back up after a global
/// `stop`, or to pick up rules created while the scheduler was down.
#[utoipa::path(
    post,
    path = "/api/events/scheduler/start",
    tag = "events",
    responses((status = 204, description = "All active rules scheduled"))
)]
pub(crate) async fn start_scheduler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    for rule in state.registry.list() {
        if rule.is_active && rule.check_interval_minutes > 0 {
            state.poller.register_polling_rule(polling_rule_for(&rule));
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/events/scheduler/stop",
    tag = "events",
    responses((status = 204, description = "All scheduled rule tasks cancelled"))
)]
pub(crate) async fn stop_scheduler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    state.poller.stop();
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/events/scheduler/rules/{rule_id}/stop",
    tag = "events",
    params(("rule_id" = String, Path, description = "Rule id")),
    responses((status = 204, description = "Rule unscheduled"))
)]
pub(crate) async fn stop_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    state.poller.unregister_polling_rule(&rule_id);
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scheduler/status", get(status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/scheduler/rules/{rule_id}/start", post(start_rule))
        .route("/scheduler/rules/{rule_id}/stop", post(stop_rule))
        .route("/cep/status", get(cep_status))
}
