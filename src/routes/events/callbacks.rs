use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::{require_capabilities, AuthUser};
use crate::routes::events::ApiError;
use crate::services::error::EventError;
use crate::services::types::{ActionKind, Event, Notification, TriggerResult};
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub(crate) struct CepTriggerCallback {
    pub rule_id: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub condition_met_duration_seconds: i64,
    #[serde(default)]
    pub matching_events: Vec<Event>,
}

/// Inbound callback the mirrored external CEP service uses to ask this
/// process to actually carry out an alert action for a rule it fired. Looked
/// up against the local registry so the channel/message config always comes
/// from this process's copy of the rule, not whatever the caller sent.
#[utoipa::path(
    post,
    path = "/api/events/cep-alert",
    tag = "events",
    request_body = CepTriggerCallback,
    responses(
        (status = 200, description = "Dispatched notification", body = Notification),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn cep_alert(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CepTriggerCallback>,
) -> Result<Json<Notification>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    dispatch_callback(&state, payload, ActionKind::Alert).await
}

#[utoipa::path(
    post,
    path = "/api/events/cep-process",
    tag = "events",
    request_body = CepTriggerCallback,
    responses(
        (status = 200, description = "Dispatched notification", body = Notification),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn cep_process(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CepTriggerCallback>,
) -> Result<Json<Notification>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    dispatch_callback(&state, payload, ActionKind::Process).await
}

async fn dispatch_callback(
    state: &AppState,
    payload: CepTriggerCallback,
    action_type: ActionKind,
) -> Result<Json<Notification>, ApiError> {
    let rule = state
        .registry
        .get(&payload.rule_id)
        .ok_or(EventError::RuleNotFound(payload.rule_id.clone()))?;

    let trigger = TriggerResult {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        triggered_at: payload.triggered_at,
        condition_met_duration_seconds: payload.condition_met_duration_seconds,
        matching_events: payload.matching_events,
        action_type,
    };

    let notification = state
        .dispatcher
        .dispatch(&trigger, rule.alert_config.as_ref(), rule.process_config.as_ref())
        .await;
    state.registry.record_trigger(&rule.id, trigger.triggered_at);

    Ok(Json(notification))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cep-alert", post(cep_alert))
        .route("/cep-process", post(cep_process))
}
