use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::{require_capabilities, AuthUser};
use crate::routes::events::ApiError;
use crate::services::cep::{CepEngine, RuleSpec};
use crate::services::types::{ActionKind, CompareOp, Event, Rule, TriggerResult};
use crate::state::AppState;

const SIMULATED_RULE_ID: &str = "simulate";

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub(crate) struct SimulateRequest {
    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub duration_minutes: u32,
    #[serde(default)]
    pub window_minutes: Option<u32>,
    pub simulated_value: f64,
    pub simulated_duration_minutes: u32,
    #[serde(default = "default_source_id")]
    pub source_id: String,
}

fn default_source_id() -> String {
    "simulated".to_string()
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub(crate) struct SimulateResponse {
    pub triggered_count: usize,
    pub triggers: Vec<TriggerResult>,
}

/// Builds a synthetic event stream from the given predicate parameters and
/// runs it through a throwaway CEP engine, so an author can see whether a
/// candidate rule would fire before creating it. Never touches `state.cep`'s
/// real rule buffers or latch state, and never runs a query.
#[utoipa::path(
    post,
    path = "/api/events/simulate",
    tag = "events",
    request_body = SimulateRequest,
    responses((status = 200, description = "Trigger count and payload from a synthesized event stream", body = SimulateResponse))
)]
pub(crate) async fn simulate(
    AuthUser(user): AuthUser,
    Json(payload): Json<SimulateRequest>,
) -> Result<Json<SimulateResponse>, ApiError> {
    require_capabilities(&user, &["events.view"])?;

    let window_minutes = payload
        .window_minutes
        .unwrap_or_else(|| Rule::default_window_minutes(payload.duration_minutes));

    let engine = CepEngine::new();
    engine.register(RuleSpec {
        rule_id: SIMULATED_RULE_ID.to_string(),
        rule_name: SIMULATED_RULE_ID.to_string(),
        field_name: payload.field_name.clone(),
        operator: payload.operator,
        threshold: payload.threshold,
        window_minutes,
        duration_minutes: payload.duration_minutes,
        action_type: ActionKind::Alert,
        is_active: true,
    });

    let base = chrono::Utc::now();
    let events: Vec<Event> = (0..=payload.simulated_duration_minutes)
        .map(|minute| {
            let mut data = HashMap::new();
            data.insert(payload.field_name.clone(), serde_json::json!(payload.simulated_value));
            Event {
                timestamp: base + chrono::Duration::minutes(minute as i64),
                source_id: payload.source_id.clone(),
                event_type: payload.field_name.clone(),
                data,
            }
        })
        .collect();

    let triggers = engine.submit_batch(events);

    Ok(Json(SimulateResponse {
        triggered_count: triggers.len(),
        triggers,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/simulate", post(simulate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sustained_breach_over_the_full_duration_triggers_once() {
        let engine = CepEngine::new();
        engine.register(RuleSpec {
            rule_id: SIMULATED_RULE_ID.to_string(),
            rule_name: SIMULATED_RULE_ID.to_string(),
            field_name: "water_level".to_string(),
            operator: CompareOp::Gte,
            threshold: 3.0,
            window_minutes: 30,
            duration_minutes: 10,
            action_type: ActionKind::Alert,
            is_active: true,
        });

        let base = chrono::Utc::now();
        let events: Vec<Event> = (0..=12)
            .map(|minute| {
                let mut data = HashMap::new();
                data.insert("water_level".to_string(), serde_json::json!(3.5));
                Event {
                    timestamp: base + chrono::Duration::minutes(minute),
                    source_id: "simulated".to_string(),
                    event_type: "water_level".to_string(),
                    data,
                }
            })
            .collect();

        let triggers = engine.submit_batch(events);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].matching_events.len(), 11);
    }

    #[test]
    fn breach_shorter_than_the_requested_duration_never_triggers() {
        let engine = CepEngine::new();
        engine.register(RuleSpec {
            rule_id: SIMULATED_RULE_ID.to_string(),
            rule_name: SIMULATED_RULE_ID.to_string(),
            field_name: "water_level".to_string(),
            operator: CompareOp::Gte,
            threshold: 3.0,
            window_minutes: 30,
            duration_minutes: 10,
            action_type: ActionKind::Alert,
            is_active: true,
        });

        let base = chrono::Utc::now();
        let events: Vec<Event> = (0..=3)
            .map(|minute| {
                let mut data = HashMap::new();
                data.insert("water_level".to_string(), serde_json::json!(3.5));
                Event {
                    timestamp: base + chrono::Duration::minutes(minute),
                    source_id: "simulated".to_string(),
                    event_type: "water_level".to_string(),
                    data,
                }
            })
            .collect();

        let triggers = engine.submit_batch(events);
        assert!(triggers.is_empty());
    }
}
