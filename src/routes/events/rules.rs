use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{require_capabilities, AuthUser};
use crate::routes::events::ApiError;
use crate::services::error::EventError;
use crate::services::poller::{PollOutcome, PollingRule};
use crate::services::registry::{NaturalLanguageRuleInput, NewRuleInput, RuleUpdate, TemplateOverrides};
use crate::services::types::{ActionKind, AlertConfig, CompareOp, ProcessConfig, Rule};
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub(crate) struct CreateRuleRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub natural_language_condition: String,
    pub sql: String,
    pub check_interval_minutes: u32,
    pub condition_threshold: String,
    pub action_type: ActionKind,
    #[serde(default)]
    pub alert_config: Option<AlertConfig>,
    #[serde(default)]
    pub process_config: Option<ProcessConfig>,
    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub duration_minutes: u32,
    #[serde(default)]
    pub window_minutes: Option<u32>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub(crate) struct CreateRuleFromNaturalLanguageRequest {
    pub name: String,
    pub description: String,
    pub natural_language_condition: String,
    pub sql: String,
    pub check_interval_minutes: u32,
    pub condition_threshold: String,
    pub action_type: ActionKind,
    #[serde(default)]
    pub alert_config: Option<AlertConfig>,
    #[serde(default)]
    pub process_config: Option<ProcessConfig>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub(crate) struct CreateRuleFromTemplateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub check_interval_minutes: Option<u32>,
    #[serde(default)]
    pub alert_config: Option<AlertConfig>,
    #[serde(default)]
    pub process_config: Option<ProcessConfig>,
    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub duration_minutes: u32,
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub(crate) struct UpdateRuleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub natural_language_condition: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub check_interval_minutes: Option<u32>,
    #[serde(default)]
    pub condition_threshold: Option<String>,
    #[serde(default)]
    pub action_type: Option<ActionKind>,
    /// Replaces the alert config when present. There is no way to clear an
    /// existing config through this endpoint; delete and recreate the rule
    /// for that.
    #[serde(default)]
    pub alert_config: Option<AlertConfig>,
    #[serde(default)]
    pub process_config: Option<ProcessConfig>,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub operator: Option<CompareOp>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub window_minutes: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/api/events/rules",
    tag = "events",
    responses((status = 200, description = "All configured rules", body = [Rule]))
)]
pub(crate) async fn list_rules(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Rule>>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(state.registry.list()))
}

#[utoipa::path(
    get,
    path = "/api/events/rules/{rule_id}",
    tag = "events",
    params(("rule_id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule", body = Rule),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn get_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<String>,
) -> Result<Json<Rule>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    let rule = state
        .registry
        .get(&rule_id)
        .ok_or(EventError::RuleNotFound(rule_id))?;
    Ok(Json(rule))
}

#[utoipa::path(
    post,
    path = "/api/events/rules",
    tag = "events",
    request_body = CreateRuleRequest,
    responses((status = 200, description = "Created rule", body = Rule))
)]
pub(crate) async fn create_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateRuleRequest>,
) -> Result<Json<Rule>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    let window_minutes = payload
        .window_minutes
        .unwrap_or_else(|| Rule::default_window_minutes(payload.duration_minutes));
    let rule = state
        .registry
        .create(NewRuleInput {
            name: payload.name,
            description: payload.description,
            natural_language_condition: payload.natural_language_condition,
            sql: payload.sql,
            check_interval_minutes: payload.check_interval_minutes,
            condition_threshold: payload.condition_threshold,
            action_type: payload.action_type,
            alert_config: payload.alert_config,
            process_config: payload.process_config,
            field_name: payload.field_name,
            operator: payload.operator,
            threshold: payload.threshold,
            duration_minutes: payload.duration_minutes,
            window_minutes,
        })
        .await?;
    Ok(Json(rule))
}

#[utoipa::path(
    post,
    path = "/api/events/rules/from-natural-language",
    tag = "events",
    request_body = CreateRuleFromNaturalLanguageRequest,
    responses((status = 200, description = "Created rule", body = Rule))
)]
pub(crate) async fn create_rule_from_natural_language(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateRuleFromNaturalLanguageRequest>,
) -> Result<Json<Rule>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    let rule = state
        .registry
        .create_from_natural_language(NaturalLanguageRuleInput {
            name: payload.name,
            description: payload.description,
            natural_language_condition: payload.natural_language_condition,
            sql: payload.sql,
            check_interval_minutes: payload.check_interval_minutes,
            condition_threshold: payload.condition_threshold,
            action_type: payload.action_type,
            alert_config: payload.alert_config,
            process_config: payload.process_config,
        })
        .await?;
    Ok(Json(rule))
}

#[utoipa::path(
    post,
    path = "/api/events/templates/{template_id}/create-rule",
    tag = "events",
    params(("template_id" = String, Path, description = "Template id")),
    request_body = CreateRuleFromTemplateRequest,
    responses(
        (status = 200, description = "Created rule", body = Rule),
        (status = 404, description = "Template not found")
    )
)]
pub(crate) async fn create_rule_from_template(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(template_id): Path<String>,
    Json(payload): Json<CreateRuleFromTemplateRequest>,
) -> Result<Json<Rule>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    let rule = state
        .registry
        .create_from_template(
            &template_id,
            TemplateOverrides {
                name: payload.name,
                check_interval_minutes: payload.check_interval_minutes,
                alert_config: payload.alert_config,
                process_config: payload.process_config,
                field_name: payload.field_name,
                operator: payload.operator,
                threshold: payload.threshold,
                duration_minutes: payload.duration_minutes,
            },
        )
        .await?;
    Ok(Json(rule))
}

#[utoipa::path(
    put,
    path = "/api/events/rules/{rule_id}",
    tag = "events",
    params(("rule_id" = String, Path, description = "Rule id")),
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Updated rule", body = Rule),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn update_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<String>,
    Json(payload): Json<UpdateRuleRequest>,
) -> Result<Json<Rule>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    let rule = state
        .registry
        .update(
            &rule_id,
            RuleUpdate {
                name: payload.name,
                description: payload.description,
                natural_language_condition: payload.natural_language_condition,
                sql: payload.sql,
                check_interval_minutes: payload.check_interval_minutes,
                condition_threshold: payload.condition_threshold,
                action_type: payload.action_type,
                alert_config: payload.alert_config.map(Some),
                process_config: payload.process_config.map(Some),
                field_name: payload.field_name,
                operator: payload.operator,
                threshold: payload.threshold,
                duration_minutes: payload.duration_minutes,
                window_minutes: payload.window_minutes,
            },
        )
        .await?;
    Ok(Json(rule))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct DeleteRuleResponse {
    pub deleted: bool,
}

#[utoipa::path(
    delete,
    path = "/api/events/rules/{rule_id}",
    tag = "events",
    params(("rule_id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule deleted", body = DeleteRuleResponse),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn delete_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<String>,
) -> Result<Json<DeleteRuleResponse>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    state.registry.delete(&rule_id).await?;
    Ok(Json(DeleteRuleResponse { deleted: true }))
}

#[utoipa::path(
    post,
    path = "/api/events/rules/{rule_id}/toggle",
    tag = "events",
    params(("rule_id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule with flipped active flag", body = Rule),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn toggle_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<String>,
) -> Result<Json<Rule>, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    let rule = state.registry.toggle(&rule_id).await?;
    Ok(Json(rule))
}

#[utoipa::path(
    post,
    path = "/api/events/rules/{rule_id}/run",
    tag = "events",
    params(("rule_id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Result of forcing one poll iteration", body = PollOutcome),
        (status = 404, description = "Rule not found")
    )
)]
pub(crate) async fn run_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<String>,
) -> Result<Json<PollOutcome>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    let rule = state
        .registry
        .get(&rule_id)
        .ok_or(EventError::RuleNotFound(rule_id))?;
    let polling_rule = PollingRule {
        rule_id: rule.id,
        rule_name: rule.name,
        sql: rule.sql,
        field_name: rule.field_name,
        check_interval_minutes: rule.check_interval_minutes,
        action_type: rule.action_type,
    };
    let outcome = state.poller.run_once(&polling_rule).await;
    Ok(Json(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rules", get(list_rules).post(create_rule))
        .route(
            "/rules/{rule_id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/rules/{rule_id}/toggle", post(toggle_rule))
        .route("/rules/{rule_id}/run", post(run_rule))
        .route(
            "/rules/from-natural-language",
            post(create_rule_from_natural_language),
        )
}
