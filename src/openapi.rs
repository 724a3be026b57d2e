use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::auth as auth_routes;
use crate::routes::events::{callbacks, chat, notifications, rules, scheduler, simulate, templates};
use crate::routes::{api_tokens, health};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthz_handler,
        auth_routes::login,
        auth_routes::me,
        auth_routes::bootstrap,
        api_tokens::list_api_tokens,
        api_tokens::revoke_api_token,
        rules::list_rules,
        rules::get_rule,
        rules::create_rule,
        rules::create_rule_from_natural_language,
        rules::create_rule_from_template,
        rules::update_rule,
        rules::delete_rule,
        rules::toggle_rule,
        rules::run_rule,
        notifications::list_notifications,
        notifications::acknowledge_notification,
        scheduler::status,
        scheduler::start_scheduler,
        scheduler::stop_scheduler,
        scheduler::start_rule,
        scheduler::stop_rule,
        scheduler::cep_status,
        templates::list_templates,
        templates::list_categories,
        templates::templates_by_category,
        templates::get_template,
        chat::preview_condition,
        simulate::simulate,
        callbacks::cep_alert,
        callbacks::cep_process,
    ),
    components(schemas(
        health::HealthResponse,
        auth_routes::LoginRequest,
        auth_routes::LoginResponse,
        auth_routes::AuthMeResponse,
        auth_routes::AuthBootstrapResponse,
        api_tokens::ApiTokenInfo,
        crate::services::types::Rule,
        crate::services::types::Event,
        crate::services::types::TriggerResult,
        crate::services::types::Notification,
        crate::services::types::EventTemplate,
        crate::services::types::CompareOp,
        crate::services::types::ActionKind,
        crate::services::types::AlertConfig,
        crate::services::types::ProcessConfig,
        crate::services::cep::CepStatus,
        crate::services::poller::PollerStatus,
        crate::services::poller::PollerRuleStatus,
        crate::services::poller::PollOutcome,
        crate::services::registry::NaturalLanguagePreview,
        rules::CreateRuleRequest,
        rules::CreateRuleFromNaturalLanguageRequest,
        rules::CreateRuleFromTemplateRequest,
        rules::UpdateRuleRequest,
        rules::DeleteRuleResponse,
        chat::PreviewConditionRequest,
        simulate::SimulateRequest,
        simulate::SimulateResponse,
        callbacks::CepTriggerCallback,
    )),
    tags(
        (name = "auth", description = "Session and API token management"),
        (name = "events", description = "Rule registry, CEP status, notifications and templates"),
    )
)]
struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).expect("openapi spec always serializes")
}

async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(openapi_handler))
}
