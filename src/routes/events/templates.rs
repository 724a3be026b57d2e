use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::{require_capabilities, AuthUser};
use crate::routes::events::rules::create_rule_from_template;
use crate::routes::events::ApiError;
use crate::services::error::EventError;
use crate::services::templates;
use crate::services::types::EventTemplate;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/events/templates",
    tag = "events",
    responses((status = 200, description = "All built-in rule templates", body = [EventTemplate]))
)]
pub(crate) async fn list_templates(
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<EventTemplate>>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(templates::all().to_vec()))
}

#[utoipa::path(
    get,
    path = "/api/events/templates/categories",
    tag = "events",
    responses((status = 200, description = "Distinct template categories", body = [String]))
)]
pub(crate) async fn list_categories(
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<String>>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(templates::categories()))
}

#[utoipa::path(
    get,
    path = "/api/events/templates/by-category/{category}",
    tag = "events",
    params(("category" = String, Path, description = "Template category")),
    responses((status = 200, description = "Templates in the category", body = [EventTemplate]))
)]
pub(crate) async fn templates_by_category(
    AuthUser(user): AuthUser,
    Path(category): Path<String>,
) -> Result<Json<Vec<EventTemplate>>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(
        templates::by_category(&category)
            .into_iter()
            .cloned()
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/events/templates/{template_id}",
    tag = "events",
    params(("template_id" = String, Path, description = "Template id")),
    responses(
        (status = 200, description = "Template", body = EventTemplate),
        (status = 404, description = "Template not found")
    )
)]
pub(crate) async fn get_template(
    AuthUser(user): AuthUser,
    Path(template_id): Path<String>,
) -> Result<Json<EventTemplate>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    let template = templates::get(&template_id)
        .cloned()
        .ok_or(EventError::TemplateNotFound(template_id))?;
    Ok(Json(template))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates))
        .route("/templates/categories", get(list_categories))
        .route("/templates/by-category/{category}", get(templates_by_category))
        .route("/templates/{template_id}", get(get_template))
        .route(
            "/templates/{template_id}/create-rule",
            post(create_rule_from_template),
        )
}
