use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{require_capabilities, AuthUser};
use crate::routes::events::ApiError;
use crate::services::registry::{preview_natural_language_condition, NaturalLanguagePreview};
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub(crate) struct PreviewConditionRequest {
    pub message: String,
}

/// Lets an authoring UI show what `POST /events/rules/from-natural-language`
/// would derive from a condition string before the caller commits to it.
#[utoipa::path(
    post,
    path = "/api/events/chat",
    tag = "events",
    request_body = PreviewConditionRequest,
    responses((status = 200, description = "Parsed predicate preview", body = NaturalLanguagePreview))
)]
pub(crate) async fn preview_condition(
    AuthUser(user): AuthUser,
    Json(payload): Json<PreviewConditionRequest>,
) -> Result<Json<NaturalLanguagePreview>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(preview_natural_language_condition(&payload.message)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", post(preview_condition))
}
