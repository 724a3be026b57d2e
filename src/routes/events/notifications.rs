use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::{require_capabilities, AuthUser};
use crate::routes::events::ApiError;
use crate::services::types::Notification;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/events/notifications",
    tag = "events",
    responses((status = 200, description = "Recorded notifications", body = [Notification]))
)]
pub(crate) async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Notification>>, ApiError> {
    require_capabilities(&user, &["events.view"])?;
    Ok(Json(state.dispatcher.list_notifications()))
}

#[utoipa::path(
    post,
    path = "/api/events/notifications/{notification_id}/acknowledge",
    tag = "events",
    params(("notification_id" = String, Path, description = "Notification id")),
    responses(
        (status = 204, description = "Notification acknowledged"),
        (status = 404, description = "Notification not found")
    )
)]
pub(crate) async fn acknowledge_notification(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(notification_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_capabilities(&user, &["events.write"])?;
    state.dispatcher.acknowledge(&notification_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route(
            "/notifications/{notification_id}/acknowledge",
            post(acknowledge_notification),
        )
}
