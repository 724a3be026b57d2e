pub mod callbacks;
pub mod chat;
pub mod notifications;
pub mod rules;
pub mod scheduler;
pub mod simulate;
pub mod templates;

use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::error::AppError;
use crate::services::error::EventError;
use crate::state::AppState;

/// Unifies the two error vocabularies event routes need: capability/session
/// failures from the shared auth layer, and domain failures from the event
/// services. Both already know how to render themselves as a JSON response.
pub(crate) enum ApiError {
    Auth(AppError),
    Event(EventError),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        ApiError::Event(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(err) => err.into_response(),
            ApiError::Event(err) => err.into_response(),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/events",
        Router::new()
            .merge(rules::router())
            .merge(notifications::router())
            .merge(scheduler::router())
            .merge(templates::router())
            .merge(chat::router())
            .merge(simulate::router())
            .merge(callbacks::router()),
    )
}
