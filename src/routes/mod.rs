pub mod api_tokens;
pub mod auth;
pub mod events;
pub mod health;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(api_tokens::router())
                .merge(events::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use std::sync::OnceLock;
    use tower::ServiceExt;

    static STATE: OnceLock<AppState> = OnceLock::new();

    fn state() -> AppState {
        STATE.get_or_init(crate::test_support::test_state).clone()
    }

    #[tokio::test]
    async fn event_rules_require_bearer_auth() {
        let app = Router::new()
            .route("/api/events/rules", get(events::rules::list_rules))
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/events/rules")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn event_rules_forbidden_without_view_caps() {
        let user = crate::test_support::test_user_with_caps(&[]);
        let result = events::rules::list_rules(
            axum::extract::State(state()),
            crate::auth::AuthUser(user),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn healthz_is_reachable_without_auth() {
        let app = Router::new().merge(health::router()).with_state(state());
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
