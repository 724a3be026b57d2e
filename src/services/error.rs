use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;

/// Error taxonomy for the event-detection core. Every variant maps to a stable
/// `{error, message, details?}` JSON envelope rather than a raw status code.
#[derive(Debug)]
pub enum EventError {
    UnsafeSql(String),
    SqlTimeout,
    SqlSyntax(String),
    SqlRuntime(String),
    RuleNotFound(String),
    NotificationNotFound(String),
    TemplateNotFound(String),
    RemoteUnavailable(String),
    Transport(String),
    Timeout,
    Config(String),
    Validation(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::UnsafeSql(msg) => write!(f, "unsafe SQL: {msg}"),
            EventError::SqlTimeout => write!(f, "SQL execution timed out"),
            EventError::SqlSyntax(msg) => write!(f, "SQL syntax error: {msg}"),
            EventError::SqlRuntime(msg) => write!(f, "SQL runtime error: {msg}"),
            EventError::RuleNotFound(id) => write!(f, "rule not found: {id}"),
            EventError::NotificationNotFound(id) => write!(f, "notification not found: {id}"),
            EventError::TemplateNotFound(id) => write!(f, "template not found: {id}"),
            EventError::RemoteUnavailable(msg) => write!(f, "remote process unavailable: {msg}"),
            EventError::Transport(msg) => write!(f, "transport error: {msg}"),
            EventError::Timeout => write!(f, "request timed out"),
            EventError::Config(msg) => write!(f, "configuration error: {msg}"),
            EventError::Validation(msg) => write!(f, "validation error: {msg}"),
        }
    }
}

impl std::error::Error for EventError {}

impl EventError {
    fn kind(&self) -> &'static str {
        match self {
            EventError::UnsafeSql(_) => "unsafe_sql",
            EventError::SqlTimeout => "sql_timeout",
            EventError::SqlSyntax(_) => "sql_syntax",
            EventError::SqlRuntime(_) => "sql_runtime",
            EventError::RuleNotFound(_) => "rule_not_found",
            EventError::NotificationNotFound(_) => "notification_not_found",
            EventError::TemplateNotFound(_) => "template_not_found",
            EventError::RemoteUnavailable(_) => "remote_unavailable",
            EventError::Transport(_) => "transport_error",
            EventError::Timeout => "timeout",
            EventError::Config(_) => "config_error",
            EventError::Validation(_) => "validation_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            EventError::UnsafeSql(_) => StatusCode::BAD_REQUEST,
            EventError::SqlTimeout => StatusCode::GATEWAY_TIMEOUT,
            EventError::SqlSyntax(_) => StatusCode::BAD_REQUEST,
            EventError::SqlRuntime(_) => StatusCode::BAD_GATEWAY,
            EventError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            EventError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
            EventError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            EventError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            EventError::Transport(_) => StatusCode::BAD_GATEWAY,
            EventError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            EventError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EventError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for EventError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status >= StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "event core error");
        } else {
            tracing::warn!(error = %self, "event core error");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type EventResult<T> = Result<T, EventError>;
