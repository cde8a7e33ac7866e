use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use murmur_shared::ChatError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::Chat(err) => match err {
                ChatError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                ChatError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "forbidden"),
                ChatError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                ChatError::StateConflict(c) if c.is_window_expired() => {
                    (StatusCode::CONFLICT, "window_expired")
                }
                ChatError::StateConflict(_) => (StatusCode::CONFLICT, "conflict"),
                ChatError::Dependency(_) => (StatusCode::BAD_GATEWAY, "dependency"),
            },
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            ServerError::Chat(ChatError::PermissionDenied(reason)) => {
                format!("forbidden: {reason}")
            }
            ServerError::Chat(ChatError::Dependency(reason)) => {
                tracing::error!(error = %reason, "Dependency failure");
                "Upstream dependency failed".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
