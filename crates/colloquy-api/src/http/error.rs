//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use colloquy_types::error::ChatError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors from the chat engine.
    Chat(ChatError),
    /// Missing or unreadable caller identity.
    Unauthorized(String),
    /// Malformed path or body.
    Validation(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError::Chat(e)
    }
}

impl AppError {
    /// Status code, machine-readable code and message for this error.
    pub fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Chat(e) => {
                let (status, code) = match e {
                    ChatError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    ChatError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                    ChatError::StoreUnavailable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
                    }
                    ChatError::StreamFailed(_) => (StatusCode::BAD_GATEWAY, "STREAM_FAILED"),
                    ChatError::UsageDenied => (StatusCode::TOO_MANY_REQUESTS, "USAGE_DENIED"),
                    ChatError::SessionBusy => (StatusCode::CONFLICT, "SESSION_BUSY"),
                    ChatError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                    ChatError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                };
                (status, code, e.to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(%status, code, %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
