use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chat_protocol::DecodeError;
use thiserror::Error;

/// Failure outcomes of the messaging core.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Missing, or present but not visible to the requester.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Server-side fault unrelated to storage (hashing, signing, a panicked task).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Text delivered to the originating client in an `error` event.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Storage(_) => "storage unavailable, please retry".into(),
            ChatError::Internal(_) => "internal error".into(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Storage(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for ChatError {
    fn from(e: r2d2::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        ChatError::Internal(format!("blocking task failed: {e}"))
    }
}

impl From<DecodeError> for ChatError {
    fn from(e: DecodeError) -> Self {
        ChatError::Validation(e.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        match &self {
            ChatError::Storage(detail) => tracing::error!(error = %detail, "storage failure"),
            ChatError::Internal(detail) => tracing::error!(error = %detail, "internal failure"),
            _ => {}
        }
        let body = serde_json::json!({ "error": self.client_message() });
        (self.status(), axum::Json(body)).into_response()
    }
}
