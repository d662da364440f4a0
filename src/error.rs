//! The enumerated error kinds of the catalog/reconciler/walker, plus the glue
//! that turns them into HTTP responses without leaking internals to clients.

use axum::{http::StatusCode, response::IntoResponse, Json};

/// Error kinds a catalog/reconciler/walker operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not owned: {0}")]
    NotOwned(String),
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("chunk exceeds configured size")]
    OverSize,
    #[error("chunk number out of range")]
    OutOfRange,
    #[error("authentication failed")]
    AuthFailed,
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("reconciler could not decide an action for {0}")]
    Unreconciled(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stored data does not match its hash: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            CoreError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            CoreError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            CoreError::NotOwned(m) => (StatusCode::FORBIDDEN, m.clone()),
            CoreError::QuotaExceeded => (StatusCode::INSUFFICIENT_STORAGE, self.to_string()),
            CoreError::OverSize => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            CoreError::OutOfRange => (StatusCode::BAD_REQUEST, self.to_string()),
            CoreError::AuthFailed => (StatusCode::UNAUTHORIZED, self.to_string()),
            CoreError::Unsupported(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            CoreError::Unreconciled(m) => (StatusCode::CONFLICT, m.clone()),
            CoreError::Transport(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            CoreError::Corrupt(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            CoreError::Database(e) => {
                // SECURITY: log full detail server-side, never leak schema/query info to the client.
                tracing::error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "an internal error occurred".to_string())
            }
            CoreError::Other(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "an internal error occurred".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
