//! Observer API errors and their JSON rendering.
//!
//! Every failure answers with `{"error": "...", "status": <code>}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use taleforge_memory::MemoryError;
use taleforge_pipeline::CancelRefused;

/// A failed observer request.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// No such project or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path segment is not a valid project key.
    #[error("invalid project key: {0}")]
    InvalidKey(String),

    /// The pipeline state forbids the request (cancel while committing).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A response body could not be encoded.
    #[error("encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The memory store failed.
    #[error("store failure: {0}")]
    Internal(String),
}

impl ObserverError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidKey(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Serialization(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MemoryError> for ObserverError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::UnknownProject(key) => Self::NotFound(format!("project {key}")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CancelRefused> for ObserverError {
    fn from(err: CancelRefused) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "observer request failed");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
