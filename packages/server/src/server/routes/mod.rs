//! Route handlers and their shared error mapping.

pub mod engine;
pub mod health;
pub mod jobs;
pub mod topics;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::kernel::error::EngineError;

/// HTTP-facing error wrapper. Validation-class errors map to client
/// statuses; everything else is a 500 with the detail kept in the logs.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        ApiError(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError(EngineError::Other(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {}", what)),
            EngineError::Payload(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail.clone()),
            EngineError::Policy { tag } => (StatusCode::CONFLICT, tag.clone()),
            other => {
                error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
