use axum::{http::StatusCode, response::IntoResponse, Json};
use paperflow_engine::EngineError;
use serde_json::json;
use thiserror::Error;

/// Top-level API error shared by all route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::Engine(e) => match e {
                EngineError::NotFound(_) | EngineError::DeadLetterNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                EngineError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
                EngineError::QueueOverloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                EngineError::ResourceBusy { .. }
                | EngineError::IdempotencyConflict { .. }
                | EngineError::AlreadyReprocessed(_, _)
                | EngineError::Conflict { .. }
                | EngineError::IllegalTransition { .. } => StatusCode::CONFLICT,
                EngineError::NoHandler(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SerdeJson(_) => StatusCode::BAD_REQUEST,
        };

        let payload = json!({ "error": self.to_string() });
        (status, Json(payload)).into_response()
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}
