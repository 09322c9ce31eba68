//! Gateway error type and its HTTP rendering.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::inference::EngineError;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// A required field is missing or empty.
    #[error("{0}")]
    BadRequest(String),

    /// The body could not be read as the expected JSON.
    #[error("invalid request body: {0}")]
    Rejected(#[from] JsonRejection),

    /// The query string could not be read as the expected parameters.
    #[error("invalid query string: {0}")]
    QueryRejected(#[from] QueryRejection),

    /// The engine call failed; `context` names the operation.
    #[error("{context}: {source}")]
    Engine {
        context: &'static str,
        source: EngineError,
    },

    /// The concurrency limit is exhausted.
    #[error("too many concurrent requests, try again later")]
    Busy,

    /// Strict health mode and the engine is unhealthy.
    #[error("Ollama not available: {0}")]
    EngineDown(String),
}

impl ApiError {
    pub fn engine(context: &'static str, source: EngineError) -> Self {
        ApiError::Engine { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(rejection) => rejection.status(),
            ApiError::QueryRejected(rejection) => rejection.status(),
            ApiError::Engine { source, .. } => match source {
                EngineError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                EngineError::ModelMissing { .. } => StatusCode::NOT_FOUND,
                EngineError::Malformed { .. }
                | EngineError::Http { .. }
                | EngineError::Reported { .. }
                | EngineError::Stream { .. } => StatusCode::BAD_GATEWAY,
            },
            ApiError::Busy | ApiError::EngineDown(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Engine {
                source: EngineError::ModelMissing { model, .. },
                ..
            } => format!("{self} (pull it with POST /pull-model?model={model})"),
            _ => self.to_string(),
        };

        if status.is_server_error() {
            warn!(status = status.as_u16(), detail, "Request failed");
        }
        (status, Json(ErrorBody { detail })).into_response()
    }
}

/// Reject a missing or blank field before any engine call.
pub fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(format!("'{field}' is required"))),
    }
}
