//! Inference engine error types.

use thiserror::Error;

/// Errors returned by an [`InferenceClient`](super::client::InferenceClient).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine process could not be reached at all.
    #[error("engine unavailable at {endpoint}: {reason}")]
    Unavailable { endpoint: String, reason: String },

    /// The engine did not answer within the configured timeout.
    #[error("engine timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The requested model is not installed on the engine.
    #[error("model '{model}' not found: {reason}")]
    ModelMissing { model: String, reason: String },

    /// The engine answered with a payload we could not decode.
    #[error("malformed engine response: {reason}")]
    Malformed { reason: String },

    /// Any other non-2xx answer from the engine.
    #[error("engine returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The engine answered 2xx but its body carried an `error` field.
    #[error("engine reported an error: {message}")]
    Reported { message: String },

    /// Failure after a streaming response had started.
    #[error("engine stream failed: {reason}")]
    Stream { reason: String },
}

impl EngineError {
    /// Whether the engine never answered (as opposed to answering with an error).
    pub fn is_unreachable(&self) -> bool {
        matches!(self, EngineError::Unavailable { .. } | EngineError::Timeout { .. })
    }

    /// Map a transport-level `reqwest` failure.
    pub(crate) fn from_transport(endpoint: &str, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout { secs: timeout_secs }
        } else if err.is_decode() {
            EngineError::Malformed {
                reason: err.to_string(),
            }
        } else {
            EngineError::Unavailable {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }
}
