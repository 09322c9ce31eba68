//! Gateway HTTP API.
//!
//! - GET /
//! - POST /generate
//! - POST /api/ai/chat
//! - GET /health
//! - POST /pull-model
//! - GET /metrics

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::inference::{EngineError, InferenceClient};
use crate::server::error::{required, ApiError};
use crate::server::health::{HealthReport, HealthReporter};
use crate::server::metrics::{self, Metrics};
use crate::server::streaming::fragments_to_sse_stream;

/// Sentinel returned by /generate when the engine produced no content.
pub const NO_CONTENT: &str = "No content generated";

/// Application state shared across handlers.
pub struct AppState {
    pub client: Arc<dyn InferenceClient>,
    pub config: Arc<Config>,
    pub health: HealthReporter,
    pub metrics: Metrics,
    limiter: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(client: Arc<dyn InferenceClient>, config: Arc<Config>) -> prometheus::Result<Self> {
        let limiter = match config.server.max_concurrent_requests {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        Ok(Self {
            client,
            health: HealthReporter::new(&config.health),
            metrics: Metrics::new()?,
            limiter,
            config,
        })
    }

    /// Take a slot for an engine-bound request, or reject when none is free.
    fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, ApiError> {
        match &self.limiter {
            Some(limiter) => limiter
                .clone()
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| ApiError::Busy),
            None => Ok(None),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/generate", post(generate))
        .route("/api/ai/chat", post(chat_stream))
        .route("/health", get(health))
        .route("/pull-model", post(pull_model))
        .route("/metrics", get(metrics_text))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::very_permissive()),
        )
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Single-shot generation request.
#[derive(Debug, Deserialize)]
pub struct GenerationRequest {
    pub prompt: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub response: String,
    pub model: String,
    pub success: bool,
}

/// Streaming chat request. `userId` is logged only.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PullRequest {
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PullResponse {
    pub status: String,
    pub message: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub generate: &'static str,
    pub chat: &'static str,
    pub health: &'static str,
    pub pull_model: &'static str,
    pub metrics: &'static str,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Ollama API Server is running",
        status: "running",
        endpoints: Endpoints {
            generate: "POST /generate",
            chat: "POST /api/ai/chat",
            health: "GET /health",
            pull_model: "POST /pull-model",
            metrics: "GET /metrics",
        },
    })
}

async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let result = run_generate(&state, payload).await;
    let outcome = match &result {
        Ok(Json(body)) if body.success => metrics::OK,
        Ok(_) => metrics::SOFT_FAILURE,
        Err(_) => metrics::ERROR,
    };
    state.metrics.record("generate", outcome);
    result
}

async fn run_generate(
    state: &AppState,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let Json(req) = payload?;
    let prompt = required(req.prompt, "prompt")?;
    let model = state.config.resolve_model(req.model);
    let _permit = state.admit()?;

    let request_id = Uuid::new_v4().to_string();
    info!(
        request_id,
        model,
        prompt_chars = prompt.chars().count(),
        "Generate request"
    );

    let content = match state.client.complete(&prompt, &model).await {
        Ok(Some(content)) if !content.is_empty() => Some(content),
        Ok(_) => None,
        Err(EngineError::Malformed { reason }) => {
            warn!(request_id, reason, "Engine payload unusable");
            None
        }
        Err(e) => return Err(ApiError::engine("Generation failed", e)),
    };

    let response = match content {
        Some(response) => GenerationResponse {
            response,
            model,
            success: true,
        },
        None => {
            warn!(request_id, model, "Engine returned no content");
            GenerationResponse {
                response: NO_CONTENT.to_string(),
                model,
                success: false,
            }
        }
    };
    Ok(Json(response))
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let result = open_chat_stream(&state, payload).await;
    let outcome = if result.is_ok() { metrics::OK } else { metrics::ERROR };
    state.metrics.record("chat", outcome);
    result
}

async fn open_chat_stream(
    state: &AppState,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let message = required(req.message, "message")?;
    let user_id = required(req.user_id, "userId")?;
    let model = state.config.resolve_model(req.model);
    let permit = state.admit()?;

    let request_id = Uuid::new_v4().to_string();
    info!(request_id, user_id, model, "Chat stream request");

    let fragments = state
        .client
        .stream_complete(&message, &model, state.config.server.stream_idle_timeout())
        .await
        .map_err(|e| ApiError::engine("Streaming failed", e))?;

    let events = fragments_to_sse_stream(fragments, request_id, state.metrics.clone(), permit);
    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
    ];
    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthReport>, ApiError> {
    let report = state.health.report(state.client.as_ref()).await;
    let outcome = if report.is_healthy() { metrics::OK } else { metrics::SOFT_FAILURE };
    state.metrics.record("health", outcome);

    if state.health.strict() && !report.is_healthy() {
        return Err(ApiError::EngineDown(report.error.unwrap_or_default()));
    }
    Ok(Json(report))
}

async fn pull_model(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PullRequest>, QueryRejection>,
    body: Bytes,
) -> Result<Json<PullResponse>, ApiError> {
    let result = run_pull(&state, query, body).await;
    let outcome = if result.is_ok() { metrics::OK } else { metrics::ERROR };
    state.metrics.record("pull_model", outcome);
    result
}

async fn run_pull(
    state: &AppState,
    query: Result<Query<PullRequest>, QueryRejection>,
    body: Bytes,
) -> Result<Json<PullResponse>, ApiError> {
    let Query(query) = query?;
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        PullRequest::default()
    } else {
        serde_json::from_slice::<PullRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?
    };
    let requested = query
        .model
        .filter(|m| !m.trim().is_empty())
        .or(from_body.model);
    let model = state.config.resolve_model(requested);
    let _permit = state.admit()?;

    info!(model, "Pull model request");
    let ack = state
        .client
        .pull_model(&model)
        .await
        .map_err(|e| ApiError::engine("Failed to pull model", e))?;

    Ok(Json(PullResponse {
        status: "success".to_string(),
        message: format!("Model {} pull started", ack.model),
        details: ack.status,
    }))
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
