//! Integration tests for the gateway routes, driven by a stub engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use futures::stream::{self, StreamExt};
use tower::ServiceExt;

use ollama_gateway::config::Config;
use ollama_gateway::inference::{
    ChatFragment, EngineError, FragmentStream, InferenceClient, PullAck,
};
use ollama_gateway::server::{build_router, AppState};

type MakeError = fn() -> EngineError;

fn unreachable_engine() -> EngineError {
    EngineError::Unavailable {
        endpoint: "http://localhost:11434".to_string(),
        reason: "connection refused".to_string(),
    }
}

fn stream_broke() -> EngineError {
    EngineError::Stream {
        reason: "connection reset".to_string(),
    }
}

/// Scripted engine. `None` entries in `stream` inject a mid-stream failure.
struct StubEngine {
    completion: Result<Option<&'static str>, MakeError>,
    stream: Vec<Option<&'static str>>,
    stream_setup: Option<MakeError>,
    hang_after_stream: bool,
    models: Result<Vec<&'static str>, MakeError>,
    pull: Result<&'static str, MakeError>,
    calls: AtomicUsize,
    last_model: Mutex<Option<String>>,
}

impl Default for StubEngine {
    fn default() -> Self {
        Self {
            completion: Ok(Some("hi there")),
            stream: vec![Some("Hel"), Some("lo"), Some(" world")],
            stream_setup: None,
            hang_after_stream: false,
            models: Ok(vec!["gemma2:2b", "llama3:8b"]),
            pull: Ok("pulling manifest"),
            calls: AtomicUsize::new(0),
            last_model: Mutex::new(None),
        }
    }
}

impl StubEngine {
    fn called(&self, model: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_model.lock().unwrap() = Some(model.to_string());
    }
}

#[async_trait]
impl InferenceClient for StubEngine {
    async fn complete(&self, _prompt: &str, model: &str) -> Result<Option<String>, EngineError> {
        self.called(model);
        match &self.completion {
            Ok(content) => Ok(content.map(str::to_string)),
            Err(make) => Err(make()),
        }
    }

    async fn open_stream(&self, _message: &str, model: &str) -> Result<FragmentStream, EngineError> {
        self.called(model);
        if let Some(make) = self.stream_setup {
            return Err(make());
        }
        let items: Vec<Result<ChatFragment, EngineError>> = self
            .stream
            .iter()
            .map(|item| match item {
                Some(text) => Ok(ChatFragment::content(*text)),
                None => Err(stream_broke()),
            })
            .collect();
        if self.hang_after_stream {
            Ok(Box::pin(stream::iter(items).chain(stream::pending())))
        } else {
            Ok(Box::pin(stream::iter(items)))
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, EngineError> {
        match &self.models {
            Ok(names) => Ok(names.iter().map(|n| n.to_string()).collect()),
            Err(make) => Err(make()),
        }
    }

    async fn pull_model(&self, name: &str) -> Result<PullAck, EngineError> {
        self.called(name);
        match self.pull {
            Ok(status) => Ok(PullAck {
                model: name.to_string(),
                status: status.to_string(),
            }),
            Err(make) => Err(make()),
        }
    }
}

fn app_with(engine: Arc<StubEngine>, config: Config) -> Router {
    let state = AppState::new(engine, Arc::new(config)).unwrap();
    build_router(Arc::new(state))
}

fn app(engine: Arc<StubEngine>) -> Router {
    app_with(engine, Config::default())
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

async fn send_json(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

/// Decode `data: <json>\n\n` frames.
fn sse_fragments(body: &str) -> Vec<ChatFragment> {
    body.split("\n\n")
        .filter_map(|frame| frame.trim().strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

// ─── Root ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_root_lists_endpoints() {
    let (status, body) = send_json(app(Arc::new(StubEngine::default())), get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Ollama API Server is running");
    assert_eq!(body["endpoints"]["chat"], "POST /api/ai/chat");
    assert_eq!(body["endpoints"]["generate"], "POST /generate");
}

// ─── Generate ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generate_exact_body() {
    let engine = Arc::new(StubEngine::default());
    let (status, _, body) = send(
        app(engine.clone()),
        post_json("/generate", r#"{"prompt":"hello"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"response":"hi there","model":"gemma2:2b","success":true}"#);
    assert_eq!(engine.last_model.lock().unwrap().as_deref(), Some("gemma2:2b"));
}

#[tokio::test]
async fn test_generate_uses_requested_model() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = send_json(
        app(engine.clone()),
        post_json("/generate", r#"{"prompt":"hello","model":"llama3:8b"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "llama3:8b");
    assert_eq!(engine.last_model.lock().unwrap().as_deref(), Some("llama3:8b"));
}

#[tokio::test]
async fn test_generate_no_content_is_soft_failure() {
    let engine = Arc::new(StubEngine {
        completion: Ok(None),
        ..StubEngine::default()
    });
    let (status, body) = send_json(app(engine), post_json("/generate", r#"{"prompt":"hello"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "No content generated");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_generate_malformed_payload_is_soft_failure() {
    let engine = Arc::new(StubEngine {
        completion: Err(|| EngineError::Malformed {
            reason: "expected value at line 1".to_string(),
        }),
        ..StubEngine::default()
    });
    let (status, body) = send_json(app(engine), post_json("/generate", r#"{"prompt":"hello"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_generate_engine_down() {
    let engine = Arc::new(StubEngine {
        completion: Err(unreachable_engine),
        ..StubEngine::default()
    });
    let (status, body) = send_json(app(engine), post_json("/generate", r#"{"prompt":"hello"}"#)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Generation failed:"), "{detail}");
}

#[tokio::test]
async fn test_generate_missing_model_suggests_pull() {
    let engine = Arc::new(StubEngine {
        completion: Err(|| EngineError::ModelMissing {
            model: "gemma2:2b".to_string(),
            reason: "try pulling it first".to_string(),
        }),
        ..StubEngine::default()
    });
    let (status, body) = send_json(app(engine), post_json("/generate", r#"{"prompt":"hello"}"#)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("/pull-model"));
}

#[tokio::test]
async fn test_generate_validation_skips_engine() {
    let engine = Arc::new(StubEngine::default());

    let (status, body) = send_json(app(engine.clone()), post_json("/generate", r#"{}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "'prompt' is required");

    let (status, _) = send_json(app(engine.clone()), post_json("/generate", r#"{"prompt":""}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(app(engine.clone()), post_json("/generate", "not json")).await;
    assert!(status.is_client_error());

    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

// ─── Chat stream ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_stream_relays_fragments() {
    let engine = Arc::new(StubEngine::default());
    let (status, headers, body) = send(
        app(engine),
        post_json("/api/ai/chat", r#"{"message":"hi","userId":"u-1"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers[header::CONNECTION], "keep-alive");
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    assert!(body.contains(r#"data: {"content":"Hel","finish_reason":null}"#));

    let fragments = sse_fragments(&body);
    assert_eq!(fragments.last(), Some(&ChatFragment::stop()));
    assert_eq!(fragments.iter().filter(|f| f.is_terminal()).count(), 1);

    let text: String = fragments.iter().map(|f| f.content.as_str()).collect();
    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn test_chat_stream_empty_engine_stream() {
    let engine = Arc::new(StubEngine {
        stream: vec![],
        ..StubEngine::default()
    });
    let (status, _, body) = send(
        app(engine),
        post_json("/api/ai/chat", r#"{"message":"hi","userId":"u-1"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(sse_fragments(&body), vec![ChatFragment::stop()]);
}

#[tokio::test]
async fn test_chat_stream_mid_stream_failure_still_terminates() {
    let engine = Arc::new(StubEngine {
        stream: vec![Some("partial"), None, Some("lost")],
        ..StubEngine::default()
    });
    let (status, _, body) = send(
        app(engine),
        post_json("/api/ai/chat", r#"{"message":"hi","userId":"u-1"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        sse_fragments(&body),
        vec![ChatFragment::content("partial"), ChatFragment::stop()]
    );
}

#[tokio::test]
async fn test_chat_stream_setup_failure_is_error_status() {
    let engine = Arc::new(StubEngine {
        stream_setup: Some(unreachable_engine),
        ..StubEngine::default()
    });
    let (status, body) = send_json(
        app(engine),
        post_json("/api/ai/chat", r#"{"message":"hi","userId":"u-1"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().starts_with("Streaming failed:"));
}

#[tokio::test]
async fn test_chat_stream_requires_user_id() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = send_json(
        app(engine.clone()),
        post_json("/api/ai/chat", r#"{"message":"hi"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "'userId' is required");
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chat_stream_defaults_model() {
    let engine = Arc::new(StubEngine::default());
    send(
        app(engine.clone()),
        post_json("/api/ai/chat", r#"{"message":"hi","userId":"u-1","model":null}"#),
    )
    .await;
    assert_eq!(engine.last_model.lock().unwrap().as_deref(), Some("gemma2:2b"));
}

// ─── Health ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_inventory() {
    let (status, body) = send_json(app(Arc::new(StubEngine::default())), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({
            "status": "healthy",
            "ollama_running": true,
            "model_available": true,
            "available_models": ["gemma2:2b", "llama3:8b"]
        })
    );
}

#[tokio::test]
async fn test_health_engine_down_is_soft() {
    let engine = Arc::new(StubEngine {
        models: Err(unreachable_engine),
        ..StubEngine::default()
    });
    let (status, body) = send_json(app(engine), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["ollama_running"], false);
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_strict_mode_fails_hard() {
    let engine = Arc::new(StubEngine {
        models: Err(unreachable_engine),
        ..StubEngine::default()
    });
    let mut config = Config::default();
    config.health.strict = true;

    let (status, body) = send_json(app_with(engine, config), get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().starts_with("Ollama not available:"));
}

#[tokio::test]
async fn test_health_strict_mode_fails_on_engine_error() {
    let engine = Arc::new(StubEngine {
        models: Err(|| EngineError::Http {
            status: 500,
            body: "internal error".to_string(),
        }),
        ..StubEngine::default()
    });
    let mut config = Config::default();
    config.health.strict = true;

    let (status, body) = send_json(app_with(engine, config), get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Ollama not available:"));
    assert!(detail.contains("internal error"));
}

// ─── Pull model ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pull_model_defaults() {
    let engine = Arc::new(StubEngine::default());
    let request = Request::builder()
        .method("POST")
        .uri("/pull-model")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(app(engine.clone()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Model gemma2:2b pull started");
    assert_eq!(body["details"], "pulling manifest");
    assert_eq!(engine.last_model.lock().unwrap().as_deref(), Some("gemma2:2b"));
}

#[tokio::test]
async fn test_pull_model_from_query_and_body() {
    let engine = Arc::new(StubEngine::default());
    let request = Request::builder()
        .method("POST")
        .uri("/pull-model?model=llama3:8b")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_json(app(engine.clone()), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(engine.last_model.lock().unwrap().as_deref(), Some("llama3:8b"));

    let (status, body) = send_json(
        app(engine.clone()),
        post_json("/pull-model", r#"{"model":"phi3:mini"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Model phi3:mini pull started");
}

#[tokio::test]
async fn test_pull_model_bad_query_is_json_error() {
    let engine = Arc::new(StubEngine::default());
    let request = Request::builder()
        .method("POST")
        .uri("/pull-model?model=a&model=b")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(app(engine.clone()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(body["detail"].as_str().unwrap().starts_with("invalid query string:"));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pull_model_engine_error() {
    let engine = Arc::new(StubEngine {
        pull: Err(|| EngineError::Http {
            status: 500,
            body: "pull model manifest: file does not exist".to_string(),
        }),
        ..StubEngine::default()
    });
    let (status, body) = send_json(app(engine), post_json("/pull-model", r#"{"model":"nope"}"#)).await;

    assert!(status.is_server_error());
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Failed to pull model:"));
    assert!(detail.contains("file does not exist"));
}

// ─── Concurrency limit & metrics ───────────────────────────────────────────

#[tokio::test]
async fn test_concurrency_limit_rejects_excess() {
    let engine = Arc::new(StubEngine {
        hang_after_stream: true,
        ..StubEngine::default()
    });
    let mut config = Config::default();
    config.server.max_concurrent_requests = 1;
    let app = app_with(engine, config);

    // Holds the only slot while its body is alive.
    let open_stream = app
        .clone()
        .oneshot(post_json("/api/ai/chat", r#"{"message":"hi","userId":"u-1"}"#))
        .await
        .unwrap();
    assert_eq!(open_stream.status(), StatusCode::OK);

    let (status, body) = send_json(app.clone(), post_json("/generate", r#"{"prompt":"hello"}"#)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("too many concurrent requests"));

    drop(open_stream);
    let (status, _) = send_json(app, post_json("/generate", r#"{"prompt":"hello"}"#)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app(Arc::new(StubEngine::default()));
    send(app.clone(), post_json("/generate", r#"{"prompt":"hello"}"#)).await;

    let (status, _, body) = send(app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#"gateway_requests_total{endpoint="generate",outcome="ok"} 1"#));
}
