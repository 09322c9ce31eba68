//! Inference engine client.
//!
//! [`InferenceClient`] is the seam between the gateway and the engine;
//! [`OllamaClient`] implements it against the Ollama HTTP API.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use futures::stream::{Stream, StreamExt};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};

use super::errors::EngineError;
use super::streaming::{decode_chat_line, ndjson_lines, terminated};
use super::types::{
    ChatFragment, EngineChatChunk, EngineChatRequest, EngineErrorBody, EnginePullRequest,
    EnginePullStatus, EngineTags, PullAck,
};
use crate::config::EngineConfig;

/// Raw content fragments from the engine; may fail mid-way.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<ChatFragment, EngineError>> + Send>>;

/// Fragments ending with exactly one terminal fragment.
pub type TerminatedStream = Pin<Box<dyn Stream<Item = ChatFragment> + Send>>;

/// Operations the gateway needs from an inference engine.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run one blocking chat completion.
    ///
    /// `Ok(None)` means the engine answered without usable content.
    async fn complete(&self, prompt: &str, model: &str) -> Result<Option<String>, EngineError>;

    /// Open a streaming chat and yield its content fragments as they arrive.
    async fn open_stream(&self, message: &str, model: &str) -> Result<FragmentStream, EngineError>;

    /// Names of the installed models, in engine order.
    async fn list_models(&self) -> Result<Vec<String>, EngineError>;

    /// Ask the engine to start downloading a model.
    async fn pull_model(&self, name: &str) -> Result<PullAck, EngineError>;

    /// Open a streaming chat whose sequence always ends with the terminal fragment.
    async fn stream_complete(
        &self,
        message: &str,
        model: &str,
        idle_timeout: Option<Duration>,
    ) -> Result<TerminatedStream, EngineError> {
        let fragments = self.open_stream(message, model).await?;
        Ok(Box::pin(terminated(fragments, idle_timeout)))
    }
}

/// Client for a local Ollama instance.
pub struct OllamaClient {
    /// HTTP client for blocking calls (bounded by `request_timeout_secs`).
    http: HttpClient,
    /// HTTP client for streaming calls (no total timeout; only the header wait is bounded).
    http_stream: HttpClient,
    base_url: String,
    request_timeout_secs: u64,
}

impl OllamaClient {
    /// Build a client. Does not check connectivity.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

        let build_error = |e: reqwest::Error| EngineError::Unavailable {
            endpoint: base_url.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        };

        let http = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(build_error)?;

        let http_stream = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(build_error)?;

        Ok(Self {
            http,
            http_stream,
            base_url,
            request_timeout_secs: config.request_timeout_secs,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn transport_error(&self, timeout_secs: u64, err: reqwest::Error) -> EngineError {
        EngineError::from_transport(&self.base_url, timeout_secs, err)
    }

    /// Send a streaming request, giving up if no response head arrives in time.
    async fn send_streaming(&self, request: RequestBuilder) -> Result<Response, EngineError> {
        let secs = self.request_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), request.send()).await {
            Ok(sent) => sent.map_err(|e| self.transport_error(secs, e)),
            Err(_) => Err(EngineError::Timeout { secs }),
        }
    }

    /// Pass 2xx responses through; turn anything else into an `EngineError`.
    async fn check_status(response: Response, model: Option<&str>) -> Result<Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<EngineErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);

        match (status, model) {
            (StatusCode::NOT_FOUND, Some(model)) => Err(EngineError::ModelMissing {
                model: model.to_string(),
                reason: message,
            }),
            _ => Err(EngineError::Http {
                status: status.as_u16(),
                body: message,
            }),
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn complete(&self, prompt: &str, model: &str) -> Result<Option<String>, EngineError> {
        let response = self
            .http
            .post(self.url("/api/chat"))
            .json(&EngineChatRequest::user(model, prompt, false))
            .send()
            .await
            .map_err(|e| self.transport_error(self.request_timeout_secs, e))?;
        let response = Self::check_status(response, Some(model)).await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(self.request_timeout_secs, e))?;
        let chunk: EngineChatChunk =
            serde_json::from_slice(&body).map_err(|e| EngineError::Malformed {
                reason: format!("failed to parse chat response: {e}"),
            })?;

        if let Some(message) = chunk.error {
            return Err(EngineError::Reported { message });
        }
        Ok(chunk.message.and_then(|m| m.content))
    }

    async fn open_stream(&self, message: &str, model: &str) -> Result<FragmentStream, EngineError> {
        let request = self
            .http_stream
            .post(self.url("/api/chat"))
            .json(&EngineChatRequest::user(model, message, true));
        let response = self.send_streaming(request).await?;
        let response = Self::check_status(response, Some(model)).await?;

        let fragments = ndjson_lines(response.bytes_stream()).filter_map(|line| {
            future::ready(match line {
                Ok(line) => decode_chat_line(&line),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(Box::pin(fragments))
    }

    async fn list_models(&self) -> Result<Vec<String>, EngineError> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| self.transport_error(self.request_timeout_secs, e))?;
        let response = Self::check_status(response, None).await?;

        let tags: EngineTags = response.json().await.map_err(|e| EngineError::Malformed {
            reason: format!("failed to parse model list: {e}"),
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn pull_model(&self, name: &str) -> Result<PullAck, EngineError> {
        let request = self.http_stream.post(self.url("/api/pull")).json(&EnginePullRequest {
            model: name,
            stream: true,
        });
        let response = self.send_streaming(request).await?;
        let response = Self::check_status(response, Some(name)).await?;

        let mut progress = Box::pin(ndjson_lines(response.bytes_stream()).map(|line| {
            line.and_then(|line| {
                serde_json::from_slice::<EnginePullStatus>(&line).map_err(|e| {
                    EngineError::Malformed {
                        reason: format!("failed to parse pull status: {e}"),
                    }
                })
            })
        }));

        let first = match progress.next().await {
            Some(status) => status?,
            None => {
                return Err(EngineError::Malformed {
                    reason: "engine closed the pull stream without a status".to_string(),
                })
            }
        };
        if let Some(message) = first.error {
            return Err(EngineError::Reported { message });
        }

        let status = first.status.unwrap_or_default();
        info!(model = name, status, "Model pull accepted");

        // Keep reading so the engine sees a live client until the download ends.
        let model = name.to_string();
        tokio::spawn(async move {
            while let Some(update) = progress.next().await {
                match update {
                    Ok(EnginePullStatus {
                        error: Some(error), ..
                    }) => {
                        warn!(model, error, "Model pull failed");
                        return;
                    }
                    Ok(update) => debug!(
                        model,
                        status = update.status.as_deref().unwrap_or(""),
                        completed = update.completed,
                        total = update.total,
                        "Model pull progress"
                    ),
                    Err(e) => {
                        warn!(model, error = %e, "Model pull stream ended abnormally");
                        return;
                    }
                }
            }
            info!(model, "Model pull finished");
        });

        Ok(PullAck {
            model: name.to_string(),
            status,
        })
    }
}
