//! Fragment type relayed to clients and the Ollama wire shapes.

use serde::{Deserialize, Serialize};

/// Finish reason carried by the terminal fragment.
pub const STOP: &str = "stop";

/// One incremental piece of a streamed chat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFragment {
    pub content: String,
    pub finish_reason: Option<String>,
}

impl ChatFragment {
    /// A content fragment (no finish reason).
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            finish_reason: None,
        }
    }

    /// The terminal fragment that closes every stream.
    pub fn stop() -> Self {
        Self {
            content: String::new(),
            finish_reason: Some(STOP.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.as_deref() == Some(STOP)
    }
}

/// Acknowledgement that the engine accepted a model pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullAck {
    pub model: String,
    /// First status line reported by the engine (e.g. "pulling manifest").
    pub status: String,
}

// ─── Ollama wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct EngineChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<EngineMessageOut<'a>>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct EngineMessageOut<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> EngineChatRequest<'a> {
    /// A single-turn user chat.
    pub fn user(model: &'a str, content: &'a str, stream: bool) -> Self {
        Self {
            model,
            messages: vec![EngineMessageOut {
                role: "user",
                content,
            }],
            stream,
        }
    }
}

/// Response to `/api/chat`, and each NDJSON line of its streaming form.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct EngineChatChunk {
    #[serde(default)]
    pub message: Option<EngineMessage>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EngineMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// `/api/tags` response.
#[derive(Debug, Deserialize)]
pub(crate) struct EngineTags {
    #[serde(default)]
    pub models: Vec<EngineTagModel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EngineTagModel {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EnginePullRequest<'a> {
    pub model: &'a str,
    pub stream: bool,
}

/// One NDJSON progress line from `/api/pull`.
#[derive(Debug, Deserialize)]
pub(crate) struct EnginePullStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Error body Ollama sends with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct EngineErrorBody {
    pub error: String,
}
