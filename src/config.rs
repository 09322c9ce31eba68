//! Runtime configuration for ollama-gateway.
//!
//! Configuration is layered: built-in defaults, then an optional JSON file,
//! then command-line flags and their environment variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Model used whenever a request does not name one.
pub const DEFAULT_MODEL: &str = "gemma2:2b";

/// Command-line arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ollama-gateway", about = "HTTP gateway for a local Ollama engine")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen port.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the Ollama engine.
    #[arg(long, env = "OLLAMA_HOST")]
    pub ollama_url: Option<String>,

    /// Model used when a request omits one.
    #[arg(long, env = "DEFAULT_MODEL")]
    pub default_model: Option<String>,

    /// Fail /health with 503 when the engine is unreachable.
    #[arg(long)]
    pub strict_health: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Inference engine connection.
    pub engine: EngineConfig,

    /// Health reporting.
    pub health: HealthConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host (e.g. "0.0.0.0").
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Maximum concurrent engine-bound requests (0 = unlimited).
    pub max_concurrent_requests: usize,

    /// Close a chat stream after this many seconds without a fragment (0 = never).
    pub stream_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_concurrent_requests: 0,
            stream_idle_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    /// Socket address string to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        match self.stream_idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Inference engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the Ollama HTTP API.
    pub base_url: String,

    /// Model used when a request omits one.
    pub default_model: String,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Total timeout for blocking (non-streaming) calls in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 300,
        }
    }
}

/// Health check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Model whose presence (substring match) marks the engine as ready.
    pub target_model: String,

    /// Report an unreachable engine as 503 instead of an unhealthy 200.
    pub strict: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            target_model: DEFAULT_MODEL.to_string(),
            strict: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line and environment overrides on top of file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(url) = &cli.ollama_url {
            self.engine.base_url = normalize_base_url(url);
        }
        if let Some(model) = &cli.default_model {
            self.engine.default_model = model.clone();
        }
        if cli.strict_health {
            self.health.strict = true;
        }
    }

    /// Resolve a request's model, falling back to the configured default.
    pub fn resolve_model(&self, requested: Option<String>) -> String {
        requested
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.engine.default_model.clone())
    }
}

/// Ollama accepts `OLLAMA_HOST=127.0.0.1:11434`; give such values a scheme.
fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}
