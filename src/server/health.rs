//! Engine availability report.

use serde::Serialize;
use tracing::warn;

use crate::config::HealthConfig;
use crate::inference::InferenceClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub ollama_running: bool,
    pub model_available: bool,
    pub available_models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Builds [`HealthReport`]s from the engine's model inventory.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    target_model: String,
    strict: bool,
}

impl HealthReporter {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            target_model: config.target_model.clone(),
            strict: config.strict,
        }
    }

    /// Whether an unhealthy report should fail the request.
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Query the engine. Never fails: engine errors become an unhealthy report.
    pub async fn report(&self, client: &dyn InferenceClient) -> HealthReport {
        match client.list_models().await {
            Ok(models) => HealthReport {
                status: HealthStatus::Healthy,
                ollama_running: true,
                model_available: models.iter().any(|m| m.contains(&self.target_model)),
                available_models: models,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Health check could not list models");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    ollama_running: !e.is_unreachable(),
                    model_available: false,
                    available_models: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
