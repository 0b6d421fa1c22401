// Ollama provider - local runtime, keyless and zero-cost

//! # Ollama Provider
//!
//! Talks to a local Ollama runtime over its chat API. Models cost nothing,
//! so the cost strategy naturally gravitates here when quality allows; the
//! catalog ranks local models below the hosted flagships.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::ai::traits::{AIProvider, HealthReport};
use crate::ai::{
    AIError, AIRequest, AIResponse, AIResult, LatencyClass, ModelCapability, ModelDescriptor,
};

use super::classify_status;

pub const PROVIDER_ID: &str = "ollama";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout_seconds: 60,
        }
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct OllamaChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    done_reason: Option<String>,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    config: OllamaConfig,
    models: Vec<ModelDescriptor>,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config,
            models: catalog(),
        }
    }

    /// Quick reachability probe used at startup before registering
    pub async fn check_availability(base_url: &str) -> bool {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build();
        match client {
            Ok(client) => client
                .get(format!("{}/api/tags", base_url))
                .send()
                .await
                .map(|r| r.status().is_success())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn model(&self, model_id: &str) -> AIResult<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.model_id == model_id)
            .ok_or_else(|| AIError::ModelNotFound(format!("{}/{}", PROVIDER_ID, model_id)))
    }
}

#[async_trait]
impl AIProvider for OllamaProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.models.clone()
    }

    async fn process(&self, request: &AIRequest, model_id: &str) -> AIResult<AIResponse> {
        self.model(model_id)?;
        let body = OllamaChatRequest {
            model: model_id.to_string(),
            messages: vec![
                OllamaChatMessage {
                    role: "system",
                    content: request.effective_system_prompt(),
                },
                OllamaChatMessage {
                    role: "user",
                    content: request.content.clone(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let url = format!("{}/api/chat", self.config.base_url);

        debug!(model = %model_id, task = %request.task_type, "ollama request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AIError::Timeout(format!("{}: {}", PROVIDER_ID, e))
                } else {
                    AIError::Unavailable(format!("{}: {}", PROVIDER_ID, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER_ID, status.as_u16(), &text));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AIError::Internal(format!("ollama response parse: {}", e)))?;

        Ok(AIResponse {
            content: parsed.message.content,
            model_used: parsed.model,
            provider_used: PROVIDER_ID.to_string(),
            tokens_input: parsed.prompt_eval_count,
            tokens_output: parsed.eval_count,
            // Local inference is free
            cost_estimate: 0.0,
            latency_ms: 0,
            finish_reason: parsed.done_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn health_check(&self) -> AIResult<HealthReport> {
        let url = format!("{}/api/tags", self.config.base_url);
        let started = Instant::now();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AIError::Unavailable(format!("{}: {}", PROVIDER_ID, e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER_ID, status, &text));
        }
        Ok(HealthReport::healthy(started.elapsed().as_millis() as u64))
    }

    fn estimate_cost(&self, _request: &AIRequest, model_id: &str) -> AIResult<f64> {
        self.model(model_id)?;
        Ok(0.0)
    }
}

fn catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            provider_id: PROVIDER_ID.to_string(),
            model_id: "llama3.1:8b".to_string(),
            quality_rank: 5,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            max_context: 128_000,
            capabilities: vec![
                ModelCapability::Analysis,
                ModelCapability::Summarization,
                ModelCapability::Generation,
                ModelCapability::Classification,
                ModelCapability::Extraction,
            ],
            latency_class: LatencyClass::Standard,
        },
        ModelDescriptor {
            provider_id: PROVIDER_ID.to_string(),
            model_id: "mistral:7b".to_string(),
            quality_rank: 6,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            max_context: 32_000,
            capabilities: vec![
                ModelCapability::Fast,
                ModelCapability::Summarization,
                ModelCapability::Generation,
                ModelCapability::Classification,
            ],
            latency_class: LatencyClass::Fast,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::TaskType;

    #[test]
    fn local_models_are_free() {
        let provider = OllamaProvider::new(OllamaConfig::default());
        let request = AIRequest::new(TaskType::Summarize, "notes");
        assert_eq!(provider.estimate_cost(&request, "llama3.1:8b").unwrap(), 0.0);
        assert!(matches!(
            provider.estimate_cost(&request, "gpt-4o"),
            Err(AIError::ModelNotFound(_))
        ));
    }

    #[test]
    fn catalog_ranks_below_hosted_flagships() {
        let provider = OllamaProvider::new(OllamaConfig::default());
        assert!(provider.list_models().iter().all(|m| m.quality_rank >= 5));
    }
}
