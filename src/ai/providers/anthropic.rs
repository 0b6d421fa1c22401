// Anthropic provider - messages API client

//! # Anthropic Provider
//!
//! Client for the Anthropic messages API. The catalog leads the registry on
//! quality: Sonnet is the rank-1 model, Haiku the fast/cheap tier.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::ai::traits::{AIProvider, HealthReport};
use crate::ai::{
    estimate_tokens, AIError, AIRequest, AIResponse, AIResult, LatencyClass, ModelCapability,
    ModelDescriptor,
};

use super::classify_status;

pub const PROVIDER_ID: &str = "anthropic";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout_seconds: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            timeout_seconds: 30,
        }
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
    stop_reason: Option<String>,
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
    models: Vec<ModelDescriptor>,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Self {
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

    fn headers(&self) -> AIResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| AIError::Internal(format!("invalid API key format: {}", e)))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.config.api_version)
                .map_err(|e| AIError::Internal(format!("invalid API version: {}", e)))?,
        );
        Ok(headers)
    }

    fn convert_request(&self, request: &AIRequest, model_id: &str) -> AnthropicRequest {
        AnthropicRequest {
            model: model_id.to_string(),
            // Anthropic requires max_tokens
            max_tokens: request.max_tokens.unwrap_or(1024),
            messages: vec![AnthropicMessage {
                role: "user",
                content: request.content.clone(),
            }],
            system: Some(request.effective_system_prompt()),
            temperature: request.temperature,
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
impl AIProvider for AnthropicProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.models.clone()
    }

    async fn process(&self, request: &AIRequest, model_id: &str) -> AIResult<AIResponse> {
        let descriptor = self.model(model_id)?.clone();
        let body = self.convert_request(request, model_id);
        let url = format!("{}/v1/messages", self.config.base_url);

        debug!(model = %model_id, task = %request.task_type, "anthropic request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
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

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AIError::Internal(format!("anthropic response parse: {}", e)))?;

        let content = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        let cost_estimate = descriptor.estimate_cost(
            u64::from(parsed.usage.input_tokens),
            u64::from(parsed.usage.output_tokens),
        );

        Ok(AIResponse {
            content,
            model_used: parsed.model,
            provider_used: PROVIDER_ID.to_string(),
            tokens_input: parsed.usage.input_tokens,
            tokens_output: parsed.usage.output_tokens,
            cost_estimate,
            // Stamped by the router from its own clock
            latency_ms: 0,
            finish_reason: match parsed.stop_reason.as_deref() {
                Some("end_turn") | None => "stop".to_string(),
                Some(other) => other.to_string(),
            },
        })
    }

    async fn health_check(&self) -> AIResult<HealthReport> {
        let url = format!("{}/v1/models", self.config.base_url);
        let started = Instant::now();
        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
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

    fn estimate_cost(&self, request: &AIRequest, model_id: &str) -> AIResult<f64> {
        let descriptor = self.model(model_id)?;
        let input = estimate_tokens(&request.content)
            + estimate_tokens(&request.effective_system_prompt());
        let output = u64::from(request.max_tokens.unwrap_or(1024));
        Ok(descriptor.estimate_cost(input, output))
    }
}

fn catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            provider_id: PROVIDER_ID.to_string(),
            model_id: "claude-3-5-sonnet-20241022".to_string(),
            quality_rank: 1,
            cost_per_input_token: 0.000_003,
            cost_per_output_token: 0.000_015,
            max_context: 200_000,
            capabilities: vec![
                ModelCapability::Reasoning,
                ModelCapability::Analysis,
                ModelCapability::Coding,
                ModelCapability::Creative,
                ModelCapability::Summarization,
                ModelCapability::Translation,
                ModelCapability::Generation,
                ModelCapability::Classification,
                ModelCapability::Extraction,
                ModelCapability::Multimodal,
            ],
            latency_class: LatencyClass::Standard,
        },
        ModelDescriptor {
            provider_id: PROVIDER_ID.to_string(),
            model_id: "claude-3-5-haiku-20241022".to_string(),
            quality_rank: 3,
            cost_per_input_token: 0.000_000_8,
            cost_per_output_token: 0.000_004,
            max_context: 200_000,
            capabilities: vec![
                ModelCapability::Fast,
                ModelCapability::Analysis,
                ModelCapability::Summarization,
                ModelCapability::Translation,
                ModelCapability::Generation,
                ModelCapability::Classification,
                ModelCapability::Extraction,
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
    fn catalog_ranks_sonnet_first() {
        let provider = AnthropicProvider::new(AnthropicConfig::default());
        let models = provider.list_models();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].quality_rank, 1);
        assert!(models.iter().all(|m| m.provider_id == PROVIDER_ID));
    }

    #[test]
    fn cost_estimate_uses_catalog_prices() {
        let provider = AnthropicProvider::new(AnthropicConfig::default());
        let request = AIRequest::new(TaskType::Summarize, "a".repeat(4000));
        let cost = provider
            .estimate_cost(&request, "claude-3-5-sonnet-20241022")
            .unwrap();
        assert!(cost > 0.0);

        assert!(matches!(
            provider.estimate_cost(&request, "claude-nonexistent"),
            Err(AIError::ModelNotFound(_))
        ));
    }

    #[test]
    fn request_conversion_carries_the_system_preamble() {
        let provider = AnthropicProvider::new(AnthropicConfig::default());
        let request = AIRequest::new(TaskType::Analyze, "quarterly figures");
        let wire = provider.convert_request(&request, "claude-3-5-sonnet-20241022");
        assert_eq!(wire.max_tokens, 1024);
        assert!(wire.system.as_deref().unwrap().contains("Analyze"));
        assert_eq!(wire.messages.len(), 1);
    }
}
