// OpenAI provider - chat completions client

//! # OpenAI Provider

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::ai::traits::{AIProvider, HealthReport};
use crate::ai::{
    estimate_tokens, AIError, AIRequest, AIResponse, AIResult, LatencyClass, ModelCapability,
    ModelDescriptor,
};

use super::classify_status;

pub const PROVIDER_ID: &str = "openai";

#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_seconds: 30,
        }
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: OpenAIUsage,
}

pub struct OpenAIProvider {
    client: reqwest::Client,
    config: OpenAIConfig,
    models: Vec<ModelDescriptor>,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Self {
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
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|e| AIError::Internal(format!("invalid API key format: {}", e)))?,
        );
        Ok(headers)
    }

    fn model(&self, model_id: &str) -> AIResult<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.model_id == model_id)
            .ok_or_else(|| AIError::ModelNotFound(format!("{}/{}", PROVIDER_ID, model_id)))
    }
}

#[async_trait]
impl AIProvider for OpenAIProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.models.clone()
    }

    async fn process(&self, request: &AIRequest, model_id: &str) -> AIResult<AIResponse> {
        let descriptor = self.model(model_id)?.clone();
        let body = OpenAIChatRequest {
            model: model_id.to_string(),
            messages: vec![
                OpenAIMessage {
                    role: "system",
                    content: request.effective_system_prompt(),
                },
                OpenAIMessage {
                    role: "user",
                    content: request.content.clone(),
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!(model = %model_id, task = %request.task_type, "openai request");

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

        let parsed: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| AIError::Internal(format!("openai response parse: {}", e)))?;

        let first = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AIError::Internal("openai returned no choices".to_string()))?;

        let cost_estimate = descriptor.estimate_cost(
            u64::from(parsed.usage.prompt_tokens),
            u64::from(parsed.usage.completion_tokens),
        );

        Ok(AIResponse {
            content: first.message.content.unwrap_or_default(),
            model_used: parsed.model,
            provider_used: PROVIDER_ID.to_string(),
            tokens_input: parsed.usage.prompt_tokens,
            tokens_output: parsed.usage.completion_tokens,
            cost_estimate,
            latency_ms: 0,
            finish_reason: first.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn health_check(&self) -> AIResult<HealthReport> {
        let url = format!("{}/models", self.config.base_url);
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
            model_id: "gpt-4o".to_string(),
            quality_rank: 2,
            cost_per_input_token: 0.000_002_5,
            cost_per_output_token: 0.000_01,
            max_context: 128_000,
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
            model_id: "gpt-4o-mini".to_string(),
            quality_rank: 4,
            cost_per_input_token: 0.000_000_15,
            cost_per_output_token: 0.000_000_6,
            max_context: 128_000,
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
    fn catalog_carries_both_tiers() {
        let provider = OpenAIProvider::new(OpenAIConfig::default());
        let models = provider.list_models();
        assert_eq!(models.len(), 2);
        assert!(models.iter().any(|m| m.model_id == "gpt-4o"));
        assert!(models
            .iter()
            .any(|m| m.has_capability(ModelCapability::Fast)));
    }

    #[test]
    fn mini_is_cheaper_than_the_flagship() {
        let provider = OpenAIProvider::new(OpenAIConfig::default());
        let request = AIRequest::new(TaskType::Summarize, "a".repeat(2000));
        let flagship = provider.estimate_cost(&request, "gpt-4o").unwrap();
        let mini = provider.estimate_cost(&request, "gpt-4o-mini").unwrap();
        assert!(mini < flagship);
    }
}
