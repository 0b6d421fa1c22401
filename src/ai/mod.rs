// AI routing layer - provider abstraction, model registry and selection types

//! # AI Layer
//!
//! Conductor's AI operations (summarize, analyze, suggest, ...) are served
//! by external providers behind a common trait. The router owns the
//! registered providers, scores candidate models against a selection
//! strategy, enforces per-provider rate limits and budgets, and fails over
//! automatically when a provider misbehaves.
//!
//! Requests and responses here are transient - nothing is persisted unless
//! an operation promotes its result to an [`crate::models::AIInsight`].

pub mod limits;
pub mod providers;
pub mod router;
pub mod traits;

pub use limits::{ProviderLimits, UsageMeter, UsageSnapshot};
pub use router::{
    AIProviderManager, ProviderSettings, ProviderStatusReport, RouterConfig, StrategyWeights,
};
pub use traits::{AIProvider, HealthReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::InsightKind;

/// Kind of AI operation being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Summarize,
    Analyze,
    Suggest,
    Classify,
    Extract,
    Translate,
    Generate,
}

impl TaskType {
    /// The capability a model must advertise to serve this task
    pub fn required_capability(&self) -> ModelCapability {
        match self {
            TaskType::Summarize => ModelCapability::Summarization,
            TaskType::Analyze => ModelCapability::Analysis,
            TaskType::Suggest => ModelCapability::Reasoning,
            TaskType::Classify => ModelCapability::Classification,
            TaskType::Extract => ModelCapability::Extraction,
            TaskType::Translate => ModelCapability::Translation,
            TaskType::Generate => ModelCapability::Generation,
        }
    }

    /// Capabilities that improve results for this task beyond the required
    /// one; used for capability-match scoring, not filtering
    pub fn preferred_capabilities(&self) -> &'static [ModelCapability] {
        match self {
            TaskType::Summarize => &[ModelCapability::Fast],
            TaskType::Analyze => &[ModelCapability::Reasoning],
            TaskType::Suggest => &[ModelCapability::Analysis, ModelCapability::Creative],
            TaskType::Classify => &[ModelCapability::Fast],
            TaskType::Extract => &[ModelCapability::Analysis],
            TaskType::Translate => &[],
            TaskType::Generate => &[ModelCapability::Creative],
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Summarize => "summarize",
            TaskType::Analyze => "analyze",
            TaskType::Suggest => "suggest",
            TaskType::Classify => "classify",
            TaskType::Extract => "extract",
            TaskType::Translate => "translate",
            TaskType::Generate => "generate",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summarize" => Ok(TaskType::Summarize),
            "analyze" => Ok(TaskType::Analyze),
            "suggest" => Ok(TaskType::Suggest),
            "classify" => Ok(TaskType::Classify),
            "extract" => Ok(TaskType::Extract),
            "translate" => Ok(TaskType::Translate),
            "generate" => Ok(TaskType::Generate),
            other => Err(format!("unknown task type '{}'", other)),
        }
    }
}

impl From<TaskType> for InsightKind {
    fn from(task: TaskType) -> Self {
        match task {
            TaskType::Summarize => InsightKind::Summarize,
            TaskType::Analyze => InsightKind::Analyze,
            TaskType::Suggest => InsightKind::Suggest,
            TaskType::Classify => InsightKind::Classify,
            TaskType::Extract => InsightKind::Extract,
            TaskType::Translate => InsightKind::Translate,
            TaskType::Generate => InsightKind::Generate,
        }
    }
}

/// Transient AI request; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIRequest {
    pub id: Uuid,
    pub task_type: TaskType,
    pub content: String,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl AIRequest {
    pub fn new<S: Into<String>>(task_type: TaskType, content: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            content: content.into(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            context: HashMap::new(),
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// System preamble used when the caller supplies none
    pub fn effective_system_prompt(&self) -> String {
        match &self.system_prompt {
            Some(prompt) => prompt.clone(),
            None => match self.task_type {
                TaskType::Summarize => {
                    "Summarize the following content concisely, keeping the key facts.".to_string()
                }
                TaskType::Analyze => {
                    "Analyze the following content and describe notable patterns, risks and open questions.".to_string()
                }
                TaskType::Suggest => {
                    "Given the following context, suggest concrete next actions with a short rationale for each.".to_string()
                }
                TaskType::Classify => {
                    "Classify the following content and name the category you chose.".to_string()
                }
                TaskType::Extract => {
                    "Extract the structured facts from the following content.".to_string()
                }
                TaskType::Translate => "Translate the following content.".to_string(),
                TaskType::Generate => "Generate content for the following request.".to_string(),
            },
        }
    }
}

/// Transient AI response returned by a provider through the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResponse {
    pub content: String,
    pub model_used: String,
    pub provider_used: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub cost_estimate: f64,
    pub latency_ms: u64,
    pub finish_reason: String,
}

/// Capability tags advertised by models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    Reasoning,
    Analysis,
    Coding,
    Creative,
    Fast,
    Multimodal,
    Summarization,
    Translation,
    Generation,
    Classification,
    Extraction,
}

/// Expected latency class of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    Fast,
    Standard,
    Slow,
}

/// Registry entry describing one model on one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub provider_id: String,
    pub model_id: String,

    /// 1 is the best quality in the registry
    pub quality_rank: u8,

    pub cost_per_input_token: f64,
    pub cost_per_output_token: f64,
    pub max_context: u32,
    pub capabilities: Vec<ModelCapability>,
    pub latency_class: LatencyClass,
}

impl ModelDescriptor {
    /// Quality on a 0..1 scale derived from the inverse rank
    pub fn quality_score(&self) -> f64 {
        1.0 / f64::from(self.quality_rank.max(1))
    }

    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.cost_per_input_token
            + output_tokens as f64 * self.cost_per_output_token
    }

    pub fn has_capability(&self, capability: ModelCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Policy governing how the router scores candidate models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    Performance,
    Cost,
    Speed,
    Balanced,
    Fallback,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        RoutingStrategy::Balanced
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoutingStrategy::Performance => "performance",
            RoutingStrategy::Cost => "cost",
            RoutingStrategy::Speed => "speed",
            RoutingStrategy::Balanced => "balanced",
            RoutingStrategy::Fallback => "fallback",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "performance" => Ok(RoutingStrategy::Performance),
            "cost" => Ok(RoutingStrategy::Cost),
            "speed" => Ok(RoutingStrategy::Speed),
            "balanced" => Ok(RoutingStrategy::Balanced),
            "fallback" => Ok(RoutingStrategy::Fallback),
            other => Err(format!("unknown routing strategy '{}'", other)),
        }
    }
}

/// Inputs steering one selection
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub task_type: TaskType,
    pub strategy: RoutingStrategy,
    pub max_cost: Option<f64>,

    /// Worst acceptable `quality_rank` (1 = best); models ranked below are
    /// filtered out
    pub min_quality: Option<u8>,

    pub prefer_provider: Option<String>,
}

impl SelectionCriteria {
    pub fn new(task_type: TaskType, strategy: RoutingStrategy) -> Self {
        Self {
            task_type,
            strategy,
            max_cost: None,
            min_quality: None,
            prefer_provider: None,
        }
    }
}

/// Health classification of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Down,
}

/// Point-in-time health snapshot the router keeps per provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub state: HealthState,
    pub latency_ms: Option<u64>,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            latency_ms: None,
            error_rate: 0.0,
            consecutive_failures: 0,
            last_check: Utc::now(),
            last_error: None,
        }
    }
}

/// Error taxonomy of the AI layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum AIError {
    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    #[error("Provider budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Provider timed out: {0}")]
    Timeout(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("All providers failed after {attempts} attempts: {last}")]
    AllProvidersFailed { attempts: usize, last: Box<AIError> },

    /// Caller's cancellation token fired; retries and failover stop
    #[error("Cancelled")]
    Cancelled,

    #[error("Internal AI error: {0}")]
    Internal(String),
}

impl AIError {
    /// Stable machine-readable kind for the API error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            AIError::RateLimited(_) => "ai_rate_limited",
            AIError::BudgetExceeded(_) => "ai_budget_exceeded",
            AIError::Timeout(_) => "ai_timeout",
            AIError::Upstream { .. } => "ai_upstream",
            AIError::InvalidRequest(_) => "ai_invalid_request",
            AIError::Unavailable(_) => "ai_unavailable",
            AIError::ModelNotFound(_) => "ai_model_not_found",
            AIError::AllProvidersFailed { .. } => "ai_all_providers_failed",
            AIError::Cancelled => "cancelled",
            AIError::Internal(_) => "ai_internal",
        }
    }

    /// Whether the router may retry this failure on another provider
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AIError::InvalidRequest(_) | AIError::ModelNotFound(_) | AIError::Cancelled
        )
    }
}

/// Result alias for the AI layer
pub type AIResult<T> = std::result::Result<T, AIError>;

/// Rough token estimate for budgeting before a provider reports real usage
pub(crate) fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_types_parse_their_display_names() {
        for task in [
            TaskType::Summarize,
            TaskType::Analyze,
            TaskType::Suggest,
            TaskType::Classify,
            TaskType::Extract,
            TaskType::Translate,
            TaskType::Generate,
        ] {
            let parsed: TaskType = task.to_string().parse().unwrap();
            assert_eq!(parsed, task);
        }
        assert!("divinate".parse::<TaskType>().is_err());
    }

    #[test]
    fn quality_score_is_inverse_rank() {
        let mut descriptor = ModelDescriptor {
            provider_id: "p".to_string(),
            model_id: "m".to_string(),
            quality_rank: 1,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            max_context: 8192,
            capabilities: vec![],
            latency_class: LatencyClass::Standard,
        };
        assert_eq!(descriptor.quality_score(), 1.0);
        descriptor.quality_rank = 4;
        assert_eq!(descriptor.quality_score(), 0.25);
    }

    #[test]
    fn cost_estimate_combines_both_directions() {
        let descriptor = ModelDescriptor {
            provider_id: "p".to_string(),
            model_id: "m".to_string(),
            quality_rank: 1,
            cost_per_input_token: 0.001,
            cost_per_output_token: 0.002,
            max_context: 8192,
            capabilities: vec![],
            latency_class: LatencyClass::Standard,
        };
        let cost = descriptor.estimate_cost(100, 50);
        assert!((cost - 0.2).abs() < 1e-9);
    }

    #[test]
    fn non_retryable_errors_stop_failover() {
        assert!(!AIError::InvalidRequest("bad".to_string()).is_retryable());
        assert!(AIError::Timeout("slow".to_string()).is_retryable());
        assert!(AIError::Upstream {
            status: 502,
            message: "bad gateway".to_string()
        }
        .is_retryable());
    }
}
