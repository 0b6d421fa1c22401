// Provider contract - the seam every AI backend implements

//! # Provider Trait
//!
//! Every AI backend - hosted APIs and local runtimes alike - implements
//! [`AIProvider`]. The router only ever talks to this trait, so adding a
//! provider means implementing four operations and shipping a model catalog;
//! routing, limits and failover come for free.

use async_trait::async_trait;

use super::{AIRequest, AIResponse, AIResult, HealthState, ModelDescriptor};

/// Result of a provider health probe
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub state: HealthState,
    pub latency_sample_ms: u64,

    /// Error fraction over the provider's own observation window, when the
    /// backend reports one; 0.0 otherwise
    pub error_rate_window: f64,
}

impl HealthReport {
    pub fn healthy(latency_sample_ms: u64) -> Self {
        Self {
            state: HealthState::Healthy,
            latency_sample_ms,
            error_rate_window: 0.0,
        }
    }
}

/// An external AI service exposing one or more models
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// Stable identifier, also used in insights and selection criteria
    fn id(&self) -> &str;

    /// The models this provider serves, with quality/cost metadata
    fn list_models(&self) -> Vec<ModelDescriptor>;

    /// Execute a request against a specific model
    async fn process(&self, request: &AIRequest, model_id: &str) -> AIResult<AIResponse>;

    /// Cheap liveness probe; implementations should avoid billable calls
    async fn health_check(&self) -> AIResult<HealthReport>;

    /// Estimated cost of `request` on `model_id` before execution
    fn estimate_cost(&self, request: &AIRequest, model_id: &str) -> AIResult<f64>;
}
