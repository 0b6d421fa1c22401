// AI provider manager - selection, limits, failover and health tracking

//! # Router
//!
//! The provider manager owns every registered provider: its enabled flag and
//! priority, its usage meter, a concurrency semaphore sized to its
//! configured parallelism, a health snapshot refreshed by the background
//! probe, and the model catalog it advertises.
//!
//! A request flows through four stages:
//!
//! 1. **Filter** - enabled providers that are not throttled or down, whose
//!    models cover the task's capability and pass `max_cost`/`min_quality`.
//!    Degraded providers are admitted only when nothing healthy matches.
//! 2. **Score** - the strategy weights quality, cost efficiency, capability
//!    match and latency class; ties break on provider priority, quality
//!    rank, then model id, with `prefer_provider` promoted ahead of ties.
//! 3. **Limit check** - the provider's per-minute counters and daily budget
//!    must admit the estimated usage, otherwise the provider is throttled
//!    for a cooldown window and selection repeats without it.
//! 4. **Execute** - the call runs under the provider's semaphore with a
//!    per-strategy timeout. Retryable failures degrade the health snapshot
//!    and fail over to the next provider; `InvalidRequest` propagates
//!    immediately. At most one attempt per distinct provider, after which
//!    `AllProvidersFailed` carries the last error.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::limits::{LimitExceeded, ProviderLimits, UsageMeter, UsageSnapshot};
use super::traits::AIProvider;
use super::{
    estimate_tokens, AIError, AIRequest, AIResponse, AIResult, HealthState, LatencyClass,
    ModelDescriptor, ProviderHealth, RoutingStrategy, SelectionCriteria, TaskType,
};

/// Per-provider registration settings
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub enabled: bool,
    /// Lower value = tried earlier in fallback chains and tie-breaks
    pub priority: u8,
    /// Model used by the `fallback` strategy when this provider leads
    pub default_model: Option<String>,
    pub limits: ProviderLimits,
    /// Concurrent in-flight calls admitted to this provider
    pub max_concurrency: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 10,
            default_model: None,
            limits: ProviderLimits::default(),
            max_concurrency: 8,
        }
    }
}

/// Strategy scoring weights, overridable per deployment
#[derive(Debug, Clone)]
pub struct StrategyWeights {
    pub performance_quality: f64,
    pub performance_capability: f64,
    pub cost_efficiency: f64,
    pub cost_quality: f64,
    pub speed_quality: f64,
    pub speed_cost: f64,
    pub balanced_quality: f64,
    pub balanced_cost: f64,
    pub balanced_capability: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            performance_quality: 0.7,
            performance_capability: 0.3,
            cost_efficiency: 0.8,
            cost_quality: 0.2,
            speed_quality: 0.3,
            speed_cost: 0.2,
            balanced_quality: 0.4,
            balanced_cost: 0.4,
            balanced_capability: 0.2,
        }
    }
}

/// Router-wide configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_strategy: RoutingStrategy,
    /// Background probe cadence; clamped to at most 5 minutes
    pub health_check_interval: Duration,
    pub speed_timeout: Duration,
    pub standard_timeout: Duration,
    /// How long a rate-limited/over-budget provider sits out
    pub throttle_cooldown: Duration,
    pub weights: StrategyWeights,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::Balanced,
            health_check_interval: Duration::from_secs(300),
            speed_timeout: Duration::from_secs(5),
            standard_timeout: Duration::from_secs(30),
            throttle_cooldown: Duration::from_secs(60),
            weights: StrategyWeights::default(),
        }
    }
}

struct RegisteredProvider {
    client: Arc<dyn AIProvider>,
    priority: u8,
    default_model: Option<String>,
    limits: ProviderLimits,
    enabled: AtomicBool,
    meter: UsageMeter,
    semaphore: Arc<Semaphore>,
    health: RwLock<ProviderHealth>,
    cooldown_until: RwLock<Option<chrono::DateTime<Utc>>>,
    models: Vec<ModelDescriptor>,
}

/// Per-provider status row returned by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatusReport {
    pub enabled: bool,
    pub priority: u8,
    pub health: ProviderHealth,
    pub usage: UsageSnapshot,
}

struct Candidate {
    provider_id: String,
    provider: Arc<RegisteredProvider>,
    model: ModelDescriptor,
    estimated_cost: f64,
}

/// Long-lived, constructor-injected provider manager
pub struct AIProviderManager {
    providers: RwLock<HashMap<String, Arc<RegisteredProvider>>>,
    config: RouterConfig,
}

impl AIProviderManager {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn default_strategy(&self) -> RoutingStrategy {
        self.config.default_strategy
    }

    /// Register a provider at startup (or through an admin operation)
    pub async fn register_provider(
        &self,
        client: Arc<dyn AIProvider>,
        settings: ProviderSettings,
    ) {
        let id = client.id().to_string();
        let models = client.list_models();
        let registered = Arc::new(RegisteredProvider {
            client,
            priority: settings.priority,
            default_model: settings.default_model,
            limits: settings.limits,
            enabled: AtomicBool::new(settings.enabled),
            meter: UsageMeter::new(),
            semaphore: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            health: RwLock::new(ProviderHealth::default()),
            cooldown_until: RwLock::new(None),
            models,
        });

        info!(
            provider = %id,
            priority = registered.priority,
            models = registered.models.len(),
            enabled = registered.enabled.load(Ordering::Relaxed),
            "✅ AI provider registered"
        );

        self.providers.write().await.insert(id, registered);
    }

    /// Flip a provider's enabled flag
    pub async fn set_enabled(&self, provider_id: &str, enabled: bool) -> AIResult<()> {
        let providers = self.providers.read().await;
        let provider = providers
            .get(provider_id)
            .ok_or_else(|| AIError::InvalidRequest(format!("unknown provider '{}'", provider_id)))?;
        provider.enabled.store(enabled, Ordering::Relaxed);
        info!(provider = %provider_id, enabled, "provider enabled flag changed");
        Ok(())
    }

    /// Aggregated model registry across enabled providers
    pub async fn models(&self) -> Vec<ModelDescriptor> {
        let providers = self.providers.read().await;
        let mut models: Vec<ModelDescriptor> = providers
            .values()
            .filter(|p| p.enabled.load(Ordering::Relaxed))
            .flat_map(|p| p.models.iter().cloned())
            .collect();
        models.sort_by(|a, b| {
            a.provider_id
                .cmp(&b.provider_id)
                .then(a.quality_rank.cmp(&b.quality_rank))
                .then(a.model_id.cmp(&b.model_id))
        });
        models
    }

    /// Current health and usage per registered provider
    pub async fn health_snapshot(&self) -> HashMap<String, ProviderStatusReport> {
        let providers = self.providers.read().await;
        let now = Utc::now();
        let mut snapshot = HashMap::with_capacity(providers.len());
        for (id, provider) in providers.iter() {
            snapshot.insert(
                id.clone(),
                ProviderStatusReport {
                    enabled: provider.enabled.load(Ordering::Relaxed),
                    priority: provider.priority,
                    health: provider.health.read().await.clone(),
                    usage: provider.meter.snapshot(now),
                },
            );
        }
        snapshot
    }

    /// Route a request to the best eligible `(provider, model)` pair
    ///
    /// A fired cancellation token aborts the request, including any retries
    /// and failover still ahead of it, and interrupts the in-flight provider
    /// call.
    pub async fn route(
        &self,
        request: &AIRequest,
        criteria: &SelectionCriteria,
        cancel: Option<CancellationToken>,
    ) -> AIResult<AIResponse> {
        let est_in = estimate_tokens(&request.content)
            + estimate_tokens(&request.effective_system_prompt());
        let est_out = u64::from(request.max_tokens.unwrap_or(1000));

        // A max_cost no candidate can meet is a caller mistake, rejected
        // before any provider call
        if let Some(max_cost) = criteria.max_cost {
            match self.cheapest_eligible_cost(criteria.task_type, est_in, est_out).await {
                Some(cheapest) if cheapest > max_cost => {
                    return Err(AIError::InvalidRequest(format!(
                        "max_cost {:.6} is below the cheapest eligible model ({:.6})",
                        max_cost, cheapest
                    )));
                }
                None => {
                    return Err(AIError::Unavailable(format!(
                        "no registered model serves task '{}'",
                        criteria.task_type
                    )));
                }
                _ => {}
            }
        }

        let max_attempts = self.enabled_provider_count().await;
        let mut excluded: HashSet<String> = HashSet::new();
        let mut last_error: Option<AIError> = None;
        let mut attempts = 0usize;

        loop {
            // Cancellation stops the failover chain before the next attempt
            if let Some(token) = &cancel {
                if token.is_cancelled() {
                    return Err(AIError::Cancelled);
                }
            }

            let candidate = match self.select(criteria, &excluded, est_in, est_out).await {
                Some(candidate) => candidate,
                None => {
                    return Err(match last_error {
                        Some(last) => AIError::AllProvidersFailed {
                            attempts,
                            last: Box::new(last),
                        },
                        None => AIError::Unavailable(
                            "no eligible provider for this request".to_string(),
                        ),
                    });
                }
            };

            // Pre-call limit check; a tripped ceiling throttles the provider
            // and re-selects without it
            let now = Utc::now();
            if let Err(exceeded) = candidate.provider.meter.check(
                &candidate.provider.limits,
                est_in + est_out,
                candidate.estimated_cost,
                now,
            ) {
                let err = match exceeded {
                    LimitExceeded::DailyBudget => AIError::BudgetExceeded(format!(
                        "provider '{}' reached its daily budget",
                        candidate.provider_id
                    )),
                    _ => AIError::RateLimited(format!(
                        "provider '{}' reached its per-minute limit",
                        candidate.provider_id
                    )),
                };
                warn!(provider = %candidate.provider_id, error = %err, "provider throttled before call");
                self.throttle(&candidate.provider).await;
                excluded.insert(candidate.provider_id);
                last_error = Some(err);
                continue;
            }

            attempts += 1;
            if attempts > max_attempts {
                return Err(AIError::AllProvidersFailed {
                    attempts: attempts - 1,
                    last: Box::new(last_error.unwrap_or_else(|| {
                        AIError::Unavailable("failover chain exhausted".to_string())
                    })),
                });
            }

            let permit = candidate
                .provider
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| AIError::Internal("provider semaphore closed".to_string()))?;

            let timeout = match criteria.strategy {
                RoutingStrategy::Speed => self.config.speed_timeout,
                _ => self.config.standard_timeout,
            };

            debug!(
                provider = %candidate.provider_id,
                model = %candidate.model.model_id,
                strategy = %criteria.strategy,
                estimated_cost = candidate.estimated_cost,
                "routing AI request"
            );

            let started = Instant::now();
            let call = tokio::time::timeout(
                timeout,
                candidate.provider.client.process(request, &candidate.model.model_id),
            );
            let outcome = match &cancel {
                Some(token) => {
                    tokio::pin!(call);
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            // Dropping the call aborts the provider request
                            return Err(AIError::Cancelled);
                        }
                        outcome = &mut call => outcome,
                    }
                }
                None => call.await,
            };
            drop(permit);

            match outcome {
                Ok(Ok(mut response)) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    response.latency_ms = latency_ms;
                    response.provider_used = candidate.provider_id.clone();

                    candidate.provider.meter.record(
                        u64::from(response.tokens_input) + u64::from(response.tokens_output),
                        response.cost_estimate,
                        Utc::now(),
                    );
                    self.record_success(&candidate.provider, latency_ms).await;

                    debug!(
                        provider = %candidate.provider_id,
                        model = %response.model_used,
                        latency_ms,
                        cost = response.cost_estimate,
                        "AI request served"
                    );
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    warn!(
                        provider = %candidate.provider_id,
                        error = %err,
                        "provider call failed, failing over"
                    );
                    match &err {
                        AIError::RateLimited(_) | AIError::BudgetExceeded(_) => {
                            self.throttle(&candidate.provider).await;
                        }
                        _ => self.record_failure(&candidate.provider, &err).await,
                    }
                    excluded.insert(candidate.provider_id);
                    last_error = Some(err);
                }
                Err(_elapsed) => {
                    let err = AIError::Timeout(format!(
                        "provider '{}' exceeded {}ms",
                        candidate.provider_id,
                        timeout.as_millis()
                    ));
                    warn!(provider = %candidate.provider_id, error = %err, "provider timed out, failing over");
                    self.record_failure(&candidate.provider, &err).await;
                    excluded.insert(candidate.provider_id);
                    last_error = Some(err);
                }
            }
        }
    }

    /// One probe round over all enabled providers
    pub async fn probe_health(&self) {
        let providers: Vec<(String, Arc<RegisteredProvider>)> = {
            let guard = self.providers.read().await;
            guard
                .iter()
                .map(|(id, p)| (id.clone(), p.clone()))
                .collect()
        };

        for (id, provider) in providers {
            if !provider.enabled.load(Ordering::Relaxed) {
                continue;
            }
            match tokio::time::timeout(Duration::from_secs(10), provider.client.health_check())
                .await
            {
                Ok(Ok(report)) => {
                    let mut health = provider.health.write().await;
                    health.state = report.state;
                    health.latency_ms = Some(report.latency_sample_ms);
                    health.error_rate = report.error_rate_window;
                    if report.state == HealthState::Healthy {
                        health.consecutive_failures = 0;
                        health.last_error = None;
                    }
                    health.last_check = Utc::now();
                }
                Ok(Err(err)) => {
                    warn!(provider = %id, error = %err, "health probe failed");
                    self.record_failure(&provider, &err).await;
                }
                Err(_) => {
                    let err = AIError::Timeout("health probe timed out".to_string());
                    warn!(provider = %id, "health probe timed out");
                    self.record_failure(&provider, &err).await;
                }
            }
        }
    }

    // --- internals ---

    async fn enabled_provider_count(&self) -> usize {
        let providers = self.providers.read().await;
        providers
            .values()
            .filter(|p| p.enabled.load(Ordering::Relaxed))
            .count()
    }

    /// Cheapest estimated cost among enabled, capability-matching models,
    /// ignoring health - used only for the upfront max_cost validation
    async fn cheapest_eligible_cost(
        &self,
        task_type: TaskType,
        est_in: u64,
        est_out: u64,
    ) -> Option<f64> {
        let providers = self.providers.read().await;
        let required = task_type.required_capability();
        providers
            .values()
            .filter(|p| p.enabled.load(Ordering::Relaxed))
            .flat_map(|p| p.models.iter())
            .filter(|m| m.has_capability(required))
            .map(|m| m.estimate_cost(est_in, est_out))
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    async fn select(
        &self,
        criteria: &SelectionCriteria,
        excluded: &HashSet<String>,
        est_in: u64,
        est_out: u64,
    ) -> Option<Candidate> {
        let providers = self.providers.read().await;
        let now = Utc::now();
        let required = criteria.task_type.required_capability();

        let mut healthy_pool = Vec::new();
        let mut degraded_pool = Vec::new();

        for (id, provider) in providers.iter() {
            if excluded.contains(id) || !provider.enabled.load(Ordering::Relaxed) {
                continue;
            }
            if let Some(until) = *provider.cooldown_until.read().await {
                if until > now {
                    continue;
                }
            }
            let state = provider.health.read().await.state;
            if state == HealthState::Down {
                continue;
            }

            for model in &provider.models {
                if !model.has_capability(required) {
                    continue;
                }
                if let Some(min_quality) = criteria.min_quality {
                    if model.quality_rank > min_quality {
                        continue;
                    }
                }
                let estimated_cost = model.estimate_cost(est_in, est_out);
                if let Some(max_cost) = criteria.max_cost {
                    if estimated_cost > max_cost {
                        continue;
                    }
                }

                let candidate = Candidate {
                    provider_id: id.clone(),
                    provider: provider.clone(),
                    model: model.clone(),
                    estimated_cost,
                };
                if state == HealthState::Healthy {
                    healthy_pool.push(candidate);
                } else {
                    degraded_pool.push(candidate);
                }
            }
        }

        // Degraded providers only serve when nothing healthy matches
        let mut pool = if healthy_pool.is_empty() {
            degraded_pool
        } else {
            healthy_pool
        };
        if pool.is_empty() {
            return None;
        }

        if criteria.strategy == RoutingStrategy::Fallback {
            // Chain follows provider priority; each provider leads with its
            // configured default model
            pool.sort_by(|a, b| {
                let a_default = Some(a.model.model_id.as_str()) == a.provider.default_model.as_deref();
                let b_default = Some(b.model.model_id.as_str()) == b.provider.default_model.as_deref();
                a.provider
                    .priority
                    .cmp(&b.provider.priority)
                    .then(b_default.cmp(&a_default))
                    .then(a.model.quality_rank.cmp(&b.model.quality_rank))
                    .then(a.model.model_id.cmp(&b.model.model_id))
            });
            return pool.into_iter().next();
        }

        let cheapest = pool
            .iter()
            .map(|c| c.estimated_cost)
            .fold(f64::INFINITY, f64::min);

        let mut scored: Vec<(f64, Candidate)> = pool
            .into_iter()
            .map(|candidate| (self.score(criteria, &candidate, cheapest), candidate))
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            if (score_a - score_b).abs() > 1e-9 {
                return score_b
                    .partial_cmp(score_a)
                    .unwrap_or(std::cmp::Ordering::Equal);
            }
            // Tied on score: a preferred provider wins, then priority,
            // quality rank, model id
            let a_preferred = criteria.prefer_provider.as_deref() == Some(a.provider_id.as_str());
            let b_preferred = criteria.prefer_provider.as_deref() == Some(b.provider_id.as_str());
            b_preferred
                .cmp(&a_preferred)
                .then(a.provider.priority.cmp(&b.provider.priority))
                .then(a.model.quality_rank.cmp(&b.model.quality_rank))
                .then(a.model.model_id.cmp(&b.model.model_id))
        });

        scored.into_iter().next().map(|(_, candidate)| candidate)
    }

    fn score(&self, criteria: &SelectionCriteria, candidate: &Candidate, cheapest: f64) -> f64 {
        let w = &self.config.weights;
        let quality = candidate.model.quality_score();
        let cost_efficiency = if candidate.estimated_cost <= f64::EPSILON {
            1.0
        } else {
            cheapest.max(f64::EPSILON) / candidate.estimated_cost
        };
        let capability = capability_match(criteria.task_type, &candidate.model);
        let latency_bonus = match candidate.model.latency_class {
            LatencyClass::Fast => 0.5,
            LatencyClass::Standard => 0.2,
            LatencyClass::Slow => 0.0,
        };

        match criteria.strategy {
            RoutingStrategy::Performance => {
                w.performance_quality * quality + w.performance_capability * capability
            }
            RoutingStrategy::Cost => w.cost_efficiency * cost_efficiency + w.cost_quality * quality,
            RoutingStrategy::Speed => {
                latency_bonus + w.speed_quality * quality + w.speed_cost * cost_efficiency
            }
            RoutingStrategy::Balanced => {
                w.balanced_quality * quality
                    + w.balanced_cost * cost_efficiency
                    + w.balanced_capability * capability
            }
            // Handled positionally in select()
            RoutingStrategy::Fallback => 0.0,
        }
    }

    async fn throttle(&self, provider: &Arc<RegisteredProvider>) {
        let until = Utc::now()
            + chrono::Duration::from_std(self.config.throttle_cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        *provider.cooldown_until.write().await = Some(until);
    }

    async fn record_success(&self, provider: &Arc<RegisteredProvider>, latency_ms: u64) {
        let mut health = provider.health.write().await;
        health.state = HealthState::Healthy;
        health.consecutive_failures = 0;
        health.latency_ms = Some(latency_ms);
        health.error_rate = 0.0;
        health.last_error = None;
        health.last_check = Utc::now();
    }

    async fn record_failure(&self, provider: &Arc<RegisteredProvider>, err: &AIError) {
        let mut health = provider.health.write().await;
        health.consecutive_failures += 1;
        health.state = if health.consecutive_failures >= 3 {
            HealthState::Down
        } else {
            HealthState::Degraded
        };
        health.last_error = Some(err.to_string());
        health.last_check = Utc::now();
    }
}

/// 0.5 base for covering the required capability, scaled up by preferred
/// capability coverage
fn capability_match(task_type: TaskType, model: &ModelDescriptor) -> f64 {
    let preferred = task_type.preferred_capabilities();
    if preferred.is_empty() {
        return 1.0;
    }
    let matched = preferred
        .iter()
        .filter(|c| model.has_capability(**c))
        .count();
    0.5 + 0.5 * matched as f64 / preferred.len() as f64
}

/// Probe provider health on a fixed cadence (at most every 5 minutes apart)
pub fn spawn_health_monitor(manager: Arc<AIProviderManager>) -> tokio::task::JoinHandle<()> {
    let interval = manager
        .config
        .health_check_interval
        .min(Duration::from_secs(300));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            manager.probe_health().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::traits::HealthReport;
    use crate::ai::ModelCapability;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct MockProvider {
        id: String,
        models: Vec<ModelDescriptor>,
        outcomes: Mutex<VecDeque<AIResult<AIResponse>>>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(id: &str, models: Vec<ModelDescriptor>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                models,
                outcomes: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn script(self: &Arc<Self>, outcome: AIResult<AIResponse>) -> &Arc<Self> {
            self.outcomes.lock().unwrap().push_back(outcome);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }

        fn ok_response(provider: &str, model: &str) -> AIResponse {
            AIResponse {
                content: format!("response from {}", provider),
                model_used: model.to_string(),
                provider_used: provider.to_string(),
                tokens_input: 40,
                tokens_output: 20,
                cost_estimate: 0.001,
                latency_ms: 10,
                finish_reason: "stop".to_string(),
            }
        }
    }

    #[async_trait]
    impl AIProvider for MockProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn list_models(&self) -> Vec<ModelDescriptor> {
            self.models.clone()
        }

        async fn process(&self, _request: &AIRequest, model_id: &str) -> AIResult<AIResponse> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.outcomes.lock().unwrap().pop_front() {
                Some(outcome) => outcome,
                None => Ok(Self::ok_response(&self.id, model_id)),
            }
        }

        async fn health_check(&self) -> AIResult<HealthReport> {
            Ok(HealthReport::healthy(25))
        }

        fn estimate_cost(&self, request: &AIRequest, model_id: &str) -> AIResult<f64> {
            let model = self
                .models
                .iter()
                .find(|m| m.model_id == model_id)
                .ok_or_else(|| AIError::ModelNotFound(model_id.to_string()))?;
            Ok(model.estimate_cost(estimate_tokens(&request.content), 1000))
        }
    }

    fn model(
        provider: &str,
        model_id: &str,
        rank: u8,
        cost_per_token: f64,
        latency_class: LatencyClass,
    ) -> ModelDescriptor {
        ModelDescriptor {
            provider_id: provider.to_string(),
            model_id: model_id.to_string(),
            quality_rank: rank,
            cost_per_input_token: cost_per_token,
            cost_per_output_token: cost_per_token * 2.0,
            max_context: 128_000,
            capabilities: vec![
                ModelCapability::Summarization,
                ModelCapability::Analysis,
                ModelCapability::Reasoning,
                ModelCapability::Generation,
            ],
            latency_class,
        }
    }

    fn settings(priority: u8) -> ProviderSettings {
        ProviderSettings {
            priority,
            ..ProviderSettings::default()
        }
    }

    fn criteria(strategy: RoutingStrategy) -> SelectionCriteria {
        SelectionCriteria::new(TaskType::Summarize, strategy)
    }

    fn request() -> AIRequest {
        AIRequest::new(TaskType::Summarize, "long meeting notes to summarize")
    }

    async fn manager_with(
        providers: Vec<(Arc<MockProvider>, ProviderSettings)>,
    ) -> AIProviderManager {
        let manager = AIProviderManager::new(RouterConfig::default());
        for (provider, settings) in providers {
            manager.register_provider(provider, settings).await;
        }
        manager
    }

    #[tokio::test]
    async fn failover_moves_to_the_next_provider_and_degrades_health() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);
        p1.script(Err(AIError::Upstream {
            status: 502,
            message: "bad gateway".to_string(),
        }));

        let manager = manager_with(vec![
            (p1.clone(), settings(1)),
            (p2.clone(), settings(2)),
        ])
        .await;

        let response = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap();
        assert_eq!(response.provider_used, "p2");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);

        let snapshot = manager.health_snapshot().await;
        assert_eq!(snapshot["p1"].health.state, HealthState::Degraded);
        assert_eq!(snapshot["p2"].health.state, HealthState::Healthy);

        // The degraded provider is now skipped while a healthy one matches
        let response = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap();
        assert_eq!(response.provider_used, "p2");
        assert_eq!(p1.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_provider_is_never_called() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);

        let manager = manager_with(vec![
            (
                p1.clone(),
                ProviderSettings {
                    enabled: false,
                    priority: 1,
                    ..ProviderSettings::default()
                },
            ),
            (p2.clone(), settings(2)),
        ])
        .await;

        let response = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap();
        assert_eq!(response.provider_used, "p2");
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn max_cost_below_every_candidate_is_rejected_without_a_call() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 0.01, LatencyClass::Standard)]);
        let manager = manager_with(vec![(p1.clone(), settings(1))]).await;

        let mut criteria = criteria(RoutingStrategy::Cost);
        criteria.max_cost = Some(0.000_000_1);

        let err = manager.route(&request(), &criteria, None).await.unwrap_err();
        assert!(matches!(err, AIError::InvalidRequest(_)));
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_request_propagates_without_failover() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);
        p1.script(Err(AIError::InvalidRequest("malformed".to_string())));

        let manager = manager_with(vec![
            (p1.clone(), settings(1)),
            (p2.clone(), settings(2)),
        ])
        .await;

        let err = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AIError::InvalidRequest(_)));
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_all_providers_failed_with_last_error() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);
        p1.script(Err(AIError::Upstream {
            status: 500,
            message: "internal".to_string(),
        }));
        p2.script(Err(AIError::Unavailable("connection refused".to_string())));

        let manager = manager_with(vec![
            (p1.clone(), settings(1)),
            (p2.clone(), settings(2)),
        ])
        .await;

        let err = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap_err();
        match err {
            AIError::AllProvidersFailed { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, AIError::Unavailable(_)));
            }
            other => panic!("expected AllProvidersFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn performance_strategy_prefers_quality_cost_strategy_prefers_price() {
        // One provider serves a premium model, the other a budget model
        let premium = MockProvider::new(
            "premium",
            vec![model("premium", "premium-xl", 1, 0.000_03, LatencyClass::Slow)],
        );
        let budget = MockProvider::new(
            "budget",
            vec![model("budget", "budget-s", 5, 0.000_000_1, LatencyClass::Fast)],
        );

        let manager = manager_with(vec![
            (premium.clone(), settings(1)),
            (budget.clone(), settings(2)),
        ])
        .await;

        let by_performance = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap();
        assert_eq!(by_performance.provider_used, "premium");

        let by_cost = manager
            .route(&request(), &criteria(RoutingStrategy::Cost), None)
            .await
            .unwrap();
        assert_eq!(by_cost.provider_used, "budget");

        let by_speed = manager
            .route(&request(), &criteria(RoutingStrategy::Speed), None)
            .await
            .unwrap();
        assert_eq!(by_speed.provider_used, "budget");
    }

    #[tokio::test]
    async fn fallback_strategy_follows_provider_priority_and_default_model() {
        let p1 = MockProvider::new(
            "p1",
            vec![
                model("p1", "p1-big", 1, 1e-6, LatencyClass::Standard),
                model("p1", "p1-lite", 3, 1e-7, LatencyClass::Fast),
            ],
        );
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);

        let manager = manager_with(vec![
            (
                p1.clone(),
                ProviderSettings {
                    priority: 1,
                    default_model: Some("p1-lite".to_string()),
                    ..ProviderSettings::default()
                },
            ),
            (p2.clone(), settings(2)),
        ])
        .await;

        let response = manager
            .route(&request(), &criteria(RoutingStrategy::Fallback), None)
            .await
            .unwrap();
        assert_eq!(response.provider_used, "p1");
        assert_eq!(response.model_used, "p1-lite");
    }

    #[tokio::test]
    async fn prefer_provider_promotes_on_ties() {
        // Identical models on both providers -> identical scores
        let p1 = MockProvider::new("p1", vec![model("p1", "same", 2, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "same", 2, 1e-6, LatencyClass::Standard)]);

        let manager = manager_with(vec![
            (p1.clone(), settings(1)),
            (p2.clone(), settings(2)),
        ])
        .await;

        let mut with_preference = criteria(RoutingStrategy::Balanced);
        with_preference.prefer_provider = Some("p2".to_string());
        let response = manager.route(&request(), &with_preference, None).await.unwrap();
        assert_eq!(response.provider_used, "p2");

        // Without a preference the lower priority value wins the tie
        let response = manager
            .route(&request(), &criteria(RoutingStrategy::Balanced), None)
            .await
            .unwrap();
        assert_eq!(response.provider_used, "p1");
    }

    #[tokio::test]
    async fn rate_limit_ceiling_throttles_and_fails_over() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);

        let manager = manager_with(vec![
            (
                p1.clone(),
                ProviderSettings {
                    priority: 1,
                    limits: ProviderLimits {
                        requests_per_minute: 1,
                        ..ProviderLimits::default()
                    },
                    ..ProviderSettings::default()
                },
            ),
            (p2.clone(), settings(2)),
        ])
        .await;

        let first = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap();
        assert_eq!(first.provider_used, "p1");

        // p1's minute window is spent; the call must not reach it
        let second = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap();
        assert_eq!(second.provider_used, "p2");
        assert_eq!(p1.calls(), 1);
    }

    #[tokio::test]
    async fn budget_ceiling_blocks_before_the_call() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 0.01, LatencyClass::Standard)]);
        let manager = manager_with(vec![(
            p1.clone(),
            ProviderSettings {
                priority: 1,
                limits: ProviderLimits {
                    daily_budget: 0.000_001,
                    ..ProviderLimits::default()
                },
                ..ProviderSettings::default()
            },
        )])
        .await;

        let err = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap_err();
        match err {
            AIError::AllProvidersFailed { last, .. } => {
                assert!(matches!(*last, AIError::BudgetExceeded(_)));
            }
            other => panic!("expected AllProvidersFailed, got {:?}", other),
        }
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn min_quality_filters_low_ranked_models() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-lite", 6, 1e-7, LatencyClass::Fast)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-5, LatencyClass::Standard)]);

        let manager = manager_with(vec![
            (p1.clone(), settings(1)),
            (p2.clone(), settings(2)),
        ])
        .await;

        let mut picky = criteria(RoutingStrategy::Cost);
        picky.min_quality = Some(3);
        let response = manager.route(&request(), &picky, None).await.unwrap();
        assert_eq!(response.provider_used, "p2");
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn set_enabled_takes_effect_immediately() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);

        let manager = manager_with(vec![
            (p1.clone(), settings(1)),
            (p2.clone(), settings(2)),
        ])
        .await;

        manager.set_enabled("p1", false).await.unwrap();
        let response = manager
            .route(&request(), &criteria(RoutingStrategy::Performance), None)
            .await
            .unwrap();
        assert_eq!(response.provider_used, "p2");
        assert_eq!(p1.calls(), 0);

        assert!(manager.set_enabled("ghost", true).await.is_err());
    }

    #[tokio::test]
    async fn cancelled_token_stops_routing_before_any_call() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let manager = manager_with(vec![(p1.clone(), settings(1))]).await;

        let token = CancellationToken::new();
        token.cancel();

        let err = manager
            .route(
                &request(),
                &criteria(RoutingStrategy::Performance),
                Some(token),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AIError::Cancelled));
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn live_token_does_not_disturb_routing() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let manager = manager_with(vec![(p1.clone(), settings(1))]).await;

        let response = manager
            .route(
                &request(),
                &criteria(RoutingStrategy::Performance),
                Some(CancellationToken::new()),
            )
            .await
            .unwrap();
        assert_eq!(response.provider_used, "p1");
    }

    #[tokio::test]
    async fn model_registry_hides_disabled_providers() {
        let p1 = MockProvider::new("p1", vec![model("p1", "p1-best", 1, 1e-6, LatencyClass::Standard)]);
        let p2 = MockProvider::new("p2", vec![model("p2", "p2-best", 2, 1e-6, LatencyClass::Standard)]);

        let manager = manager_with(vec![
            (p1.clone(), settings(1)),
            (p2.clone(), settings(2)),
        ])
        .await;
        assert_eq!(manager.models().await.len(), 2);

        manager.set_enabled("p2", false).await.unwrap();
        let models = manager.models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].provider_id, "p1");
    }
}
