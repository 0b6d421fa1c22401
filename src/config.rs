// Environment-driven configuration

//! # Configuration
//!
//! All tuning comes from the environment (a `.env` file is honored in
//! development). Unparsable values fall back to defaults with a warning
//! instead of refusing to boot - a misconfigured knob should degrade, not
//! take the service down.
//!
//! Recognized variables:
//!
//! - `SERVER_HOST`, `SERVER_PORT`
//! - `WORKFLOW_DEFAULT_TIMEOUT_SECONDS`, `WORKFLOW_MAX_TRANSITION_RETRIES`,
//!   `SLA_SWEEP_INTERVAL_SECONDS`
//! - `EVENT_PUBLISHER` (`memory` | `nats`), `NATS_URL`
//! - `AI_ENABLED`, `AI_STRATEGY`, `AI_WEIGHT_*` scoring overrides
//! - per provider (`ANTHROPIC`, `OPENAI`, `OLLAMA`):
//!   `AI_{P}_ENABLED`, `AI_{P}_PRIORITY`, `AI_{P}_DEFAULT_MODEL`,
//!   `AI_{P}_API_KEY`, `AI_{P}_BASE_URL`, `AI_{P}_RATE_LIMIT_RPM`,
//!   `AI_{P}_RATE_LIMIT_TPM`, `AI_{P}_DAILY_BUDGET`

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::ai::{ProviderLimits, ProviderSettings, RouterConfig, RoutingStrategy, StrategyWeights};
use crate::engine::EngineConfig;

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "unparsable config value, using default");
                default
            }
        },
        None => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Workflow engine settings
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub default_timeout_seconds: u64,
    pub max_transition_retries: u32,
    pub sla_sweep_interval_seconds: u64,
}

/// Which event publisher backend to wire at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPublisherKind {
    Memory,
    Nats,
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub publisher: EventPublisherKind,
    pub nats_url: String,
}

/// Per-provider environment settings
#[derive(Debug, Clone)]
pub struct ProviderEnv {
    pub enabled: bool,
    pub priority: u8,
    pub default_model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub rate_limit_rpm: u32,
    pub rate_limit_tpm: u64,
    pub daily_budget: f64,
}

impl ProviderEnv {
    fn from_env(name: &str, default_priority: u8, enabled_default: impl Fn(&Self) -> bool) -> Self {
        let prefix = format!("AI_{}", name);
        let mut env = Self {
            enabled: false,
            priority: env_parse(&format!("{}_PRIORITY", prefix), default_priority),
            default_model: env_opt(&format!("{}_DEFAULT_MODEL", prefix)),
            api_key: env_opt(&format!("{}_API_KEY", prefix)),
            base_url: env_opt(&format!("{}_BASE_URL", prefix)),
            rate_limit_rpm: env_parse(&format!("{}_RATE_LIMIT_RPM", prefix), 60),
            rate_limit_tpm: env_parse(&format!("{}_RATE_LIMIT_TPM", prefix), 100_000),
            daily_budget: env_parse(&format!("{}_DAILY_BUDGET", prefix), 50.0),
        };
        env.enabled = env_bool(&format!("{}_ENABLED", prefix), enabled_default(&env));
        env
    }

    pub fn limits(&self) -> ProviderLimits {
        ProviderLimits {
            requests_per_minute: self.rate_limit_rpm,
            tokens_per_minute: self.rate_limit_tpm,
            daily_budget: self.daily_budget,
        }
    }

    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            enabled: self.enabled,
            priority: self.priority,
            default_model: self.default_model.clone(),
            limits: self.limits(),
            ..ProviderSettings::default()
        }
    }
}

/// AI layer settings
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub enabled: bool,
    pub default_strategy: RoutingStrategy,
    pub anthropic: ProviderEnv,
    pub openai: ProviderEnv,
    pub ollama: ProviderEnv,
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub workflow: WorkflowConfig,
    pub events: EventsConfig,
    pub ai: AiConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let default_strategy = env_opt("AI_STRATEGY")
            .and_then(|raw| match raw.parse() {
                Ok(strategy) => Some(strategy),
                Err(_) => {
                    warn!(value = %raw, "unknown AI_STRATEGY, using balanced");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            server: ServerConfig {
                host: env_opt("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: env_parse("SERVER_PORT", 3000),
            },
            workflow: WorkflowConfig {
                default_timeout_seconds: env_parse("WORKFLOW_DEFAULT_TIMEOUT_SECONDS", 15),
                max_transition_retries: env_parse("WORKFLOW_MAX_TRANSITION_RETRIES", 3),
                sla_sweep_interval_seconds: env_parse("SLA_SWEEP_INTERVAL_SECONDS", 60),
            },
            events: EventsConfig {
                publisher: match env_opt("EVENT_PUBLISHER").as_deref() {
                    Some("nats") => EventPublisherKind::Nats,
                    _ => EventPublisherKind::Memory,
                },
                nats_url: env_opt("NATS_URL")
                    .unwrap_or_else(|| "nats://localhost:4222".to_string()),
            },
            ai: AiConfig {
                enabled: env_bool("AI_ENABLED", true),
                default_strategy,
                // Hosted providers default to enabled only when a key is
                // configured; the local runtime stays opt-in
                anthropic: ProviderEnv::from_env("ANTHROPIC", 1, |env| env.api_key.is_some()),
                openai: ProviderEnv::from_env("OPENAI", 2, |env| env.api_key.is_some()),
                ollama: ProviderEnv::from_env("OLLAMA", 3, |_| false),
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_timeout: Duration::from_secs(self.workflow.default_timeout_seconds),
            max_transition_retries: self.workflow.max_transition_retries,
            ..EngineConfig::default()
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        let defaults = StrategyWeights::default();
        RouterConfig {
            default_strategy: self.ai.default_strategy,
            weights: StrategyWeights {
                performance_quality: env_parse(
                    "AI_WEIGHT_PERFORMANCE_QUALITY",
                    defaults.performance_quality,
                ),
                performance_capability: env_parse(
                    "AI_WEIGHT_PERFORMANCE_CAPABILITY",
                    defaults.performance_capability,
                ),
                cost_efficiency: env_parse("AI_WEIGHT_COST_EFFICIENCY", defaults.cost_efficiency),
                cost_quality: env_parse("AI_WEIGHT_COST_QUALITY", defaults.cost_quality),
                speed_quality: env_parse("AI_WEIGHT_SPEED_QUALITY", defaults.speed_quality),
                speed_cost: env_parse("AI_WEIGHT_SPEED_COST", defaults.speed_cost),
                balanced_quality: env_parse(
                    "AI_WEIGHT_BALANCED_QUALITY",
                    defaults.balanced_quality,
                ),
                balanced_cost: env_parse("AI_WEIGHT_BALANCED_COST", defaults.balanced_cost),
                balanced_capability: env_parse(
                    "AI_WEIGHT_BALANCED_CAPABILITY",
                    defaults.balanced_capability,
                ),
            },
            ..RouterConfig::default()
        }
    }

    pub fn sla_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.workflow.sla_sweep_interval_seconds.max(1))
    }
}
