// Conductor server binary
// Run with: cargo run --bin server

//! Production entry point: loads configuration from the environment, wires
//! the repository, registries, event publisher, AI providers and the
//! engine, starts the background monitors (SLA sweep, provider health
//! probe) and serves the REST API.

use std::sync::Arc;

use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conductor::ai::providers::{
    AnthropicConfig, AnthropicProvider, OllamaConfig, OllamaProvider, OpenAIConfig,
    OpenAIProvider,
};
use conductor::ai::{router::spawn_health_monitor, AIProviderManager};
use conductor::api::{ApiConfig, ApiServer, AppState};
use conductor::config::{AppConfig, EventPublisherKind};
use conductor::engine::{
    spawn_sla_monitor, ActionRegistry, BroadcastPublisher, DefinitionRegistry, EventPublisher,
    GuardRegistry, InMemoryRepository, NatsPublisher, Repository, StateMachine, WorkflowEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine outside development
    if dotenv().is_err() {
        eprintln!("No .env file found; relying on process environment");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conductor=info,info")),
        )
        .init();

    let config = AppConfig::from_env();
    info!(
        host = %config.server.host,
        port = config.server.port,
        ai_enabled = config.ai.enabled,
        "starting Conductor"
    );

    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());

    let publisher: Arc<dyn EventPublisher> = match config.events.publisher {
        EventPublisherKind::Memory => {
            info!("event publisher: in-process broadcast");
            Arc::new(BroadcastPublisher::new())
        }
        EventPublisherKind::Nats => {
            info!(url = %config.events.nats_url, "event publisher: NATS");
            Arc::new(NatsPublisher::connect(&config.events.nats_url).await?)
        }
    };

    let router = if config.ai.enabled {
        let manager = Arc::new(AIProviderManager::new(config.router_config()));
        register_providers(&manager, &config).await;
        let _health_probe = spawn_health_monitor(manager.clone());
        Some(manager)
    } else {
        info!("AI routing disabled by configuration");
        None
    };

    let guards = Arc::new(GuardRegistry::with_common_guards());
    let actions = Arc::new(ActionRegistry::with_builtins(
        publisher.clone(),
        repository.clone(),
        router.clone(),
    ));

    let engine = Arc::new(WorkflowEngine::new(
        repository.clone(),
        StateMachine::new(guards.clone()),
        actions.clone(),
        publisher,
        config.engine_config(),
    ));
    let definitions = Arc::new(DefinitionRegistry::new(
        repository.clone(),
        guards,
        actions,
    ));

    // One root token cancels the monitors, in-flight engine operations and
    // the HTTP listener on SIGINT
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let _sla_monitor = spawn_sla_monitor(
        engine.clone(),
        config.sla_sweep_interval(),
        shutdown.child_token(),
    );

    let state = AppState {
        engine,
        definitions,
        repository,
        router,
    };
    let api_config = ApiConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        cors_enabled: true,
    };

    ApiServer::new(api_config, state).serve(shutdown).await?;
    Ok(())
}

async fn register_providers(manager: &Arc<AIProviderManager>, config: &AppConfig) {
    if config.ai.anthropic.enabled {
        let mut provider_config = AnthropicConfig {
            api_key: config.ai.anthropic.api_key.clone().unwrap_or_default(),
            ..AnthropicConfig::default()
        };
        if let Some(base_url) = &config.ai.anthropic.base_url {
            provider_config.base_url = base_url.clone();
        }
        manager
            .register_provider(
                Arc::new(AnthropicProvider::new(provider_config)),
                config.ai.anthropic.settings(),
            )
            .await;
    }

    if config.ai.openai.enabled {
        let mut provider_config = OpenAIConfig {
            api_key: config.ai.openai.api_key.clone().unwrap_or_default(),
            ..OpenAIConfig::default()
        };
        if let Some(base_url) = &config.ai.openai.base_url {
            provider_config.base_url = base_url.clone();
        }
        manager
            .register_provider(
                Arc::new(OpenAIProvider::new(provider_config)),
                config.ai.openai.settings(),
            )
            .await;
    }

    if config.ai.ollama.enabled {
        let mut provider_config = OllamaConfig::default();
        if let Some(base_url) = &config.ai.ollama.base_url {
            provider_config.base_url = base_url.clone();
        }
        if OllamaProvider::check_availability(&provider_config.base_url).await {
            manager
                .register_provider(
                    Arc::new(OllamaProvider::new(provider_config)),
                    config.ai.ollama.settings(),
                )
                .await;
        } else {
            warn!(
                url = %provider_config.base_url,
                "⚠️  Ollama enabled but unreachable - skipping registration"
            );
        }
    }
}
