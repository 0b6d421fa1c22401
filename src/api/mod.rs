// HTTP surface - axum router, CORS and server bootstrap

//! # API
//!
//! REST surface under `/api/v1` plus an unauthenticated `/health` liveness
//! endpoint at the root. Identity arrives as gateway-stamped headers (see
//! [`auth`]); errors leave as the stable envelope (see [`types`]).

pub mod auth;
pub mod handlers;
pub mod types;

pub use handlers::AppState;
pub use types::ApiError;

use axum::routing::{get, patch, post};
use axum::Router;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use handlers::{
    advance_workflow, ai_analyze, ai_health, ai_models, ai_suggest, ai_summarize,
    create_workflow, get_workflow, health, list_definitions, list_workflows_for_user,
    register_definition, sla_check, workflow_stats,
};

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_enabled: true,
        }
    }
}

/// Assemble the full application router
pub fn build_router(state: AppState, cors_enabled: bool) -> Router {
    let api = Router::new()
        .route("/workflows", post(create_workflow))
        .route("/workflows/stats", get(workflow_stats))
        .route("/workflows/sla-check", get(sla_check))
        .route("/workflows/user/:user_id", get(list_workflows_for_user))
        .route("/workflows/:id", get(get_workflow))
        .route("/workflows/:id/next", patch(advance_workflow))
        .route("/definitions", post(register_definition).get(list_definitions))
        .route("/ai/summarize", post(ai_summarize))
        .route("/ai/analyze", post(ai_analyze))
        .route("/ai/suggest", post(ai_suggest))
        .route("/ai/health", get(ai_health))
        .route("/ai/models", get(ai_models));

    let router = Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .with_state(state);

    if cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Production HTTP server
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve until `shutdown` fires, then finish in-flight requests
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = build_router(self.state, self.config.cors_enabled);

        info!("🚀 Conductor API listening on http://{}", addr);
        axum::Server::bind(&addr)
            .serve(router.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}
