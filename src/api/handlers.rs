// REST handlers for the workflow and AI endpoints

//! # Handlers
//!
//! Thin translation layer: extract identity, deserialize the document, call
//! the engine or the router, wrap the result. No business rules live here -
//! every decision the handlers appear to make (org scoping, role checks,
//! idempotency) is enforced by the layers below.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::ai::{AIProviderManager, AIRequest, SelectionCriteria, TaskType};
use crate::engine::{
    CreateInstance, DefinitionRegistry, InstanceFilter, Page, Repository, WorkflowEngine,
};
use crate::models::{AIInsight, AuthContext, WorkflowDefinition};
use crate::ConductorError;

use super::types::{
    AIOperationResponse, AdvanceRequest, AiHealthResponse, AnalyzeRequest, ApiError,
    DefinitionDocument, HealthResponse, InstanceResponse, ListQuery, SlaSweepResponse,
    SummarizeRequest, SuggestRequest,
};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub definitions: Arc<DefinitionRegistry>,
    pub repository: Arc<dyn Repository>,
    pub router: Option<Arc<AIProviderManager>>,
}

fn require_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(ConductorError::Forbidden("admin role required".to_string()).into())
    }
}

fn require_router(state: &AppState) -> Result<Arc<AIProviderManager>, ApiError> {
    state.router.clone().ok_or_else(|| {
        ApiError::from(ConductorError::AI(crate::ai::AIError::Unavailable(
            "AI operations are disabled on this deployment".to_string(),
        )))
    })
}

// --- workflow endpoints ---

pub async fn create_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<CreateInstance>,
) -> Result<(StatusCode, Json<InstanceResponse>), ApiError> {
    let instance = state.engine.create(&auth, body, None).await?;
    let progress = state.engine.progress(&auth, instance.id, None).await?;
    Ok((
        StatusCode::CREATED,
        Json(InstanceResponse::new(instance, progress)),
    ))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceResponse>, ApiError> {
    let instance = state.engine.get(&auth, id, None).await?;
    let progress = state.engine.progress(&auth, id, None).await?;
    Ok(Json(InstanceResponse::new(instance, progress)))
}

pub async fn advance_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(body): Json<AdvanceRequest>,
) -> Result<Json<InstanceResponse>, ApiError> {
    let instance = state
        .engine
        .advance(
            &auth,
            id,
            body.trigger.into(),
            body.context_patch,
            body.notes,
            None,
        )
        .await?;
    let progress = state.engine.progress(&auth, id, None).await?;
    Ok(Json(InstanceResponse::new(instance, progress)))
}

pub async fn list_workflows_for_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<InstanceResponse>>, ApiError> {
    let filter = InstanceFilter {
        status: query.status,
        priority: query.priority,
        overdue: query.overdue,
    };
    let page = Page {
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(20),
    };

    let instances = state
        .engine
        .list_for_user(&auth, &user_id, filter, page, None)
        .await?;

    let mut responses = Vec::with_capacity(instances.len());
    for instance in instances {
        let progress = state.engine.progress(&auth, instance.id, None).await?;
        responses.push(InstanceResponse::new(instance, progress));
    }
    Ok(Json(responses))
}

pub async fn workflow_stats(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<crate::engine::WorkflowStats>, ApiError> {
    Ok(Json(state.engine.stats(&auth, None).await?))
}

pub async fn sla_check(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<SlaSweepResponse>, ApiError> {
    require_admin(&auth)?;
    let flagged = state.engine.sla_sweep(None).await?;
    Ok(Json(SlaSweepResponse { flagged }))
}

// --- definition endpoints ---

pub async fn register_definition(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(document): Json<DefinitionDocument>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), ApiError> {
    require_admin(&auth)?;
    let definition = state.definitions.register(document.into_definition()).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

pub async fn list_definitions(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<WorkflowDefinition>>, ApiError> {
    Ok(Json(state.definitions.list().await?))
}

// --- AI endpoints ---

async fn run_ai_operation(
    state: &AppState,
    auth: &AuthContext,
    task_type: TaskType,
    content: String,
    strategy: Option<String>,
    max_cost: Option<f64>,
    instance_id: Option<Uuid>,
) -> Result<Json<AIOperationResponse>, ApiError> {
    let router = require_router(state)?;

    let strategy = match strategy {
        Some(raw) => raw
            .parse()
            .map_err(|e: String| ApiError::from(ConductorError::Validation(e)))?,
        None => router.default_strategy(),
    };

    let request = AIRequest::new(task_type, content);
    let mut criteria = SelectionCriteria::new(task_type, strategy);
    criteria.max_cost = max_cost;

    let response = router
        .route(&request, &criteria, None)
        .await
        .map_err(ApiError::from)?;

    // Promote to an insight when the caller attached the operation to one of
    // their instances; the scoped load enforces org visibility first
    let insight_id = match instance_id {
        Some(id) => {
            state.engine.get(auth, id, None).await?;
            let insight = AIInsight::new(
                Some(id),
                task_type.into(),
                response.content.clone(),
                if response.finish_reason == "stop" { 0.9 } else { 0.6 },
                response.model_used.clone(),
                response.provider_used.clone(),
            );
            let stored = state.repository.add_insight(insight).await?;
            debug!(instance_id = %id, insight_id = %stored.id, "AI result promoted to insight");
            Some(stored.id)
        }
        None => None,
    };

    Ok(Json(AIOperationResponse::from_response(response, insight_id)))
}

pub async fn ai_summarize(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<SummarizeRequest>,
) -> Result<Json<AIOperationResponse>, ApiError> {
    run_ai_operation(
        &state,
        &auth,
        TaskType::Summarize,
        body.text,
        body.strategy,
        body.max_cost,
        body.instance_id,
    )
    .await
}

pub async fn ai_analyze(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<AIOperationResponse>, ApiError> {
    run_ai_operation(
        &state,
        &auth,
        TaskType::Analyze,
        body.content,
        body.strategy,
        body.max_cost,
        body.instance_id,
    )
    .await
}

pub async fn ai_suggest(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<SuggestRequest>,
) -> Result<Json<AIOperationResponse>, ApiError> {
    let content = match &body.context_data {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    run_ai_operation(
        &state,
        &auth,
        TaskType::Suggest,
        content,
        body.strategy,
        body.max_cost,
        body.instance_id,
    )
    .await
}

pub async fn ai_health(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<AiHealthResponse>, ApiError> {
    match &state.router {
        Some(router) => Ok(Json(AiHealthResponse {
            enabled: true,
            providers: router.health_snapshot().await,
        })),
        None => Ok(Json(AiHealthResponse {
            enabled: false,
            providers: Default::default(),
        })),
    }
}

pub async fn ai_models(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<crate::ai::ModelDescriptor>>, ApiError> {
    match &state.router {
        Some(router) => Ok(Json(router.models().await)),
        None => Ok(Json(Vec::new())),
    }
}

// --- liveness ---

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = match &state.router {
        Some(router) => router.health_snapshot().await.len(),
        None => 0,
    };
    Json(HealthResponse {
        status: "ok",
        ai_enabled: state.router.is_some(),
        providers,
    })
}
