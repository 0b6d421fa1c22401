// HTTP DTOs and the stable error envelope

//! # API Types
//!
//! Request/response documents for the REST surface and the error envelope
//! `{ "error": { "kind", "message", "details" } }`. Error kinds are stable
//! strings suitable for client branching; the status mapping follows the
//! boundary contract (422 for guard/trigger rejections, 409 for conflicts
//! and already-completed, 429/502 for router exhaustion, 504 for missed
//! deadlines).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::ai::{AIError, AIResponse, ProviderStatusReport};
use crate::models::{
    ActionDeclaration, InstanceStatus, Priority, SlaPolicy, StateDefinition, StateId,
    TerminalKind, TransitionDefinition, WorkflowContext, WorkflowDefinition, WorkflowInstance,
};
use crate::ConductorError;

// --- error envelope ---

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Errors surfaced by the HTTP layer
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Engine(ConductorError),
}

impl ApiError {
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Engine(err) => err.kind(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Engine(err) => match err {
                ConductorError::Validation(_) | ConductorError::Serialization(_) => {
                    StatusCode::BAD_REQUEST
                }
                ConductorError::NotFound(_) => StatusCode::NOT_FOUND,
                ConductorError::Forbidden(_) => StatusCode::FORBIDDEN,
                ConductorError::GuardFailed { .. } | ConductorError::UnknownTrigger { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ConductorError::AlreadyCompleted { .. } | ConductorError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                ConductorError::ActionFailed { .. } | ConductorError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ConductorError::RepositoryUnavailable(_) | ConductorError::Cancelled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ConductorError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                ConductorError::AI(ai) => match ai {
                    AIError::RateLimited(_) | AIError::BudgetExceeded(_) => {
                        StatusCode::TOO_MANY_REQUESTS
                    }
                    AIError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    AIError::Upstream { .. } | AIError::AllProvidersFailed { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                    AIError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    AIError::Unavailable(_) | AIError::Cancelled => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    AIError::ModelNotFound(_) => StatusCode::NOT_FOUND,
                    AIError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                },
            },
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            ApiError::Engine(ConductorError::ActionFailed { action, .. }) => {
                serde_json::json!({ "action": action })
            }
            ApiError::Engine(ConductorError::GuardFailed { guard }) => {
                serde_json::json!({ "guard": guard })
            }
            ApiError::Engine(ConductorError::UnknownTrigger { state, trigger }) => {
                serde_json::json!({ "state": state, "trigger": trigger })
            }
            ApiError::Engine(ConductorError::AI(AIError::AllProvidersFailed {
                attempts, ..
            })) => serde_json::json!({ "attempts": attempts }),
            _ => serde_json::json!({}),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized(message) => message.clone(),
            ApiError::Engine(err) => err.to_string(),
        }
    }
}

impl From<ConductorError> for ApiError {
    fn from(err: ConductorError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<AIError> for ApiError {
    fn from(err: AIError) -> Self {
        ApiError::Engine(ConductorError::AI(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind().to_string(),
                message: self.message(),
                details: self.details(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

// --- definition documents ---

/// One state in a submitted definition document
#[derive(Debug, Clone, Deserialize)]
pub struct StateDoc {
    pub name: String,

    #[serde(default)]
    pub initial: bool,

    /// `"success"` or `"failure"`
    #[serde(default)]
    pub terminal: Option<TerminalKind>,

    #[serde(default)]
    pub on_enter: Vec<ActionDeclaration>,
}

/// One transition in a submitted definition document
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionDoc {
    pub from: String,
    pub to: String,
    pub trigger: String,

    #[serde(default)]
    pub guard: Option<String>,

    #[serde(default)]
    pub required_roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlaDoc {
    #[serde(default)]
    pub total_duration_seconds: Option<i64>,

    #[serde(default)]
    pub per_state_seconds: HashMap<String, i64>,
}

/// The JSON document accepted by `POST /definitions`
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionDocument {
    pub key: String,

    /// 0 (or omitted) lets the registry assign the next version
    #[serde(default)]
    pub version: u32,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub states: Vec<StateDoc>,
    pub transitions: Vec<TransitionDoc>,

    #[serde(default)]
    pub sla: Option<SlaDoc>,
}

impl DefinitionDocument {
    pub fn into_definition(self) -> WorkflowDefinition {
        let states = self
            .states
            .into_iter()
            .map(|doc| StateDefinition {
                id: StateId::from(doc.name),
                initial: doc.initial,
                terminal: doc.terminal,
                on_enter: doc.on_enter,
            })
            .collect();

        let transitions = self
            .transitions
            .into_iter()
            .map(|doc| {
                let mut transition = TransitionDefinition::new(doc.from, doc.trigger, doc.to);
                transition.guard = doc.guard;
                transition.required_roles = doc.required_roles;
                transition
            })
            .collect();

        let mut definition =
            WorkflowDefinition::new(self.key, self.version, self.name, states, transitions)
                .with_description(self.description);
        definition.sla = self.sla.map(|doc| SlaPolicy {
            total_duration_seconds: doc.total_duration_seconds,
            per_state_seconds: doc
                .per_state_seconds
                .into_iter()
                .map(|(state, seconds)| (StateId::from(state), seconds))
                .collect(),
        });
        definition
    }
}

// --- workflow DTOs ---

/// Body of `PATCH /workflows/{id}/next`
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceRequest {
    pub trigger: String,

    #[serde(default)]
    pub context_patch: Option<WorkflowContext>,

    #[serde(default)]
    pub notes: Option<String>,
}

/// Query string of `GET /workflows/user/{user_id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<InstanceStatus>,
    pub priority: Option<Priority>,
    pub overdue: Option<bool>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// Instance representation with the derived facts clients want inline
#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    #[serde(flatten)]
    pub instance: WorkflowInstance,
    pub status: InstanceStatus,
    pub progress: u8,
}

impl InstanceResponse {
    pub fn new(instance: WorkflowInstance, progress: u8) -> Self {
        let status = instance.status(Utc::now());
        Self {
            instance,
            status,
            progress,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SlaSweepResponse {
    pub flagged: Vec<Uuid>,
}

// --- AI DTOs ---

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeRequest {
    pub text: String,

    #[serde(default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub max_cost: Option<f64>,

    /// When present, the result is persisted as an insight on this instance
    #[serde(default)]
    pub instance_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub content: String,

    #[serde(default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub max_cost: Option<f64>,

    #[serde(default)]
    pub instance_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestRequest {
    pub context_data: serde_json::Value,

    #[serde(default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub max_cost: Option<f64>,

    #[serde(default)]
    pub instance_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AIOperationResponse {
    pub content: String,
    pub model_used: String,
    pub provider_used: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub cost_estimate: f64,
    pub latency_ms: u64,
    pub finish_reason: String,

    /// Set when the result was promoted to an insight
    pub insight_id: Option<Uuid>,
}

impl AIOperationResponse {
    pub fn from_response(response: AIResponse, insight_id: Option<Uuid>) -> Self {
        Self {
            content: response.content,
            model_used: response.model_used,
            provider_used: response.provider_used,
            tokens_input: response.tokens_input,
            tokens_output: response.tokens_output,
            cost_estimate: response.cost_estimate,
            latency_ms: response.latency_ms,
            finish_reason: response.finish_reason,
            insight_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AiHealthResponse {
    pub enabled: bool,
    pub providers: HashMap<String, ProviderStatusReport>,
}

/// Unauthenticated liveness document
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ai_enabled: bool,
    pub providers: usize,
}
