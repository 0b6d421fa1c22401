// Conductor - workflow execution engine with a multi-provider AI routing layer

//! # Conductor
//!
//! Conductor models long-running business processes as instances of
//! declarative state machines. Definitions are plain, versioned data; a
//! single interpreter validates transitions, evaluates guards and role
//! checks, computes progress and tracks SLA deadlines. Every state change is
//! recorded in an append-only history, and lifecycle events are emitted
//! through a fire-and-forget publisher after commit.
//!
//! The AI side routes summarize/analyze/suggest style operations across
//! heterogeneous providers. A provider manager scores candidate models by
//! quality, cost, speed or a balance of the three, enforces per-provider
//! rate limits and daily budgets, tracks health, and fails over
//! automatically when a provider misbehaves.
//!
//! ## Module map
//!
//! - [`models`]: pure data - definitions, instances, history, insights
//! - [`engine`]: state machine, guards, on-enter actions, the workflow
//!   engine, the repository contract and the event publisher
//! - [`ai`]: provider abstraction, model registry, routing and limits
//! - [`api`]: axum HTTP surface with the stable error envelope
//! - [`config`]: environment-driven configuration

pub mod ai;
pub mod api;
pub mod config;
pub mod engine;
pub mod models;

// Re-export the types most integrations need, so callers don't have to
// navigate the module tree
pub use engine::{
    actions::{ActionRegistry, OnEnterAction},
    events::{BroadcastPublisher, EventPublisher, WorkflowEvent, WorkflowEventType},
    guards::GuardRegistry,
    machine::{StateMachine, TransitionError},
    registry::DefinitionRegistry,
    storage::{InMemoryRepository, Repository},
    workflows::{CallBounds, CreateInstance, InstanceFilter, Page, WorkflowEngine, WorkflowStats},
};
pub use models::{
    AuthContext, HistoryEntry, InstanceStatus, Priority, StateDefinition, StateId,
    TerminalKind, TransitionDefinition, TriggerId, WorkflowContext, WorkflowDefinition,
    WorkflowInstance,
};

use thiserror::Error;

use ai::AIError;

/// Error taxonomy surfaced by the engine and mapped onto the HTTP envelope
///
/// Every variant has a stable `kind` string suitable for client branching;
/// the HTTP layer maps kinds to status codes. AI failures keep their own
/// taxonomy ([`AIError`]) and are wrapped, not flattened, so the router's
/// subkinds stay visible to callers.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Malformed definition, unknown registry reference, bad payload
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Entity missing, or visible only to another organization
    #[error("Not found: {0}")]
    NotFound(String),

    /// Actor lacks a required role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Guard predicate returned false
    #[error("Guard '{guard}' rejected the transition")]
    GuardFailed { guard: String },

    /// No transition for (current_state, trigger)
    #[error("No transition for trigger '{trigger}' from state '{state}'")]
    UnknownTrigger { state: String, trigger: String },

    /// Advance attempted on a terminal instance
    #[error("Instance {instance_id} already reached a terminal state")]
    AlreadyCompleted { instance_id: String },

    /// Optimistic-lock retries exhausted
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Synchronous on-enter action failed; the transition was aborted
    #[error("Action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    /// Persistence backend fault; retryable at the caller's discretion
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(#[from] anyhow::Error),

    /// AI routing failure, surfaced from AI endpoints only
    #[error(transparent)]
    AI(#[from] AIError),

    /// Operation deadline elapsed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Caller cancelled the operation
    #[error("Cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConductorError {
    /// Stable machine-readable kind for the API error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::Validation(_) => "validation",
            ConductorError::NotFound(_) => "not_found",
            ConductorError::Forbidden(_) => "forbidden",
            ConductorError::GuardFailed { .. } => "guard_failed",
            ConductorError::UnknownTrigger { .. } => "unknown_trigger",
            ConductorError::AlreadyCompleted { .. } => "already_completed",
            ConductorError::Conflict(_) => "conflict",
            ConductorError::ActionFailed { .. } => "action_failed",
            ConductorError::RepositoryUnavailable(_) => "repository_unavailable",
            ConductorError::AI(err) => err.kind(),
            ConductorError::DeadlineExceeded => "deadline_exceeded",
            ConductorError::Cancelled => "cancelled",
            ConductorError::Serialization(_) => "serialization",
            ConductorError::Internal(_) => "internal",
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ConductorError>;
