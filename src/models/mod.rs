// Core domain models for Conductor
// These are pure data structures; the engine interprets them

//! # Domain Models
//!
//! The model layer is pure data: workflow definitions (versioned state
//! machine templates), instances (running occurrences with context, deadline
//! and audit trail), history entries, AI insights and the opaque caller
//! identity. Nothing here performs I/O or holds locks - interpretation lives
//! in `engine`, persistence behind the repository contract.

pub mod auth;
pub mod definition;
pub mod insight;
pub mod instance;
pub mod state;
pub mod transition;

pub use auth::AuthContext;
pub use definition::{SlaPolicy, WorkflowDefinition};
pub use insight::{AIInsight, InsightKind};
pub use instance::{
    HistoryEntry, InstanceStatus, Priority, WorkflowContext, WorkflowInstance,
};
pub use state::{
    ActionDeclaration, ExecutionMode, StateDefinition, StateId, TerminalKind, TriggerId,
};
pub use transition::TransitionDefinition;
