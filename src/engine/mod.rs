// Conductor engine - interpretation, orchestration and persistence seams

//! # Engine
//!
//! Everything between the pure model layer and the HTTP surface:
//!
//! - `machine`: stateless interpreter over workflow definitions
//! - `guards` / `actions`: injected registries the interpreter and engine
//!   resolve names against
//! - `registry`: validated ingest of versioned definitions
//! - `workflows`: the engine proper - the sole mutator of instances
//! - `events`: post-commit lifecycle announcements
//! - `storage`: the repository contract and the in-memory backend

pub mod actions;
pub mod events;
pub mod guards;
pub mod machine;
pub mod registry;
pub mod storage;
pub mod workflows;

pub use actions::{ActionContext, ActionRegistry, OnEnterAction};
pub use events::{
    BroadcastPublisher, EventPublisher, NatsPublisher, WorkflowEvent, WorkflowEventType,
};
pub use guards::GuardRegistry;
pub use machine::{StateMachine, TransitionError};
pub use registry::DefinitionRegistry;
pub use storage::{InMemoryRepository, Repository};
pub use workflows::{
    CallBounds, CreateInstance, EngineConfig, InstanceFilter, Page, WorkflowEngine,
    WorkflowStats,
};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the SLA sweep on a fixed cadence until `shutdown` fires
///
/// The token also bounds each sweep, so shutdown interrupts a sweep that is
/// mid-flight instead of waiting it out.
pub fn spawn_sla_monitor(
    engine: Arc<WorkflowEngine>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup stays quiet
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match engine.sla_sweep(shutdown.child_token()).await {
                Ok(flagged) if !flagged.is_empty() => {
                    info!(count = flagged.len(), "SLA sweep flagged overdue instances");
                }
                Ok(_) => {}
                Err(crate::ConductorError::Cancelled) => break,
                Err(err) => warn!(error = %err, "SLA sweep failed"),
            }
        }
    })
}
