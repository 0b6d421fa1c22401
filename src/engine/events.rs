// Event publisher - fire-and-forget lifecycle announcements

//! # Events
//!
//! The engine announces lifecycle changes through a narrow publisher
//! interface. Emission is fire-and-forget and happens only after the
//! transition commits; delivery guarantees and durability are the
//! publisher's concern, not the engine's. Consumers see events in commit
//! order per instance and in no particular order across instances.
//!
//! Two implementations ship: an in-process broadcast channel (embedding,
//! tests) and a NATS publisher for distributed consumers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::WorkflowInstance;
use crate::Result;

/// Lifecycle event types the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    Started,
    StateChanged,
    Completed,
    Failed,
    Overdue,
    TaskAssigned,
}

impl WorkflowEventType {
    /// Wire name, also used as the NATS subject suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEventType::Started => "workflow.started",
            WorkflowEventType::StateChanged => "workflow.state_changed",
            WorkflowEventType::Completed => "workflow.completed",
            WorkflowEventType::Failed => "workflow.failed",
            WorkflowEventType::Overdue => "workflow.overdue",
            WorkflowEventType::TaskAssigned => "workflow.task.assigned",
        }
    }
}

impl std::fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One emitted lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_type: WorkflowEventType,
    pub instance_id: Uuid,
    pub organization_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(
        event_type: WorkflowEventType,
        instance: &WorkflowInstance,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            instance_id: instance.id,
            organization_id: instance.organization_id.clone(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// Fire-and-forget sink for lifecycle events
///
/// At-least-once from the consumer's perspective; the engine neither retries
/// nor rolls back on publish failure.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: WorkflowEvent) -> Result<()>;
}

/// In-process publisher backed by a tokio broadcast channel
///
/// Subscribers that lag beyond the buffer lose the oldest events, which is
/// consistent with the fire-and-forget contract.
pub struct BroadcastPublisher {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: WorkflowEvent) -> Result<()> {
        debug!(event_type = %event.event_type, instance_id = %event.instance_id, "event published");
        // A send error only means there are no subscribers right now
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// NATS-backed publisher for distributed consumers
///
/// Publishes to `conductor.events.<event_type>`; durability (JetStream,
/// retention) is configured on the NATS side.
pub struct NatsPublisher {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsPublisher {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| crate::ConductorError::Internal(format!("NATS connect failed: {}", e)))?;
        Ok(Self {
            client,
            subject_prefix: "conductor.events".to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: WorkflowEvent) -> Result<()> {
        let subject = format!("{}.{}", self.subject_prefix, event.event_type);
        let payload = serde_json::to_vec(&event)?;
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| crate::ConductorError::Internal(format!("NATS publish failed: {}", e)))?;
        Ok(())
    }
}
