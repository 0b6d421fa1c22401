// Workflow instances and their append-only history

//! # Instance Models
//!
//! A `WorkflowInstance` is one running occurrence of a definition: it carries
//! the current state, a schemaless context bag of business data, ownership
//! and assignment, deadline tracking and an optimistic-lock revision. Every
//! state change appends a `HistoryEntry`, so the full walk of an instance
//! through its definition's graph can always be reconstructed.
//!
//! Status is derived, never stored as an independent source of truth: the
//! terminal outcome is stamped when a terminal state is entered, and
//! "overdue" is a function of `due_at` and the clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::definition::WorkflowDefinition;
use super::state::{StateId, TerminalKind, TriggerId};

/// Schemaless key/value bag carrying the business data of an instance
pub type WorkflowContext = HashMap<String, serde_json::Value>;

/// Priority of an instance, used for list filtering and ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Derived lifecycle status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Completed,
    Failed,
    Overdue,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Active => write!(f, "active"),
            InstanceStatus::Completed => write!(f, "completed"),
            InstanceStatus::Failed => write!(f, "failed"),
            InstanceStatus::Overdue => write!(f, "overdue"),
        }
    }
}

/// One running occurrence of a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,

    /// Identity of the exact definition version this instance executes.
    /// The binding never changes after creation.
    pub definition_id: Uuid,
    pub definition_key: String,
    pub definition_version: u32,

    /// Owning organization; instances are never visible across organizations
    pub organization_id: String,

    pub created_by: String,

    #[serde(default)]
    pub assigned_to: Option<String>,

    pub current_state: StateId,

    #[serde(default)]
    pub context: WorkflowContext,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set exactly once, when a terminal state is entered
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Outcome of the terminal state, stamped together with `completed_at`
    #[serde(default)]
    pub outcome: Option<TerminalKind>,

    /// Sidecar flag ensuring `workflow.overdue` fires at most once
    #[serde(default)]
    pub overdue_notified: bool,

    /// Optimistic-lock revision, bumped by every persisted update
    #[serde(default)]
    pub revision: u64,
}

impl WorkflowInstance {
    /// Create a fresh instance bound to `definition`, sitting in its initial
    /// state. Panics never: callers pass validated definitions only.
    pub fn new(
        definition: &WorkflowDefinition,
        initial_state: StateId,
        organization_id: String,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            definition_id: definition.id,
            definition_key: definition.key.clone(),
            definition_version: definition.version,
            organization_id,
            created_by,
            assigned_to: None,
            current_state: initial_state,
            context: WorkflowContext::new(),
            priority: Priority::default(),
            due_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            outcome: None,
            overdue_notified: false,
            revision: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.due_at.map(|due| due < now).unwrap_or(false)
    }

    /// Derive the lifecycle status at `now`
    pub fn status(&self, now: DateTime<Utc>) -> InstanceStatus {
        match self.outcome {
            Some(TerminalKind::Success) => InstanceStatus::Completed,
            Some(TerminalKind::Failure) => InstanceStatus::Failed,
            None if self.is_overdue(now) => InstanceStatus::Overdue,
            None => InstanceStatus::Active,
        }
    }

    /// Merge a context patch; later keys win over existing ones
    pub fn merge_context(&mut self, patch: &WorkflowContext) {
        for (key, value) in patch {
            self.context.insert(key.clone(), value.clone());
        }
    }
}

/// Append-only record of one state change
///
/// The seed record written at creation has `from_state = None` and
/// `trigger = None`; every later record names the fired transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub instance_id: Uuid,

    #[serde(default)]
    pub from_state: Option<StateId>,

    pub to_state: StateId,

    #[serde(default)]
    pub trigger: Option<TriggerId>,

    pub actor_id: String,

    pub at: DateTime<Utc>,

    #[serde(default)]
    pub notes: Option<String>,

    /// The context patch applied by this transition, if any
    #[serde(default)]
    pub context_delta: Option<serde_json::Value>,
}

impl HistoryEntry {
    /// The seed record for a freshly created instance
    pub fn seed(instance: &WorkflowInstance, actor_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: instance.id,
            from_state: None,
            to_state: instance.current_state.clone(),
            trigger: None,
            actor_id,
            at: instance.created_at,
            notes: None,
            context_delta: None,
        }
    }

    pub fn transition(
        instance_id: Uuid,
        from_state: StateId,
        to_state: StateId,
        trigger: TriggerId,
        actor_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            from_state: Some(from_state),
            to_state,
            trigger: Some(trigger),
            actor_id,
            at: Utc::now(),
            notes: None,
            context_delta: None,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_context_delta(mut self, delta: Option<serde_json::Value>) -> Self {
        self.context_delta = delta;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::definition::WorkflowDefinition;
    use crate::models::state::StateDefinition;
    use crate::models::transition::TransitionDefinition;
    use chrono::Duration;

    fn instance() -> WorkflowInstance {
        let def = WorkflowDefinition::new(
            "approval",
            1,
            "Approval",
            vec![
                StateDefinition::initial("draft"),
                StateDefinition::terminal("approved", TerminalKind::Success),
            ],
            vec![TransitionDefinition::new("draft", "approve", "approved")],
        );
        WorkflowInstance::new(
            &def,
            StateId::from("draft"),
            "org-1".to_string(),
            "user-1".to_string(),
        )
    }

    #[test]
    fn fresh_instance_is_active() {
        let instance = instance();
        assert_eq!(instance.status(Utc::now()), InstanceStatus::Active);
        assert!(!instance.is_terminal());
        assert_eq!(instance.revision, 0);
    }

    #[test]
    fn overdue_is_derived_from_due_at() {
        let mut instance = instance();
        let now = Utc::now();
        instance.due_at = Some(now - Duration::seconds(5));
        assert_eq!(instance.status(now), InstanceStatus::Overdue);

        // A terminal instance is never overdue
        instance.outcome = Some(TerminalKind::Success);
        instance.completed_at = Some(now);
        assert_eq!(instance.status(now), InstanceStatus::Completed);
    }

    #[test]
    fn context_merge_overwrites_existing_keys() {
        let mut instance = instance();
        instance
            .context
            .insert("amount".to_string(), serde_json::json!(10));

        let mut patch = WorkflowContext::new();
        patch.insert("amount".to_string(), serde_json::json!(25));
        patch.insert("note".to_string(), serde_json::json!("rush"));
        instance.merge_context(&patch);

        assert_eq!(instance.context["amount"], serde_json::json!(25));
        assert_eq!(instance.context["note"], serde_json::json!("rush"));
    }

    #[test]
    fn seed_history_entry_has_no_source_state() {
        let instance = instance();
        let seed = HistoryEntry::seed(&instance, instance.created_by.clone());
        assert!(seed.from_state.is_none());
        assert!(seed.trigger.is_none());
        assert_eq!(seed.to_state, instance.current_state);
    }
}
