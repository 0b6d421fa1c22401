// Workflow definitions - complete, versioned state machine specifications

//! # Workflow Definitions
//!
//! A `WorkflowDefinition` is the immutable, versioned template a workflow
//! instance executes: the declared states, the triggered transitions between
//! them, and an optional SLA policy. Definitions are completely
//! domain-agnostic - the engine interprets them as plain data, so any client
//! can model document approvals, order fulfillment, onboarding pipelines and
//! so on without the engine changing.
//!
//! Registered definitions never mutate. An update to a workflow registers a
//! new `(key, version)` pair; in-flight instances keep the version they were
//! created against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::state::{StateDefinition, StateId, TriggerId};
use super::transition::TransitionDefinition;

/// Deadline policy attached to a definition
///
/// `total_duration_seconds` seeds `due_at` on new instances that don't carry
/// an explicit deadline. `per_state_seconds` is advisory metadata for
/// per-state deadline actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub total_duration_seconds: Option<i64>,

    #[serde(default)]
    pub per_state_seconds: HashMap<StateId, i64>,
}

/// A complete, versioned workflow template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Opaque identity of this exact (key, version) pair
    pub id: Uuid,

    /// Stable slug shared by all versions of the same workflow
    pub key: String,

    /// Monotonic version, assigned by the registry
    pub version: u32,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub states: Vec<StateDefinition>,

    pub transitions: Vec<TransitionDefinition>,

    #[serde(default)]
    pub sla: Option<SlaPolicy>,

    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new<K, N>(
        key: K,
        version: u32,
        name: N,
        states: Vec<StateDefinition>,
        transitions: Vec<TransitionDefinition>,
    ) -> Self
    where
        K: Into<String>,
        N: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            version,
            name: name.into(),
            description: String::new(),
            states,
            transitions,
            sla: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_sla(mut self, sla: SlaPolicy) -> Self {
        self.sla = Some(sla);
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// The single state marked `initial`
    ///
    /// Only meaningful on a validated definition; an unvalidated document may
    /// have zero or several.
    pub fn initial_state(&self) -> Option<&StateDefinition> {
        self.states.iter().find(|s| s.initial)
    }

    pub fn state(&self, id: &StateId) -> Option<&StateDefinition> {
        self.states.iter().find(|s| &s.id == id)
    }

    pub fn is_terminal(&self, id: &StateId) -> bool {
        self.state(id).map(|s| s.is_terminal()).unwrap_or(false)
    }

    /// All transitions leaving `from_state`, in declaration order
    pub fn transitions_from(&self, from_state: &StateId) -> Vec<&TransitionDefinition> {
        self.transitions
            .iter()
            .filter(|t| &t.from_state == from_state)
            .collect()
    }

    /// The unique transition for `(from_state, trigger)`, if declared
    pub fn transition_for(
        &self,
        from_state: &StateId,
        trigger: &TriggerId,
    ) -> Option<&TransitionDefinition> {
        self.transitions
            .iter()
            .find(|t| &t.from_state == from_state && &t.trigger == trigger)
    }

    /// Structural validation of the definition document
    ///
    /// Enforced invariants:
    /// - exactly one initial state
    /// - every transition endpoint is a declared state
    /// - terminal states have no outgoing transitions
    /// - `(from_state, trigger)` pairs are unique
    /// - every state is reachable from the initial state
    ///
    /// Guard and action references are resolved separately by the registry,
    /// which owns the registries they resolve against.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("definition key must not be empty".to_string());
        }

        if self.states.is_empty() {
            return Err("definition must declare at least one state".to_string());
        }

        let initial_count = self.states.iter().filter(|s| s.initial).count();
        if initial_count != 1 {
            return Err(format!(
                "definition must declare exactly one initial state, found {}",
                initial_count
            ));
        }

        let mut state_ids = HashSet::new();
        for state in &self.states {
            if !state_ids.insert(&state.id) {
                return Err(format!("duplicate state '{}'", state.id));
            }
        }

        let mut seen_triggers: HashSet<(&StateId, &TriggerId)> = HashSet::new();
        for transition in &self.transitions {
            if !state_ids.contains(&transition.from_state) {
                return Err(format!(
                    "transition '{}' references undeclared from_state '{}'",
                    transition.trigger, transition.from_state
                ));
            }
            if !state_ids.contains(&transition.to_state) {
                return Err(format!(
                    "transition '{}' references undeclared to_state '{}'",
                    transition.trigger, transition.to_state
                ));
            }
            if self.is_terminal(&transition.from_state) {
                return Err(format!(
                    "terminal state '{}' must not have outgoing transitions",
                    transition.from_state
                ));
            }
            if !seen_triggers.insert((&transition.from_state, &transition.trigger)) {
                return Err(format!(
                    "duplicate trigger '{}' from state '{}'",
                    transition.trigger, transition.from_state
                ));
            }
        }

        let unreachable = self.unreachable_states();
        if let Some(state) = unreachable.first() {
            return Err(format!(
                "state '{}' is not reachable from the initial state",
                state
            ));
        }

        Ok(())
    }

    /// States that no walk from the initial state can reach
    pub fn unreachable_states(&self) -> Vec<&StateId> {
        let initial = match self.initial_state() {
            Some(state) => &state.id,
            None => return self.states.iter().map(|s| &s.id).collect(),
        };

        let mut reachable = HashSet::new();
        let mut to_visit = vec![initial];

        while let Some(state) = to_visit.pop() {
            if reachable.insert(state) {
                for transition in self.transitions_from(state) {
                    if !reachable.contains(&transition.to_state) {
                        to_visit.push(&transition.to_state);
                    }
                }
            }
        }

        self.states
            .iter()
            .map(|s| &s.id)
            .filter(|id| !reachable.contains(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::state::TerminalKind;

    fn approval_definition() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "approval",
            1,
            "Approval",
            vec![
                StateDefinition::initial("draft"),
                StateDefinition::new("submitted"),
                StateDefinition::terminal("approved", TerminalKind::Success),
                StateDefinition::terminal("rejected", TerminalKind::Failure),
            ],
            vec![
                TransitionDefinition::new("draft", "submit", "submitted"),
                TransitionDefinition::new("submitted", "approve", "approved"),
                TransitionDefinition::new("submitted", "reject", "rejected"),
            ],
        )
    }

    #[test]
    fn valid_definition_passes() {
        assert!(approval_definition().validate().is_ok());
    }

    #[test]
    fn rejects_missing_initial_state() {
        let mut def = approval_definition();
        def.states[0].initial = false;
        let err = def.validate().unwrap_err();
        assert!(err.contains("exactly one initial state"));
    }

    #[test]
    fn rejects_multiple_initial_states() {
        let mut def = approval_definition();
        def.states[1].initial = true;
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_undeclared_transition_endpoint() {
        let mut def = approval_definition();
        def.transitions
            .push(TransitionDefinition::new("submitted", "escalate", "escalated"));
        let err = def.validate().unwrap_err();
        assert!(err.contains("undeclared to_state"));
    }

    #[test]
    fn rejects_outgoing_transition_from_terminal_state() {
        let mut def = approval_definition();
        def.transitions
            .push(TransitionDefinition::new("approved", "reopen", "draft"));
        let err = def.validate().unwrap_err();
        assert!(err.contains("terminal state"));
    }

    #[test]
    fn rejects_duplicate_trigger_from_same_state() {
        let mut def = approval_definition();
        def.transitions
            .push(TransitionDefinition::new("submitted", "approve", "rejected"));
        let err = def.validate().unwrap_err();
        assert!(err.contains("duplicate trigger"));
    }

    #[test]
    fn rejects_unreachable_state() {
        let mut def = approval_definition();
        def.states.push(StateDefinition::new("orphan"));
        let err = def.validate().unwrap_err();
        assert!(err.contains("not reachable"));
    }

    #[test]
    fn transition_lookup_is_unique_per_trigger() {
        let def = approval_definition();
        let transition = def
            .transition_for(&StateId::from("submitted"), &TriggerId::from("approve"))
            .unwrap();
        assert_eq!(transition.to_state, StateId::from("approved"));

        assert!(def
            .transition_for(&StateId::from("draft"), &TriggerId::from("approve"))
            .is_none());
    }
}
