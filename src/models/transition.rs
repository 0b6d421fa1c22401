// Transition definitions - the labeled edges of the state graph

//! # Transitions
//!
//! A `TransitionDefinition` is one edge of the workflow graph: it names the
//! source and destination states, the trigger that fires it, an optional
//! guard reference resolved through the guard registry, and the roles an
//! actor must hold to fire it.
//!
//! The pair `(from_state, trigger)` is unique within a definition, so a
//! trigger fired from a given state always resolves to exactly one edge.

use serde::{Deserialize, Serialize};

use super::state::{StateId, TriggerId};

/// A labeled edge between two states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub from_state: StateId,
    pub to_state: StateId,
    pub trigger: TriggerId,

    /// Name of a guard predicate in the guard registry. `None` means the
    /// transition is unguarded.
    #[serde(default)]
    pub guard: Option<String>,

    /// Roles allowed to fire this transition. Empty means any actor.
    #[serde(default)]
    pub required_roles: Vec<String>,
}

impl TransitionDefinition {
    pub fn new<F, T, G>(from_state: F, trigger: G, to_state: T) -> Self
    where
        F: Into<StateId>,
        T: Into<StateId>,
        G: Into<TriggerId>,
    {
        Self {
            from_state: from_state.into(),
            to_state: to_state.into(),
            trigger: trigger.into(),
            guard: None,
            required_roles: Vec::new(),
        }
    }

    pub fn with_guard<S: Into<String>>(mut self, guard: S) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn with_required_roles(mut self, roles: Vec<String>) -> Self {
        self.required_roles = roles;
        self
    }

    /// Whether an actor holding `roles` passes the role check
    pub fn allows_roles(&self, roles: &[String]) -> bool {
        self.required_roles.is_empty() || self.required_roles.iter().any(|r| roles.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_transition_allows_anyone() {
        let transition = TransitionDefinition::new("draft", "submit", "submitted");
        assert!(transition.allows_roles(&[]));
        assert!(transition.allows_roles(&["employee".to_string()]));
    }

    #[test]
    fn role_restricted_transition_requires_intersection() {
        let transition = TransitionDefinition::new("submitted", "approve", "approved")
            .with_required_roles(vec!["manager".to_string(), "director".to_string()]);

        assert!(!transition.allows_roles(&["employee".to_string()]));
        assert!(transition.allows_roles(&["manager".to_string()]));
        assert!(transition.allows_roles(&["employee".to_string(), "director".to_string()]));
    }
}
