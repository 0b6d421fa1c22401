// Dynamic state machine - interprets workflow definitions as plain data

//! # State Machine
//!
//! The state machine is a stateless interpreter over a `WorkflowDefinition`.
//! Given a current state it answers three questions: which transitions are
//! currently valid for an actor, what happens when a trigger fires, and how
//! far along the instance is. All computation here is CPU-only; the engine
//! wraps it with persistence and locking.
//!
//! There is no code generation and no per-definition type: one interpreter
//! serves every definition in the catalog.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use crate::models::{
    AuthContext, StateId, TransitionDefinition, TriggerId, WorkflowContext, WorkflowDefinition,
};

use super::guards::GuardRegistry;

/// Why a proposed transition was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("state '{state}' is terminal; no transitions can fire")]
    TerminalState { state: String },

    #[error("no transition for trigger '{trigger}' from state '{state}'")]
    UnknownTrigger { state: String, trigger: String },

    #[error("actor lacks a role required by trigger '{trigger}'")]
    Forbidden { trigger: String },

    #[error("guard '{guard}' rejected the transition")]
    GuardFailed { guard: String },
}

impl From<TransitionError> for crate::ConductorError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::TerminalState { state } => crate::ConductorError::AlreadyCompleted {
                instance_id: state,
            },
            TransitionError::UnknownTrigger { state, trigger } => {
                crate::ConductorError::UnknownTrigger { state, trigger }
            }
            TransitionError::Forbidden { trigger } => {
                crate::ConductorError::Forbidden(format!("trigger '{}' requires a role", trigger))
            }
            TransitionError::GuardFailed { guard } => crate::ConductorError::GuardFailed { guard },
        }
    }
}

/// Stateless interpreter evaluating transitions against a definition
#[derive(Clone)]
pub struct StateMachine {
    guards: Arc<GuardRegistry>,
}

impl StateMachine {
    pub fn new(guards: Arc<GuardRegistry>) -> Self {
        Self { guards }
    }

    pub fn is_terminal(&self, definition: &WorkflowDefinition, state: &StateId) -> bool {
        definition.is_terminal(state)
    }

    /// Transitions an actor can currently fire, in declaration order
    ///
    /// A transition qualifies when its source matches, its role requirement
    /// intersects the actor's roles, and its guard (if any) passes against
    /// the context.
    pub fn valid_transitions<'d>(
        &self,
        definition: &'d WorkflowDefinition,
        current_state: &StateId,
        context: &WorkflowContext,
        auth: &AuthContext,
    ) -> Vec<&'d TransitionDefinition> {
        if definition.is_terminal(current_state) {
            return Vec::new();
        }

        definition
            .transitions_from(current_state)
            .into_iter()
            .filter(|t| t.allows_roles(&auth.roles))
            .filter(|t| match &t.guard {
                None => true,
                Some(guard) => match self.guards.evaluate(guard, context, auth) {
                    Ok(verdict) => verdict,
                    Err(message) => {
                        // Registration validates refs, so this is a wiring bug
                        error!(guard = %guard, %message, "guard resolution failed");
                        false
                    }
                },
            })
            .collect()
    }

    /// Resolve and authorize the transition for `(current_state, trigger)`
    ///
    /// Checks run in a fixed order: terminal state, trigger resolution, role
    /// requirement, guard. The first failing check names the rejection.
    pub fn fire<'d>(
        &self,
        definition: &'d WorkflowDefinition,
        current_state: &StateId,
        trigger: &TriggerId,
        context: &WorkflowContext,
        auth: &AuthContext,
    ) -> Result<&'d TransitionDefinition, TransitionError> {
        if definition.is_terminal(current_state) {
            return Err(TransitionError::TerminalState {
                state: current_state.to_string(),
            });
        }

        let transition = definition
            .transition_for(current_state, trigger)
            .ok_or_else(|| TransitionError::UnknownTrigger {
                state: current_state.to_string(),
                trigger: trigger.to_string(),
            })?;

        if !transition.allows_roles(&auth.roles) {
            return Err(TransitionError::Forbidden {
                trigger: trigger.to_string(),
            });
        }

        if let Some(guard) = &transition.guard {
            let verdict = self
                .guards
                .evaluate(guard, context, auth)
                .map_err(|message| {
                    error!(guard = %guard, %message, "guard resolution failed");
                    TransitionError::GuardFailed {
                        guard: guard.clone(),
                    }
                })?;
            if !verdict {
                return Err(TransitionError::GuardFailed {
                    guard: guard.clone(),
                });
            }
        }

        Ok(transition)
    }

    /// Progress percentage of `current_state` on the shortest initial-to-
    /// terminal walk passing through it
    ///
    /// Computed as `d(initial, current) / (d(initial, current) + d(current,
    /// nearest terminal))` over BFS distances. Linear definitions reduce to
    /// the state's index; terminal states report 100. A state with no path
    /// to any terminal reports 0 - registration keeps such states out of
    /// well-formed definitions, but cyclic drafts can produce them.
    pub fn progress(&self, definition: &WorkflowDefinition, current_state: &StateId) -> u8 {
        if definition.is_terminal(current_state) {
            return 100;
        }

        let initial = match definition.initial_state() {
            Some(state) => &state.id,
            None => return 0,
        };

        let from_initial = bfs_distances(definition, initial);
        let done = match from_initial.get(current_state) {
            Some(d) => *d,
            None => return 0,
        };

        let from_current = bfs_distances(definition, current_state);
        let remaining = definition
            .states
            .iter()
            .filter(|s| s.is_terminal())
            .filter_map(|s| from_current.get(&s.id))
            .min()
            .copied();

        match remaining {
            Some(remaining) => {
                let total = done + remaining;
                if total == 0 {
                    0
                } else {
                    ((done * 100) / total) as u8
                }
            }
            None => 0,
        }
    }
}

/// BFS over the transition graph from `start`, returning hop counts
fn bfs_distances(definition: &WorkflowDefinition, start: &StateId) -> HashMap<StateId, usize> {
    let mut distances = HashMap::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();

    distances.insert(start.clone(), 0);
    visited.insert(start.clone());
    queue.push_back(start.clone());

    while let Some(state) = queue.pop_front() {
        let next_distance = distances[&state] + 1;
        for transition in definition.transitions_from(&state) {
            if visited.insert(transition.to_state.clone()) {
                distances.insert(transition.to_state.clone(), next_distance);
                queue.push_back(transition.to_state.clone());
            }
        }
    }

    distances
}
