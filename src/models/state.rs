// Workflow states and triggers - the basic building blocks of definitions

//! # States and Triggers
//!
//! A workflow definition is a set of named states connected by triggered
//! transitions. `StateId` and `TriggerId` are thin string wrappers so any
//! domain can pick its own vocabulary ("draft", "submitted", "approve", ...)
//! without the engine knowing anything about it.
//!
//! `StateDefinition` carries the per-state declarations the engine interprets:
//! whether the state is the initial one, whether it is terminal (and with
//! which outcome), and which on-enter hooks run when an instance lands in it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a workflow state ("draft", "submitted", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    pub fn new<S: Into<String>>(name: S) -> Self {
        StateId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        StateId(s.to_string())
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        StateId(s)
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a transition trigger ("submit", "approve", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerId(pub String);

impl TriggerId {
    pub fn new<S: Into<String>>(name: S) -> Self {
        TriggerId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TriggerId {
    fn from(s: &str) -> Self {
        TriggerId(s.to_string())
    }
}

impl From<String> for TriggerId {
    fn from(s: String) -> Self {
        TriggerId(s)
    }
}

impl std::fmt::Display for TriggerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome recorded when an instance reaches a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Success,
    Failure,
}

/// When an on-enter hook runs relative to the transition commit
///
/// Synchronous hooks run inside the transition and abort it on failure.
/// Post-commit hooks run after the instance and history rows are persisted
/// and can never roll the transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Synchronous,
    PostCommit,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Synchronous
    }
}

fn default_mandatory() -> bool {
    true
}

/// A named hook attached to a state, executed when an instance enters it
///
/// The name is resolved through the action registry at definition
/// registration time, so an instance can never reach a state whose hooks
/// don't exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDeclaration {
    pub name: String,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Whether a synchronous hook failure aborts the transition.
    /// Ignored for post-commit hooks, which are always best-effort.
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,

    /// Free-form parameters interpreted by the action implementation
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl ActionDeclaration {
    pub fn new<S: Into<String>>(name: S, execution_mode: ExecutionMode) -> Self {
        Self {
            name: name.into(),
            execution_mode,
            mandatory: true,
            params: HashMap::new(),
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn with_param<S: Into<String>>(mut self, key: S, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// A single state in a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDefinition {
    pub id: StateId,

    /// Exactly one state per definition carries this flag
    #[serde(default)]
    pub initial: bool,

    /// Terminal states accept no outgoing transitions
    #[serde(default)]
    pub terminal: Option<TerminalKind>,

    /// Hooks executed, in declaration order, when an instance enters this state
    #[serde(default)]
    pub on_enter: Vec<ActionDeclaration>,
}

impl StateDefinition {
    pub fn new<S: Into<StateId>>(id: S) -> Self {
        Self {
            id: id.into(),
            initial: false,
            terminal: None,
            on_enter: Vec::new(),
        }
    }

    pub fn initial<S: Into<StateId>>(id: S) -> Self {
        Self {
            initial: true,
            ..Self::new(id)
        }
    }

    pub fn terminal<S: Into<StateId>>(id: S, kind: TerminalKind) -> Self {
        Self {
            terminal: Some(kind),
            ..Self::new(id)
        }
    }

    pub fn with_on_enter(mut self, actions: Vec<ActionDeclaration>) -> Self {
        self.on_enter = actions;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_round_trips_through_strings() {
        let state = StateId::from("draft");
        assert_eq!(state.as_str(), "draft");
        assert_eq!(state, StateId::new("draft"));
        assert_eq!(state.to_string(), "draft");
    }

    #[test]
    fn action_declaration_defaults() {
        let json = r#"{"name": "set_due_at"}"#;
        let action: ActionDeclaration = serde_json::from_str(json).unwrap();
        assert_eq!(action.execution_mode, ExecutionMode::Synchronous);
        assert!(action.mandatory);
        assert!(action.params.is_empty());
    }

    #[test]
    fn terminal_state_constructor() {
        let state = StateDefinition::terminal("approved", TerminalKind::Success);
        assert!(state.is_terminal());
        assert!(!state.initial);
    }
}
