// Guard registry - named pure predicates gating transitions

//! # Guards
//!
//! A guard is a pure predicate over the instance context and the acting
//! caller. Transitions reference guards by name; the registry resolves the
//! name at definition registration time, so evaluation can assume the ref
//! exists. Guards return a boolean verdict - a failing guard is a normal
//! outcome, not an error. Errors are reserved for programmer mistakes
//! (a missing ref slipping past registration).

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{AuthContext, WorkflowContext};

/// Predicate signature: `(context, actor) -> bool`, CPU-only and non-blocking
pub type GuardFn = dyn Fn(&WorkflowContext, &AuthContext) -> bool + Send + Sync;

/// Registry of named guard predicates, injected into the state machine
#[derive(Clone, Default)]
pub struct GuardRegistry {
    guards: HashMap<String, Arc<GuardFn>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self {
            guards: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the guards most definitions want
    pub fn with_common_guards() -> Self {
        let mut registry = Self::new();
        registry.register("always", |_, _| true);
        registry.register("never", |_, _| false);
        registry.register("actor_is_creator", |ctx, auth| {
            ctx.get("created_by")
                .and_then(|v| v.as_str())
                .map(|creator| creator == auth.user_id)
                .unwrap_or(false)
        });
        registry
    }

    pub fn register<S, F>(&mut self, name: S, guard: F)
    where
        S: Into<String>,
        F: Fn(&WorkflowContext, &AuthContext) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(guard));
    }

    /// Guard passing when `field` is present in the context
    pub fn register_field_exists<S: Into<String>, F: Into<String>>(&mut self, name: S, field: F) {
        let field = field.into();
        self.register(name, move |ctx, _| ctx.contains_key(&field));
    }

    /// Guard passing when `field` equals `expected`
    pub fn register_field_equals<S: Into<String>, F: Into<String>>(
        &mut self,
        name: S,
        field: F,
        expected: serde_json::Value,
    ) {
        let field = field.into();
        self.register(name, move |ctx, _| {
            ctx.get(&field).map(|v| v == &expected).unwrap_or(false)
        });
    }

    /// Guard passing when `field` is a number no smaller than `min`
    pub fn register_field_at_least<S: Into<String>, F: Into<String>>(
        &mut self,
        name: S,
        field: F,
        min: f64,
    ) {
        let field = field.into();
        self.register(name, move |ctx, _| {
            ctx.get(&field)
                .and_then(|v| v.as_f64())
                .map(|n| n >= min)
                .unwrap_or(false)
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.guards.contains_key(name)
    }

    /// Evaluate a guard by name. `Err` means the ref does not exist, which
    /// registration is supposed to make impossible.
    pub fn evaluate(
        &self,
        name: &str,
        context: &WorkflowContext,
        auth: &AuthContext,
    ) -> Result<bool, String> {
        match self.guards.get(name) {
            Some(guard) => Ok(guard(context, auth)),
            None => Err(format!("guard '{}' is not registered", name)),
        }
    }
}

impl std::fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.guards.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("GuardRegistry").field("guards", &names).finish()
    }
}
