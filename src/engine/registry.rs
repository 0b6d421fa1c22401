// Definition registry - versioned catalog of workflow templates

//! # Definition Registry
//!
//! The registry is the only ingest path for workflow definitions. It runs
//! the structural validation of the model layer, then resolves every guard
//! and action reference against the injected registries, so nothing
//! unresolvable can ever reach the interpreter. Registered definitions are
//! immutable; an update registers the next version of the same key.

use std::sync::Arc;

use tracing::info;

use crate::models::WorkflowDefinition;
use crate::{ConductorError, Result};

use super::actions::ActionRegistry;
use super::guards::GuardRegistry;
use super::storage::Repository;

pub struct DefinitionRegistry {
    repository: Arc<dyn Repository>,
    guards: Arc<GuardRegistry>,
    actions: Arc<ActionRegistry>,
}

impl DefinitionRegistry {
    pub fn new(
        repository: Arc<dyn Repository>,
        guards: Arc<GuardRegistry>,
        actions: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            repository,
            guards,
            actions,
        }
    }

    /// Validate and store a definition
    ///
    /// A submitted version of 0 means "next version for this key"; an
    /// explicit version must not collide with an existing one. Structural
    /// problems and unresolvable guard/action refs are `Validation` errors.
    pub async fn register(&self, mut definition: WorkflowDefinition) -> Result<WorkflowDefinition> {
        definition.validate().map_err(ConductorError::Validation)?;
        self.check_references(&definition)?;

        if definition.version == 0 {
            let latest = self.repository.latest_version(&definition.key).await?;
            definition.version = latest.map(|v| v + 1).unwrap_or(1);
        }

        let stored = self.repository.insert_definition(definition).await?;
        info!(
            key = %stored.key,
            version = stored.version,
            states = stored.states.len(),
            transitions = stored.transitions.len(),
            "workflow definition registered"
        );
        Ok(stored)
    }

    /// Fetch a definition; latest version when `version` is omitted
    pub async fn get(&self, key: &str, version: Option<u32>) -> Result<WorkflowDefinition> {
        self.repository
            .get_definition(key, version)
            .await?
            .ok_or_else(|| match version {
                Some(v) => ConductorError::NotFound(format!("definition '{}' version {}", key, v)),
                None => ConductorError::NotFound(format!("definition '{}'", key)),
            })
    }

    pub async fn list(&self) -> Result<Vec<WorkflowDefinition>> {
        self.repository.list_definitions().await
    }

    fn check_references(&self, definition: &WorkflowDefinition) -> Result<()> {
        for transition in &definition.transitions {
            if let Some(guard) = &transition.guard {
                if !self.guards.contains(guard) {
                    return Err(ConductorError::Validation(format!(
                        "transition '{}' references unknown guard '{}'",
                        transition.trigger, guard
                    )));
                }
            }
        }
        for state in &definition.states {
            for action in &state.on_enter {
                if !self.actions.contains(&action.name) {
                    return Err(ConductorError::Validation(format!(
                        "state '{}' references unknown action '{}'",
                        state.id, action.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::BroadcastPublisher;
    use crate::engine::storage::InMemoryRepository;
    use crate::models::{
        ActionDeclaration, ExecutionMode, StateDefinition, TerminalKind, TransitionDefinition,
    };

    fn registry() -> DefinitionRegistry {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let mut guards = GuardRegistry::with_common_guards();
        guards.register_field_at_least("amount_ok", "amount", 100.0);
        let actions = ActionRegistry::with_builtins(
            Arc::new(BroadcastPublisher::new()),
            repository.clone(),
            None,
        );
        DefinitionRegistry::new(repository, Arc::new(guards), Arc::new(actions))
    }

    fn approval() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "approval",
            0,
            "Approval",
            vec![
                StateDefinition::initial("draft"),
                StateDefinition::new("submitted"),
                StateDefinition::terminal("approved", TerminalKind::Success),
            ],
            vec![
                TransitionDefinition::new("draft", "submit", "submitted"),
                TransitionDefinition::new("submitted", "approve", "approved")
                    .with_guard("amount_ok"),
            ],
        )
    }

    #[tokio::test]
    async fn register_assigns_monotonic_versions() {
        let registry = registry();
        let v1 = registry.register(approval()).await.unwrap();
        assert_eq!(v1.version, 1);
        let v2 = registry.register(approval()).await.unwrap();
        assert_eq!(v2.version, 2);

        let latest = registry.get("approval", None).await.unwrap();
        assert_eq!(latest.version, 2);
        let pinned = registry.get("approval", Some(1)).await.unwrap();
        assert_eq!(pinned.version, 1);
    }

    #[tokio::test]
    async fn register_round_trips_the_document() {
        let registry = registry();
        let submitted = approval();
        let stored = registry.register(submitted.clone()).await.unwrap();
        let fetched = registry.get(&stored.key, Some(stored.version)).await.unwrap();
        assert_eq!(fetched.id, stored.id);
        assert_eq!(fetched.transitions.len(), submitted.transitions.len());
    }

    #[tokio::test]
    async fn unknown_guard_ref_fails_registration() {
        let registry = registry();
        let mut def = approval();
        def.transitions[1].guard = Some("no_such_guard".to_string());
        let err = registry.register(def).await.unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_action_ref_fails_registration() {
        let registry = registry();
        let mut def = approval();
        def.states[1].on_enter.push(ActionDeclaration::new(
            "run_ai_insight", // not registered while AI is disabled
            ExecutionMode::PostCommit,
        ));
        let err = registry.register(def).await.unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[tokio::test]
    async fn structural_validation_is_enforced_at_ingest() {
        let registry = registry();
        let mut def = approval();
        def.states[0].initial = false;
        let err = registry.register(def).await.unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_definition_is_not_found() {
        let registry = registry();
        let err = registry.get("ghost", None).await.unwrap_err();
        assert!(matches!(err, ConductorError::NotFound(_)));
    }
}
