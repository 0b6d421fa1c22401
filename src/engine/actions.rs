// On-enter action registry - named hooks executed when a state is entered

//! # Actions
//!
//! States declare on-enter hooks by name; the registry resolves the name to
//! an implementation. The declaration's `execution_mode` decides when the
//! engine runs the hook:
//!
//! - `Synchronous` hooks run inside `advance`, before the transition
//!   commits. A failing mandatory hook aborts the transition with
//!   `ActionFailed`; a best-effort one only logs.
//! - `PostCommit` hooks run after the instance and history rows are
//!   persisted. They can never roll the transition back, so external side
//!   effects (notifications, AI enrichment) belong here unless the workflow
//!   genuinely requires them to gate the transition.
//!
//! Action refs are resolved at definition registration time, exactly like
//! guard refs.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ai::{AIProviderManager, AIRequest, RoutingStrategy, SelectionCriteria, TaskType};
use crate::models::{
    ActionDeclaration, AIInsight, AuthContext, WorkflowDefinition, WorkflowInstance,
};

use super::events::{EventPublisher, WorkflowEvent, WorkflowEventType};
use super::storage::Repository;

/// Everything a hook may inspect or adjust
///
/// Synchronous hooks receive the working copy of the instance and may mutate
/// it (the mutation commits with the transition). Post-commit hooks receive
/// a throwaway copy; their effects must go through external channels.
pub struct ActionContext<'a> {
    pub instance: &'a mut WorkflowInstance,
    pub definition: &'a WorkflowDefinition,
    pub declaration: &'a ActionDeclaration,
    pub auth: &'a AuthContext,
}

/// A named on-enter hook
#[async_trait]
pub trait OnEnterAction: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> anyhow::Result<()>;
}

/// Registry of named actions, injected into the engine
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn OnEnterAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in hooks
    ///
    /// `run_ai_insight` is only available when a router is configured, so
    /// definitions referencing it fail registration on AI-disabled
    /// deployments instead of failing at transition time.
    pub fn with_builtins(
        publisher: Arc<dyn EventPublisher>,
        repository: Arc<dyn Repository>,
        router: Option<Arc<AIProviderManager>>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SetDueAt));
        registry.register(Arc::new(EmitNotification { publisher }));
        if let Some(router) = router {
            registry.register(Arc::new(RunAiInsight { router, repository }));
        }
        registry
    }

    pub fn register(&mut self, action: Arc<dyn OnEnterAction>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OnEnterAction>> {
        self.actions.get(name).cloned()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("ActionRegistry")
            .field("actions", &names)
            .finish()
    }
}

/// `set_due_at`: stamp or move the instance deadline
///
/// Synchronous by nature - the new deadline must commit with the transition.
/// The offset comes from the `seconds` param, falling back to the
/// definition's per-state SLA entry for the state being entered.
pub struct SetDueAt;

#[async_trait]
impl OnEnterAction for SetDueAt {
    fn name(&self) -> &str {
        "set_due_at"
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> anyhow::Result<()> {
        let from_params = ctx
            .declaration
            .params
            .get("seconds")
            .and_then(|v| v.as_i64());

        let from_sla = ctx
            .definition
            .sla
            .as_ref()
            .and_then(|sla| sla.per_state_seconds.get(&ctx.instance.current_state))
            .copied();

        let seconds = from_params.or(from_sla).ok_or_else(|| {
            anyhow::anyhow!(
                "set_due_at needs a 'seconds' param or a per-state SLA entry for '{}'",
                ctx.instance.current_state
            )
        })?;

        ctx.instance.due_at = Some(Utc::now() + Duration::seconds(seconds));
        debug!(
            instance_id = %ctx.instance.id,
            state = %ctx.instance.current_state,
            seconds,
            "deadline set by on-enter action"
        );
        Ok(())
    }
}

/// `emit_notification`: announce the state entry to external channels
///
/// Post-commit by nature; delivery is the event consumer's concern. The
/// params travel verbatim in the event payload alongside the assignee.
pub struct EmitNotification {
    pub publisher: Arc<dyn EventPublisher>,
}

#[async_trait]
impl OnEnterAction for EmitNotification {
    fn name(&self) -> &str {
        "emit_notification"
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "state": ctx.instance.current_state,
            "recipient": ctx.instance.assigned_to,
            "params": ctx.declaration.params,
        });
        let event = WorkflowEvent::new(WorkflowEventType::TaskAssigned, ctx.instance, payload);
        self.publisher
            .publish(event)
            .await
            .map_err(|e| anyhow::anyhow!("notification publish failed: {}", e))?;
        Ok(())
    }
}

/// `run_ai_insight`: enrich the instance with an AI-produced insight
///
/// Routes a request built from the instance context and persists the result
/// as an insight attached to the instance. Params: `task` (default
/// `summarize`), `strategy` (router default when absent), `content_key`
/// (context field to send; the whole context otherwise).
pub struct RunAiInsight {
    pub router: Arc<AIProviderManager>,
    pub repository: Arc<dyn Repository>,
}

#[async_trait]
impl OnEnterAction for RunAiInsight {
    fn name(&self) -> &str {
        "run_ai_insight"
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> anyhow::Result<()> {
        let task_type = ctx
            .declaration
            .params
            .get("task")
            .and_then(|v| v.as_str())
            .map(|s| s.parse::<TaskType>())
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?
            .unwrap_or(TaskType::Summarize);

        let strategy = ctx
            .declaration
            .params
            .get("strategy")
            .and_then(|v| v.as_str())
            .map(|s| s.parse::<RoutingStrategy>())
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?;

        let content = match ctx
            .declaration
            .params
            .get("content_key")
            .and_then(|v| v.as_str())
        {
            Some(key) => ctx
                .instance
                .context
                .get(key)
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .ok_or_else(|| anyhow::anyhow!("context field '{}' is missing", key))?,
            None => serde_json::to_string(&ctx.instance.context)?,
        };

        let request = AIRequest::new(task_type, content);
        let criteria = SelectionCriteria {
            task_type,
            strategy: strategy.unwrap_or(self.router.default_strategy()),
            max_cost: ctx
                .declaration
                .params
                .get("max_cost")
                .and_then(|v| v.as_f64()),
            min_quality: None,
            prefer_provider: None,
        };

        let response = self.router.route(&request, &criteria, None).await?;

        let insight = AIInsight::new(
            Some(ctx.instance.id),
            task_type.into(),
            response.content.clone(),
            if response.finish_reason == "stop" { 0.9 } else { 0.6 },
            response.model_used.clone(),
            response.provider_used.clone(),
        );
        self.repository
            .add_insight(insight)
            .await
            .map_err(|e| anyhow::anyhow!("insight persist failed: {}", e))?;

        debug!(
            instance_id = %ctx.instance.id,
            task = %task_type,
            provider = %response.provider_used,
            "insight attached by on-enter action"
        );
        Ok(())
    }
}

/// Log-and-continue helper for best-effort hook failures
pub(crate) fn warn_best_effort(action: &str, err: &anyhow::Error) {
    warn!(action, error = %err, "best-effort on-enter action failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::BroadcastPublisher;
    use crate::models::{
        ExecutionMode, SlaPolicy, StateDefinition, StateId, TransitionDefinition,
    };

    fn definition_with_sla() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "approval",
            1,
            "Approval",
            vec![
                StateDefinition::initial("draft"),
                StateDefinition::new("submitted"),
            ],
            vec![TransitionDefinition::new("draft", "submit", "submitted")],
        )
        .with_sla(SlaPolicy {
            total_duration_seconds: Some(172_800),
            per_state_seconds: [(StateId::from("submitted"), 3_600)].into_iter().collect(),
        })
    }

    fn instance_in(def: &WorkflowDefinition, state: &str) -> WorkflowInstance {
        let mut instance = WorkflowInstance::new(
            def,
            StateId::from(state),
            "org-1".to_string(),
            "user-1".to_string(),
        );
        instance.current_state = StateId::from(state);
        instance
    }

    #[tokio::test]
    async fn set_due_at_prefers_explicit_seconds() {
        let def = definition_with_sla();
        let mut instance = instance_in(&def, "submitted");
        let declaration = ActionDeclaration::new("set_due_at", ExecutionMode::Synchronous)
            .with_param("seconds", serde_json::json!(60));
        let auth = AuthContext::new("user-1", "org-1");

        let before = Utc::now();
        SetDueAt
            .execute(&mut ActionContext {
                instance: &mut instance,
                definition: &def,
                declaration: &declaration,
                auth: &auth,
            })
            .await
            .unwrap();

        let due = instance.due_at.unwrap();
        let offset = (due - before).num_seconds();
        assert!((59..=61).contains(&offset), "offset was {}", offset);
    }

    #[tokio::test]
    async fn set_due_at_falls_back_to_per_state_sla() {
        let def = definition_with_sla();
        let mut instance = instance_in(&def, "submitted");
        let declaration = ActionDeclaration::new("set_due_at", ExecutionMode::Synchronous);
        let auth = AuthContext::new("user-1", "org-1");

        SetDueAt
            .execute(&mut ActionContext {
                instance: &mut instance,
                definition: &def,
                declaration: &declaration,
                auth: &auth,
            })
            .await
            .unwrap();

        let offset = (instance.due_at.unwrap() - Utc::now()).num_seconds();
        assert!((3_590..=3_600).contains(&offset), "offset was {}", offset);
    }

    #[tokio::test]
    async fn set_due_at_without_any_source_fails() {
        let def = definition_with_sla();
        let mut instance = instance_in(&def, "draft"); // no per-state entry
        let declaration = ActionDeclaration::new("set_due_at", ExecutionMode::Synchronous);
        let auth = AuthContext::new("user-1", "org-1");

        let result = SetDueAt
            .execute(&mut ActionContext {
                instance: &mut instance,
                definition: &def,
                declaration: &declaration,
                auth: &auth,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn emit_notification_publishes_task_assigned() {
        let publisher = Arc::new(BroadcastPublisher::new());
        let mut receiver = publisher.subscribe();

        let def = definition_with_sla();
        let mut instance = instance_in(&def, "submitted");
        instance.assigned_to = Some("reviewer-1".to_string());
        let declaration = ActionDeclaration::new("emit_notification", ExecutionMode::PostCommit)
            .with_param("channel", serde_json::json!("email"));
        let auth = AuthContext::new("user-1", "org-1");

        EmitNotification {
            publisher: publisher.clone(),
        }
        .execute(&mut ActionContext {
            instance: &mut instance,
            definition: &def,
            declaration: &declaration,
            auth: &auth,
        })
        .await
        .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, WorkflowEventType::TaskAssigned);
        assert_eq!(event.payload["recipient"], serde_json::json!("reviewer-1"));
        assert_eq!(event.payload["params"]["channel"], serde_json::json!("email"));
    }

    #[test]
    fn builtins_cover_the_declared_names() {
        let publisher: Arc<dyn EventPublisher> = Arc::new(BroadcastPublisher::new());
        let repository: Arc<dyn Repository> =
            Arc::new(crate::engine::storage::InMemoryRepository::new());
        let registry = ActionRegistry::with_builtins(publisher, repository, None);

        assert!(registry.contains("set_due_at"));
        assert!(registry.contains("emit_notification"));
        // AI disabled -> the AI hook is deliberately absent
        assert!(!registry.contains("run_ai_insight"));
    }
}
