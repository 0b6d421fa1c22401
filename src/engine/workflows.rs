// Workflow engine - the sole mutator of workflow instances

//! # Workflow Engine
//!
//! Every instance mutation goes through this component: creation, advancing
//! through transitions, SLA sweeps and admin deletion. The engine composes
//! the state machine (validity), the action registry (on-enter hooks), the
//! repository (atomic persistence) and the event publisher (post-commit
//! announcements).
//!
//! ## Concurrency contract
//!
//! Transitions on one instance are strictly serialized. In-process callers
//! serialize on a keyed async mutex; the repository's optimistic revision
//! check covers writers in other processes. A conflicting write is retried
//! a bounded number of times with jittered backoff before surfacing
//! `Conflict`. Readers always observe either the pre- or post-transition
//! instance - the repository commits instance and history atomically.
//!
//! Events are emitted after commit, never on failure paths, so consumers
//! never see phantom lifecycle events.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    AuthContext, ExecutionMode, HistoryEntry, InstanceStatus, Priority, StateDefinition,
    StateId, TriggerId, WorkflowContext, WorkflowDefinition, WorkflowInstance,
};
use crate::{ConductorError, Result};

use super::actions::{warn_best_effort, ActionContext, ActionRegistry};
use super::events::{EventPublisher, WorkflowEvent, WorkflowEventType};
use super::machine::{StateMachine, TransitionError};
use super::storage::Repository;

/// Engine tuning knobs, sourced from the environment in production
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Applied when the caller supplies no deadline
    pub default_timeout: Duration,
    /// Bounded optimistic-conflict retries inside `advance`
    pub max_transition_retries: u32,
    /// How long a create idempotency key stays effective
    pub idempotency_window: chrono::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(15),
            max_transition_retries: 3,
            idempotency_window: chrono::Duration::hours(24),
        }
    }
}

/// Deadline and cancellation bounds for one engine operation
///
/// Every public operation accepts these. A missing deadline falls back to
/// the engine default; a missing token means the operation cannot be
/// cancelled from outside. Cancellation aborts the operation mid-flight
/// (including optimistic retries and any in-flight repository or provider
/// call) and surfaces as `Cancelled`.
///
/// `None` and a bare [`CancellationToken`] both convert, so callers without
/// special bounds just pass `None`.
#[derive(Debug, Clone, Default)]
pub struct CallBounds {
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl CallBounds {
    pub fn deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn cancel(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel: Some(token),
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl From<Option<Duration>> for CallBounds {
    fn from(deadline: Option<Duration>) -> Self {
        Self {
            deadline,
            cancel: None,
        }
    }
}

impl From<CancellationToken> for CallBounds {
    fn from(token: CancellationToken) -> Self {
        Self::cancel(token)
    }
}

/// Parameters for creating an instance
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateInstance {
    pub definition_key: String,
    pub version: Option<u32>,

    #[serde(default)]
    pub context: WorkflowContext,

    pub due_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<String>,
    pub priority: Option<Priority>,
}

/// Listing filters for `list_for_user`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceFilter {
    pub status: Option<InstanceStatus>,
    pub priority: Option<Priority>,
    pub overdue: Option<bool>,
}

/// 1-based pagination window
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl Page {
    fn clamp(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, 100),
        }
    }
}

/// Aggregate numbers for an organization's instances
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStats {
    pub total: u64,
    pub counts_by_status: HashMap<InstanceStatus, u64>,
    pub avg_completion_seconds: Option<f64>,
    pub overdue_count: u64,
}

pub struct WorkflowEngine {
    repository: Arc<dyn Repository>,
    machine: StateMachine,
    actions: Arc<ActionRegistry>,
    events: Arc<dyn EventPublisher>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        machine: StateMachine,
        actions: Arc<ActionRegistry>,
        events: Arc<dyn EventPublisher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            machine,
            actions,
            events,
            locks: DashMap::new(),
            config,
        }
    }

    /// Create a new instance in its definition's initial state
    ///
    /// The definition resolves to the latest version unless pinned. When the
    /// auth context carries an idempotency key, a duplicate create inside
    /// the idempotency window returns the prior instance and emits nothing.
    pub async fn create(
        &self,
        auth: &AuthContext,
        request: CreateInstance,
        bounds: impl Into<CallBounds>,
    ) -> Result<WorkflowInstance> {
        self.with_bounds(bounds.into(), self.create_inner(auth, request))
            .await
    }

    async fn create_inner(
        &self,
        auth: &AuthContext,
        request: CreateInstance,
    ) -> Result<WorkflowInstance> {
        if let Some(key) = &auth.idempotency_key {
            let since = Utc::now() - self.config.idempotency_window;
            if let Some(prior) = self
                .repository
                .find_by_idempotency_key(&auth.organization_id, key, since)
                .await?
            {
                debug!(
                    instance_id = %prior.id,
                    idempotency_key = %key,
                    "duplicate create resolved to prior instance"
                );
                return Ok(prior);
            }
        }

        let definition = self
            .repository
            .get_definition(&request.definition_key, request.version)
            .await?
            .ok_or_else(|| {
                ConductorError::NotFound(format!("definition '{}'", request.definition_key))
            })?;

        let initial = definition.initial_state().ok_or_else(|| {
            ConductorError::Internal(format!(
                "definition '{}' v{} has no initial state",
                definition.key, definition.version
            ))
        })?;

        let mut instance = WorkflowInstance::new(
            &definition,
            initial.id.clone(),
            auth.organization_id.clone(),
            auth.user_id.clone(),
        );
        instance.context = request.context;
        instance.assigned_to = request.assigned_to;
        instance.priority = request.priority.unwrap_or_default();

        // Explicit deadline wins; otherwise the SLA total seeds one
        let sla_due = definition
            .sla
            .as_ref()
            .and_then(|sla| sla.total_duration_seconds)
            .map(|seconds| instance.created_at + chrono::Duration::seconds(seconds));
        instance.due_at = request.due_at.or(sla_due);

        let seed = HistoryEntry::seed(&instance, auth.user_id.clone());
        let stored = self
            .repository
            .create_instance(instance, seed, auth.idempotency_key.clone())
            .await?;

        info!(
            instance_id = %stored.id,
            definition = %stored.definition_key,
            version = stored.definition_version,
            state = %stored.current_state,
            "workflow instance created"
        );

        self.emit(
            WorkflowEventType::Started,
            &stored,
            serde_json::json!({
                "definition_key": stored.definition_key,
                "definition_version": stored.definition_version,
                "state": stored.current_state,
                "created_by": stored.created_by,
            }),
        )
        .await;

        if let Some(assignee) = &stored.assigned_to {
            self.emit(
                WorkflowEventType::TaskAssigned,
                &stored,
                serde_json::json!({
                    "state": stored.current_state,
                    "recipient": assignee,
                }),
            )
            .await;
        }

        Ok(stored)
    }

    /// Fire a trigger on an instance and move it to the destination state
    ///
    /// Runs under the per-instance lock. The context patch merges into a
    /// working copy first, so guards see the patched context; nothing
    /// persists unless the transition commits.
    pub async fn advance(
        &self,
        auth: &AuthContext,
        instance_id: Uuid,
        trigger: TriggerId,
        context_patch: Option<WorkflowContext>,
        notes: Option<String>,
        bounds: impl Into<CallBounds>,
    ) -> Result<WorkflowInstance> {
        self.with_bounds(
            bounds.into(),
            self.advance_inner(auth, instance_id, trigger, context_patch, notes),
        )
        .await
    }

    async fn advance_inner(
        &self,
        auth: &AuthContext,
        instance_id: Uuid,
        trigger: TriggerId,
        context_patch: Option<WorkflowContext>,
        notes: Option<String>,
    ) -> Result<WorkflowInstance> {
        let lock = self.lock_for(instance_id);
        let _guard = lock.lock().await;

        let mut attempt: u32 = 0;
        loop {
            let instance = self.load_scoped(auth, &instance_id).await?;
            if instance.is_terminal() {
                return Err(ConductorError::AlreadyCompleted {
                    instance_id: instance_id.to_string(),
                });
            }

            let definition = self.definition_of(&instance).await?;

            let mut working = instance.clone();
            if let Some(patch) = &context_patch {
                working.merge_context(patch);
            }

            let transition = self
                .machine
                .fire(
                    &definition,
                    &working.current_state,
                    &trigger,
                    &working.context,
                    auth,
                )
                .map_err(|err| match err {
                    TransitionError::TerminalState { .. } => ConductorError::AlreadyCompleted {
                        instance_id: instance_id.to_string(),
                    },
                    other => other.into(),
                })?;

            let from_state = working.current_state.clone();
            let to_state = transition.to_state.clone();
            let destination = definition.state(&to_state).ok_or_else(|| {
                ConductorError::Internal(format!(
                    "destination state '{}' missing from definition",
                    to_state
                ))
            })?;

            working.current_state = to_state.clone();
            working.updated_at = Utc::now();
            if let Some(kind) = destination.terminal {
                working.outcome = Some(kind);
                working.completed_at = Some(working.updated_at);
            }

            self.run_synchronous_hooks(&mut working, &definition, destination, auth)
                .await?;

            let entry = HistoryEntry::transition(
                working.id,
                from_state.clone(),
                to_state.clone(),
                trigger.clone(),
                auth.user_id.clone(),
            )
            .with_notes(notes.clone())
            .with_context_delta(match &context_patch {
                Some(patch) => Some(serde_json::to_value(patch)?),
                None => None,
            });

            match self
                .repository
                .update_instance(working, entry, instance.revision)
                .await
            {
                Ok(updated) => {
                    info!(
                        instance_id = %updated.id,
                        from = %from_state,
                        to = %updated.current_state,
                        trigger = %trigger,
                        actor = %auth.user_id,
                        "workflow instance advanced"
                    );
                    self.emit_transition_events(&updated, &definition, &from_state, &trigger)
                        .await;
                    self.run_post_commit_hooks(&updated, &definition, destination, auth)
                        .await;
                    return Ok(updated);
                }
                Err(ConductorError::Conflict(message)) => {
                    attempt += 1;
                    if attempt >= self.config.max_transition_retries {
                        return Err(ConductorError::Conflict(message));
                    }
                    let backoff = jittered_backoff(attempt);
                    debug!(
                        instance_id = %instance_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "optimistic conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Fetch an instance, organization-scoped
    pub async fn get(
        &self,
        auth: &AuthContext,
        instance_id: Uuid,
        bounds: impl Into<CallBounds>,
    ) -> Result<WorkflowInstance> {
        self.with_bounds(bounds.into(), self.load_scoped(auth, &instance_id))
            .await
    }

    /// History of an instance in commit order, organization-scoped
    pub async fn history(
        &self,
        auth: &AuthContext,
        instance_id: Uuid,
        bounds: impl Into<CallBounds>,
    ) -> Result<Vec<HistoryEntry>> {
        self.with_bounds(bounds.into(), async {
            self.load_scoped(auth, &instance_id).await?;
            self.repository.history_for_instance(&instance_id).await
        })
        .await
    }

    /// Progress percentage of an instance through its definition
    pub async fn progress(
        &self,
        auth: &AuthContext,
        instance_id: Uuid,
        bounds: impl Into<CallBounds>,
    ) -> Result<u8> {
        self.with_bounds(bounds.into(), async {
            let instance = self.load_scoped(auth, &instance_id).await?;
            let definition = self.definition_of(&instance).await?;
            Ok(self.machine.progress(&definition, &instance.current_state))
        })
        .await
    }

    /// Instances created by or assigned to a user, filtered and paginated
    pub async fn list_for_user(
        &self,
        auth: &AuthContext,
        user_id: &str,
        filter: InstanceFilter,
        page: Page,
        bounds: impl Into<CallBounds>,
    ) -> Result<Vec<WorkflowInstance>> {
        self.with_bounds(bounds.into(), async {
            let now = Utc::now();
            let page = page.clamp();
            let mut instances = self
                .repository
                .instances_for_user(&auth.organization_id, user_id)
                .await?;

            instances.retain(|instance| {
                let status = instance.status(now);
                if let Some(wanted) = filter.status {
                    if status != wanted {
                        return false;
                    }
                }
                if let Some(priority) = filter.priority {
                    if instance.priority != priority {
                        return false;
                    }
                }
                if let Some(overdue) = filter.overdue {
                    if instance.is_overdue(now) != overdue {
                        return false;
                    }
                }
                true
            });

            instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            Ok(instances
                .into_iter()
                .skip((page.page - 1) * page.page_size)
                .take(page.page_size)
                .collect())
        })
        .await
    }

    /// Aggregate counts for the caller's organization
    pub async fn stats(
        &self,
        auth: &AuthContext,
        bounds: impl Into<CallBounds>,
    ) -> Result<WorkflowStats> {
        self.with_bounds(bounds.into(), async {
            let now = Utc::now();
            let instances = self
                .repository
                .instances_for_org(&auth.organization_id)
                .await?;

            let mut counts_by_status: HashMap<InstanceStatus, u64> = HashMap::new();
            let mut completion_seconds: Vec<f64> = Vec::new();
            let mut overdue_count = 0u64;

            for instance in &instances {
                let status = instance.status(now);
                *counts_by_status.entry(status).or_insert(0) += 1;
                if status == InstanceStatus::Overdue {
                    overdue_count += 1;
                }
                if let Some(completed_at) = instance.completed_at {
                    let elapsed = completed_at - instance.created_at;
                    completion_seconds.push(elapsed.num_milliseconds() as f64 / 1000.0);
                }
            }

            let avg_completion_seconds = if completion_seconds.is_empty() {
                None
            } else {
                Some(completion_seconds.iter().sum::<f64>() / completion_seconds.len() as f64)
            };

            Ok(WorkflowStats {
                total: instances.len() as u64,
                counts_by_status,
                avg_completion_seconds,
                overdue_count,
            })
        })
        .await
    }

    /// Flag active instances past their deadline and announce each once
    ///
    /// Idempotent: the `overdue_notified` flag makes repeated sweeps no-ops
    /// for already-flagged instances. Returns the ids flagged by this run.
    pub async fn sla_sweep(&self, bounds: impl Into<CallBounds>) -> Result<Vec<Uuid>> {
        self.with_bounds(bounds.into(), self.sla_sweep_inner()).await
    }

    async fn sla_sweep_inner(&self) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let candidates = self.repository.overdue_candidates(now).await?;
        let mut flagged = Vec::new();

        for candidate in candidates {
            let lock = self.lock_for(candidate.id);
            let _guard = lock.lock().await;

            let instance = match self.repository.get_instance(&candidate.id).await? {
                Some(instance) => instance,
                None => continue,
            };
            if !instance.is_overdue(now) || instance.overdue_notified {
                continue;
            }

            let mut working = instance.clone();
            working.overdue_notified = true;

            match self
                .repository
                .save_instance(working, instance.revision)
                .await
            {
                Ok(updated) => {
                    warn!(
                        instance_id = %updated.id,
                        due_at = ?updated.due_at,
                        "workflow instance overdue"
                    );
                    self.emit(
                        WorkflowEventType::Overdue,
                        &updated,
                        serde_json::json!({
                            "state": updated.current_state,
                            "due_at": updated.due_at,
                        }),
                    )
                    .await;
                    flagged.push(updated.id);
                }
                // Lost the race against a concurrent writer; the next sweep
                // re-evaluates this instance
                Err(ConductorError::Conflict(_)) => continue,
                Err(other) => return Err(other),
            }
        }

        Ok(flagged)
    }

    /// Admin-only removal of an instance, cascading to history and insights
    pub async fn delete_instance(
        &self,
        auth: &AuthContext,
        instance_id: Uuid,
        bounds: impl Into<CallBounds>,
    ) -> Result<bool> {
        self.with_bounds(bounds.into(), async {
            if !auth.is_admin() {
                return Err(ConductorError::Forbidden(
                    "instance deletion requires the admin role".to_string(),
                ));
            }
            self.load_scoped(auth, &instance_id).await?;
            self.repository.delete_instance(&instance_id).await
        })
        .await
    }

    // --- internals ---

    async fn load_scoped(&self, auth: &AuthContext, id: &Uuid) -> Result<WorkflowInstance> {
        let instance = self
            .repository
            .get_instance(id)
            .await?
            .ok_or_else(|| ConductorError::NotFound(format!("instance {}", id)))?;
        // Cross-org access is indistinguishable from absence
        if instance.organization_id != auth.organization_id {
            return Err(ConductorError::NotFound(format!("instance {}", id)));
        }
        Ok(instance)
    }

    async fn definition_of(&self, instance: &WorkflowInstance) -> Result<WorkflowDefinition> {
        self.repository
            .get_definition(&instance.definition_key, Some(instance.definition_version))
            .await?
            .ok_or_else(|| {
                ConductorError::Internal(format!(
                    "definition '{}' v{} bound to instance {} is missing",
                    instance.definition_key, instance.definition_version, instance.id
                ))
            })
    }

    async fn run_synchronous_hooks(
        &self,
        working: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        destination: &StateDefinition,
        auth: &AuthContext,
    ) -> Result<()> {
        for declaration in destination
            .on_enter
            .iter()
            .filter(|a| a.execution_mode == ExecutionMode::Synchronous)
        {
            let action = self.actions.get(&declaration.name).ok_or_else(|| {
                ConductorError::Internal(format!(
                    "action '{}' passed registration but is not registered",
                    declaration.name
                ))
            })?;

            let mut ctx = ActionContext {
                instance: &mut *working,
                definition,
                declaration,
                auth,
            };
            if let Err(err) = action.execute(&mut ctx).await {
                if declaration.mandatory {
                    return Err(ConductorError::ActionFailed {
                        action: declaration.name.clone(),
                        message: err.to_string(),
                    });
                }
                warn_best_effort(&declaration.name, &err);
            }
        }
        Ok(())
    }

    async fn run_post_commit_hooks(
        &self,
        committed: &WorkflowInstance,
        definition: &WorkflowDefinition,
        destination: &StateDefinition,
        auth: &AuthContext,
    ) {
        for declaration in destination
            .on_enter
            .iter()
            .filter(|a| a.execution_mode == ExecutionMode::PostCommit)
        {
            let action = match self.actions.get(&declaration.name) {
                Some(action) => action,
                None => continue,
            };
            // Hooks here see a throwaway copy; the transition is committed
            let mut scratch = committed.clone();
            let mut ctx = ActionContext {
                instance: &mut scratch,
                definition,
                declaration,
                auth,
            };
            if let Err(err) = action.execute(&mut ctx).await {
                warn_best_effort(&declaration.name, &err);
            }
        }
    }

    async fn emit_transition_events(
        &self,
        updated: &WorkflowInstance,
        definition: &WorkflowDefinition,
        from_state: &StateId,
        trigger: &TriggerId,
    ) {
        self.emit(
            WorkflowEventType::StateChanged,
            updated,
            serde_json::json!({
                "from": from_state,
                "to": updated.current_state,
                "trigger": trigger,
                "progress": self.machine.progress(definition, &updated.current_state),
            }),
        )
        .await;

        if let Some(outcome) = updated.outcome {
            let event_type = match outcome {
                crate::models::TerminalKind::Success => WorkflowEventType::Completed,
                crate::models::TerminalKind::Failure => WorkflowEventType::Failed,
            };
            self.emit(
                event_type,
                updated,
                serde_json::json!({
                    "state": updated.current_state,
                    "completed_at": updated.completed_at,
                }),
            )
            .await;
        }
    }

    async fn emit(
        &self,
        event_type: WorkflowEventType,
        instance: &WorkflowInstance,
        payload: serde_json::Value,
    ) {
        let event = WorkflowEvent::new(event_type, instance, payload);
        if let Err(err) = self.events.publish(event).await {
            // Fire-and-forget: a publisher fault never affects the operation
            warn!(event_type = %event_type, error = %err, "event publish failed");
        }
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Enforce the caller's deadline and cancellation token around an
    /// operation. Cancellation wins over a simultaneously-ready result so a
    /// cancelled caller never observes a late success.
    async fn with_bounds<T, F>(&self, bounds: CallBounds, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let limit = bounds.deadline.unwrap_or(self.config.default_timeout);
        let guarded = async {
            match bounds.cancel {
                Some(token) => {
                    tokio::pin!(fut);
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(ConductorError::Cancelled),
                        result = &mut fut => result,
                    }
                }
                None => fut.await,
            }
        };
        match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => Err(ConductorError::DeadlineExceeded),
        }
    }
}

fn jittered_backoff(attempt: u32) -> Duration {
    let base = 50u64.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}
