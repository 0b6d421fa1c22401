// Repository contract - transactional persistence for the four entity kinds

//! # Repository
//!
//! The engine persists through this contract and nothing else. The contract
//! covers the four entity kinds (definitions, instances, history, insights)
//! and encodes the two transactional promises the engine relies on:
//!
//! - `create_instance` writes the instance and its seed history entry
//!   atomically
//! - `update_instance` writes the updated instance and the new history entry
//!   atomically, and only when the caller's `expected_revision` still matches
//!   the stored row - otherwise it fails with `Conflict` and writes nothing
//!
//! `InMemoryRepository` is the default backend for development and tests. A
//! database-backed implementation realizes the same contract with row locks
//! or a version column; the engine cannot tell the difference.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{AIInsight, HistoryEntry, WorkflowDefinition, WorkflowInstance};
use crate::{ConductorError, Result};

/// Persistence contract for the workflow engine
#[async_trait]
pub trait Repository: Send + Sync {
    // --- definitions (immutable once inserted) ---

    /// Insert a definition. Fails with `Conflict` when `(key, version)`
    /// already exists.
    async fn insert_definition(&self, definition: WorkflowDefinition)
        -> Result<WorkflowDefinition>;

    /// Fetch a definition; `None` version means the latest registered one
    async fn get_definition(
        &self,
        key: &str,
        version: Option<u32>,
    ) -> Result<Option<WorkflowDefinition>>;

    /// Highest registered version for `key`, if any
    async fn latest_version(&self, key: &str) -> Result<Option<u32>>;

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>>;

    // --- instances ---

    /// Atomically persist a new instance with its seed history entry.
    /// `idempotency_key`, when present, is recorded for later duplicate
    /// detection scoped to the instance's organization.
    async fn create_instance(
        &self,
        instance: WorkflowInstance,
        seed: HistoryEntry,
        idempotency_key: Option<String>,
    ) -> Result<WorkflowInstance>;

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>>;

    /// Atomically persist a transitioned instance plus its history entry.
    /// Fails with `Conflict` (writing nothing) unless the stored revision
    /// equals `expected_revision`; on success the stored revision is bumped.
    async fn update_instance(
        &self,
        instance: WorkflowInstance,
        entry: HistoryEntry,
        expected_revision: u64,
    ) -> Result<WorkflowInstance>;

    /// Persist instance fields without appending history (SLA flag updates).
    /// Same optimistic-revision semantics as `update_instance`.
    async fn save_instance(
        &self,
        instance: WorkflowInstance,
        expected_revision: u64,
    ) -> Result<WorkflowInstance>;

    /// All instances owned by an organization
    async fn instances_for_org(&self, organization_id: &str) -> Result<Vec<WorkflowInstance>>;

    /// Instances within an organization created by or assigned to a user
    async fn instances_for_user(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Vec<WorkflowInstance>>;

    /// Active instances past their deadline that have not been flagged yet
    async fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowInstance>>;

    /// Prior instance created with this idempotency key at or after `since`
    async fn find_by_idempotency_key(
        &self,
        organization_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<WorkflowInstance>>;

    /// Admin-only removal; cascades to history and attached insights
    async fn delete_instance(&self, id: &Uuid) -> Result<bool>;

    // --- history (append-only, written through the instance methods) ---

    /// History of an instance in chronological order
    async fn history_for_instance(&self, instance_id: &Uuid) -> Result<Vec<HistoryEntry>>;

    // --- insights ---

    async fn add_insight(&self, insight: AIInsight) -> Result<AIInsight>;

    async fn insights_for_instance(&self, instance_id: &Uuid) -> Result<Vec<AIInsight>>;
}

#[derive(Clone)]
struct IdempotencyRecord {
    instance_id: Uuid,
    created_at: DateTime<Utc>,
}

/// In-memory repository for development, demos and tests
///
/// Not persistent and not shared across processes; revision checks are
/// enforced exactly like a database version column so engine behavior under
/// concurrent writers is faithful.
pub struct InMemoryRepository {
    definitions: RwLock<HashMap<String, BTreeMap<u32, WorkflowDefinition>>>,
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
    history: RwLock<HashMap<Uuid, Vec<HistoryEntry>>>,
    insights: RwLock<Vec<AIInsight>>,
    idempotency: RwLock<HashMap<(String, String), IdempotencyRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            insights: RwLock::new(Vec::new()),
            idempotency: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition> {
        let mut definitions = self.definitions.write().await;
        let versions = definitions.entry(definition.key.clone()).or_default();
        if versions.contains_key(&definition.version) {
            return Err(ConductorError::Conflict(format!(
                "definition '{}' version {} already registered",
                definition.key, definition.version
            )));
        }
        versions.insert(definition.version, definition.clone());
        Ok(definition)
    }

    async fn get_definition(
        &self,
        key: &str,
        version: Option<u32>,
    ) -> Result<Option<WorkflowDefinition>> {
        let definitions = self.definitions.read().await;
        let versions = match definitions.get(key) {
            Some(versions) => versions,
            None => return Ok(None),
        };
        let found = match version {
            Some(v) => versions.get(&v),
            None => versions.values().next_back(),
        };
        Ok(found.cloned())
    }

    async fn latest_version(&self, key: &str) -> Result<Option<u32>> {
        let definitions = self.definitions.read().await;
        Ok(definitions
            .get(key)
            .and_then(|versions| versions.keys().next_back().copied()))
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>> {
        let definitions = self.definitions.read().await;
        let mut all: Vec<WorkflowDefinition> = definitions
            .values()
            .flat_map(|versions| versions.values().cloned())
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
        Ok(all)
    }

    async fn create_instance(
        &self,
        instance: WorkflowInstance,
        seed: HistoryEntry,
        idempotency_key: Option<String>,
    ) -> Result<WorkflowInstance> {
        // Take every lock before writing so the insert is all-or-nothing
        let mut instances = self.instances.write().await;
        let mut history = self.history.write().await;

        if instances.contains_key(&instance.id) {
            return Err(ConductorError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }

        instances.insert(instance.id, instance.clone());
        history.insert(instance.id, vec![seed]);

        if let Some(key) = idempotency_key {
            let mut idempotency = self.idempotency.write().await;
            idempotency.insert(
                (instance.organization_id.clone(), key),
                IdempotencyRecord {
                    instance_id: instance.id,
                    created_at: instance.created_at,
                },
            );
        }

        Ok(instance)
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(id).cloned())
    }

    async fn update_instance(
        &self,
        mut instance: WorkflowInstance,
        entry: HistoryEntry,
        expected_revision: u64,
    ) -> Result<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        let mut history = self.history.write().await;

        let stored = instances
            .get(&instance.id)
            .ok_or_else(|| ConductorError::NotFound(format!("instance {}", instance.id)))?;

        if stored.revision != expected_revision {
            return Err(ConductorError::Conflict(format!(
                "instance {} was modified concurrently (expected revision {}, found {})",
                instance.id, expected_revision, stored.revision
            )));
        }

        instance.revision = expected_revision + 1;
        instances.insert(instance.id, instance.clone());
        history.entry(instance.id).or_default().push(entry);

        Ok(instance)
    }

    async fn save_instance(
        &self,
        mut instance: WorkflowInstance,
        expected_revision: u64,
    ) -> Result<WorkflowInstance> {
        let mut instances = self.instances.write().await;

        let stored = instances
            .get(&instance.id)
            .ok_or_else(|| ConductorError::NotFound(format!("instance {}", instance.id)))?;

        if stored.revision != expected_revision {
            return Err(ConductorError::Conflict(format!(
                "instance {} was modified concurrently (expected revision {}, found {})",
                instance.id, expected_revision, stored.revision
            )));
        }

        instance.revision = expected_revision + 1;
        instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn instances_for_org(&self, organization_id: &str) -> Result<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| i.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn instances_for_user(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| i.organization_id == organization_id)
            .filter(|i| {
                i.created_by == user_id || i.assigned_to.as_deref() == Some(user_id)
            })
            .cloned()
            .collect())
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| i.is_overdue(now) && !i.overdue_notified)
            .cloned()
            .collect())
    }

    async fn find_by_idempotency_key(
        &self,
        organization_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<WorkflowInstance>> {
        let record = {
            let idempotency = self.idempotency.read().await;
            match idempotency.get(&(organization_id.to_string(), key.to_string())) {
                Some(record) if record.created_at >= since => record.clone(),
                _ => return Ok(None),
            }
        };
        self.get_instance(&record.instance_id).await
    }

    async fn delete_instance(&self, id: &Uuid) -> Result<bool> {
        let mut instances = self.instances.write().await;
        let mut history = self.history.write().await;
        let mut insights = self.insights.write().await;

        let removed = instances.remove(id).is_some();
        if removed {
            history.remove(id);
            insights.retain(|insight| insight.instance_id != Some(*id));
        }
        Ok(removed)
    }

    async fn history_for_instance(&self, instance_id: &Uuid) -> Result<Vec<HistoryEntry>> {
        let history = self.history.read().await;
        Ok(history.get(instance_id).cloned().unwrap_or_default())
    }

    async fn add_insight(&self, insight: AIInsight) -> Result<AIInsight> {
        let mut insights = self.insights.write().await;
        insights.push(insight.clone());
        Ok(insight)
    }

    async fn insights_for_instance(&self, instance_id: &Uuid) -> Result<Vec<AIInsight>> {
        let insights = self.insights.read().await;
        Ok(insights
            .iter()
            .filter(|i| i.instance_id == Some(*instance_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        InsightKind, StateDefinition, StateId, TerminalKind, TransitionDefinition,
    };
    use chrono::Duration;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "approval",
            1,
            "Approval",
            vec![
                StateDefinition::initial("draft"),
                StateDefinition::terminal("approved", TerminalKind::Success),
            ],
            vec![TransitionDefinition::new("draft", "approve", "approved")],
        )
    }

    fn seeded_instance(def: &WorkflowDefinition) -> (WorkflowInstance, HistoryEntry) {
        let instance = WorkflowInstance::new(
            def,
            StateId::from("draft"),
            "org-1".to_string(),
            "user-1".to_string(),
        );
        let seed = HistoryEntry::seed(&instance, "user-1".to_string());
        (instance, seed)
    }

    #[tokio::test]
    async fn definition_versions_resolve_to_latest() {
        let repo = InMemoryRepository::new();
        let mut v1 = definition();
        v1.version = 1;
        let mut v2 = definition();
        v2.version = 2;
        v2.name = "Approval v2".to_string();

        repo.insert_definition(v1).await.unwrap();
        repo.insert_definition(v2).await.unwrap();

        let latest = repo.get_definition("approval", None).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);

        let pinned = repo
            .get_definition("approval", Some(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pinned.version, 1);

        assert_eq!(repo.latest_version("approval").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn duplicate_definition_version_conflicts() {
        let repo = InMemoryRepository::new();
        repo.insert_definition(definition()).await.unwrap();
        let err = repo.insert_definition(definition()).await.unwrap_err();
        assert!(matches!(err, ConductorError::Conflict(_)));
    }

    #[tokio::test]
    async fn stale_revision_update_conflicts_and_writes_nothing() {
        let repo = InMemoryRepository::new();
        let def = definition();
        let (instance, seed) = seeded_instance(&def);
        let stored = repo.create_instance(instance, seed, None).await.unwrap();

        let mut first = stored.clone();
        first.current_state = StateId::from("approved");
        let entry = HistoryEntry::transition(
            first.id,
            StateId::from("draft"),
            StateId::from("approved"),
            "approve".into(),
            "user-1".to_string(),
        );
        let updated = repo
            .update_instance(first, entry.clone(), stored.revision)
            .await
            .unwrap();
        assert_eq!(updated.revision, stored.revision + 1);

        // Second writer still holds the old revision
        let mut second = stored.clone();
        second.current_state = StateId::from("approved");
        let err = repo
            .update_instance(second, entry, stored.revision)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Conflict(_)));

        let history = repo.history_for_instance(&stored.id).await.unwrap();
        assert_eq!(history.len(), 2); // seed + exactly one transition
    }

    #[tokio::test]
    async fn idempotency_lookup_honors_the_window() {
        let repo = InMemoryRepository::new();
        let def = definition();
        let (instance, seed) = seeded_instance(&def);
        let stored = repo
            .create_instance(instance, seed, Some("req-1".to_string()))
            .await
            .unwrap();

        let within = Utc::now() - Duration::hours(1);
        let found = repo
            .find_by_idempotency_key("org-1", "req-1", within)
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.id), Some(stored.id));

        // A window starting after creation excludes the record
        let after = Utc::now() + Duration::hours(1);
        assert!(repo
            .find_by_idempotency_key("org-1", "req-1", after)
            .await
            .unwrap()
            .is_none());

        // Keys are organization-scoped
        assert!(repo
            .find_by_idempotency_key("org-2", "req-1", within)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_history_and_insights() {
        let repo = InMemoryRepository::new();
        let def = definition();
        let (instance, seed) = seeded_instance(&def);
        let stored = repo.create_instance(instance, seed, None).await.unwrap();

        repo.add_insight(AIInsight::new(
            Some(stored.id),
            InsightKind::Summarize,
            "summary".to_string(),
            0.8,
            "model-a".to_string(),
            "provider-a".to_string(),
        ))
        .await
        .unwrap();

        assert!(repo.delete_instance(&stored.id).await.unwrap());
        assert!(repo.get_instance(&stored.id).await.unwrap().is_none());
        assert!(repo
            .history_for_instance(&stored.id)
            .await
            .unwrap()
            .is_empty());
        assert!(repo
            .insights_for_instance(&stored.id)
            .await
            .unwrap()
            .is_empty());
    }
}
