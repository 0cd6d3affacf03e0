//! Orchestrates workflow submission, execution reporting, and lifecycle
//! transitions on top of a [`WorkflowStore`] and [`WorkflowLock`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use flowctl_core::{AppError, AppResult, WorkflowId};
use flowctl_domain::{
    validate_state_machine, validate_transition, StateMachine, Workflow, WorkflowDefinition,
    WorkflowStatus,
};
use serde_json::Value;

use crate::store::{GetWorkflowsQuery, Page, WorkflowLock, WorkflowStore};

/// Coordinates the workflow lifecycle against a durable store and a lock.
///
/// Built with [`WorkflowManager::new`] and the `with_*` consuming builder
/// methods, mirroring the rest of the crate's service constructors.
pub struct WorkflowManager {
    store: Arc<dyn WorkflowStore>,
    lock: Arc<dyn WorkflowLock>,
}

impl WorkflowManager {
    /// Builds a manager over the given store and lock.
    #[must_use]
    pub fn new(store: Arc<dyn WorkflowStore>, lock: Arc<dyn WorkflowLock>) -> Self {
        Self { store, lock }
    }

    /// Replaces the store, consuming and returning `self`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the lock, consuming and returning `self`.
    #[must_use]
    pub fn with_lock(mut self, lock: Arc<dyn WorkflowLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Validates `state_machine` against `known_resources` and, if it
    /// passes, persists it as a new version of `name`.
    pub async fn submit_definition(
        &self,
        name: &str,
        state_machine: StateMachine,
        known_resources: &HashSet<String>,
    ) -> AppResult<WorkflowDefinition> {
        validate_state_machine(&state_machine, known_resources)?;
        self.store.save_workflow_definition(name, state_machine).await
    }

    /// Starts a new run of `definition_name` (the latest version unless
    /// `definition_version` pins one), queued for execution.
    pub async fn start_workflow(
        &self,
        definition_name: &str,
        definition_version: Option<u32>,
        namespace: String,
        queue: String,
        input: Value,
        tags: HashMap<String, Value>,
    ) -> AppResult<Workflow> {
        let workflow_definition = self
            .store
            .get_workflow_definition(definition_name, definition_version)
            .await?;
        let now = Utc::now();
        let workflow = Workflow {
            id: WorkflowId::new(),
            workflow_definition,
            status: WorkflowStatus::Queued,
            resolved_by_user: false,
            namespace,
            queue,
            input,
            tags,
            retries: Vec::new(),
            retry_for: None,
            jobs: Vec::new(),
            created_at: now,
            last_updated: now,
        };
        self.store.save_workflow(workflow).await
    }

    /// Fetches a single run by id.
    pub async fn get_workflow(&self, id: WorkflowId) -> AppResult<Workflow> {
        self.store.get_workflow(id).await
    }

    /// Lists runs matching `query`.
    pub async fn list_workflows(&self, query: GetWorkflowsQuery) -> AppResult<Page<Workflow>> {
        self.store.get_workflows(query).await
    }

    /// Lists not-yet-done runs in `namespace`, oldest-waiting first.
    pub async fn scan_pending_workflows(
        &self,
        namespace: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> AppResult<Page<Workflow>> {
        self.store
            .get_pending_workflows(namespace, page_size, page_token)
            .await
    }

    /// Reports a new status for a run, holding the run's lock for the
    /// duration of the read-modify-write.
    ///
    /// The transition must be legal per
    /// [`flowctl_domain::validate_transition`]; an illegal transition (most
    /// commonly reporting into an already-terminal run) fails with
    /// [`AppError::Conflict`] and leaves the run untouched.
    pub async fn report_status(
        &self,
        workflow_id: WorkflowId,
        next_status: WorkflowStatus,
        reason: Option<String>,
    ) -> AppResult<Workflow> {
        let lock = self.lock.acquire(workflow_id).await?;
        let result = self.report_status_locked(workflow_id, next_status, reason).await;
        self.lock.release(&lock).await?;
        result
    }

    async fn report_status_locked(
        &self,
        workflow_id: WorkflowId,
        next_status: WorkflowStatus,
        reason: Option<String>,
    ) -> AppResult<Workflow> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;
        validate_transition(workflow.status, next_status)?;
        let expected_last_updated = workflow.last_updated;
        workflow.status = next_status;
        workflow.last_updated = Utc::now();
        if let Some(reason) = reason {
            workflow.tags.insert("status_reason".to_owned(), Value::String(reason));
        }
        self.store.update_workflow(workflow, expected_last_updated).await
    }

    /// Cancels a run. Legal from `Queued` or `Running`. Cancelling an
    /// already-terminal run is idempotent: it succeeds and returns the run
    /// unchanged rather than erroring.
    pub async fn cancel_workflow(&self, workflow_id: WorkflowId, reason: Option<String>) -> AppResult<Workflow> {
        let lock = self.lock.acquire(workflow_id).await?;
        let result = self.cancel_workflow_locked(workflow_id, reason).await;
        self.lock.release(&lock).await?;
        result
    }

    async fn cancel_workflow_locked(
        &self,
        workflow_id: WorkflowId,
        reason: Option<String>,
    ) -> AppResult<Workflow> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        if workflow.status.is_done() {
            return Ok(workflow);
        }

        let mut workflow = workflow;
        let expected_last_updated = workflow.last_updated;
        workflow.status = WorkflowStatus::Cancelled;
        workflow.last_updated = Utc::now();
        if let Some(reason) = reason {
            workflow.tags.insert("status_reason".to_owned(), Value::String(reason));
        }
        self.store.update_workflow(workflow, expected_last_updated).await
    }

    /// Marks a terminal run as resolved by a user.
    ///
    /// `resolvedByUser` is the only field a terminal run may still mutate;
    /// it never changes `status`. Resolving an already-resolved run is
    /// idempotent. Fails with [`AppError::Validation`] if the run is not yet
    /// terminal.
    pub async fn resolve_workflow(&self, workflow_id: WorkflowId) -> AppResult<Workflow> {
        let lock = self.lock.acquire(workflow_id).await?;
        let result = self.resolve_workflow_locked(workflow_id).await;
        self.lock.release(&lock).await?;
        result
    }

    async fn resolve_workflow_locked(&self, workflow_id: WorkflowId) -> AppResult<Workflow> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        if !workflow.status.is_done() {
            return Err(AppError::Validation(
                "resolve requires a terminal workflow".to_owned(),
            ));
        }
        if workflow.resolved_by_user {
            return Ok(workflow);
        }

        let mut workflow = workflow;
        let expected_last_updated = workflow.last_updated;
        workflow.resolved_by_user = true;
        workflow.last_updated = Utc::now();
        self.store.update_workflow(workflow, expected_last_updated).await
    }

    /// Starts a fresh run as a retry of `original_id`, which must already be
    /// done. Links both runs via `retries`/`retry_for`.
    pub async fn resume_workflow(
        &self,
        original_id: WorkflowId,
        input: Value,
        tags: HashMap<String, Value>,
    ) -> AppResult<Workflow> {
        let lock = self.lock.acquire(original_id).await?;
        let result = self.resume_workflow_locked(original_id, input, tags).await;
        self.lock.release(&lock).await?;
        result
    }

    async fn resume_workflow_locked(
        &self,
        original_id: WorkflowId,
        input: Value,
        tags: HashMap<String, Value>,
    ) -> AppResult<Workflow> {
        let mut original = self.store.get_workflow(original_id).await?;
        if !original.status.is_done() {
            return Err(AppError::Validation(
                "cannot resume a run that is not yet done".to_owned(),
            ));
        }

        let now = Utc::now();
        let retry = Workflow {
            id: WorkflowId::new(),
            workflow_definition: original.workflow_definition.clone(),
            status: WorkflowStatus::Queued,
            resolved_by_user: false,
            namespace: original.namespace.clone(),
            queue: original.queue.clone(),
            input,
            tags,
            retries: Vec::new(),
            retry_for: Some(original_id),
            jobs: Vec::new(),
            created_at: now,
            last_updated: now,
        };
        let saved_retry = self.store.save_workflow(retry).await?;

        let expected_last_updated = original.last_updated;
        original.retries.push(saved_retry.id);
        original.last_updated = Utc::now();
        self.store.update_workflow(original, expected_last_updated).await?;

        Ok(saved_retry)
    }
}

#[cfg(test)]
mod tests {
    use super::WorkflowManager;
    use crate::store::{GetWorkflowsQuery, Page, WorkflowLock, WorkflowStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use flowctl_core::{AppError, AppResult, WorkflowId};
    use flowctl_domain::{Lock, StateMachine, StateResource, Workflow, WorkflowDefinition, WorkflowStatus};
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct FakeStore {
        definitions: Mutex<HashMap<String, Vec<WorkflowDefinition>>>,
        workflows: Mutex<HashMap<WorkflowId, Workflow>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                definitions: Mutex::new(HashMap::new()),
                workflows: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl WorkflowStore for FakeStore {
        async fn save_workflow_definition(
            &self,
            name: &str,
            state_machine: StateMachine,
        ) -> AppResult<WorkflowDefinition> {
            let mut definitions = self.definitions.lock().await;
            let history = definitions.entry(name.to_owned()).or_default();
            let version = history.last().map_or(0, |d| d.version() + 1);
            let definition = WorkflowDefinition::new(name, version, Utc::now(), state_machine)?;
            history.push(definition.clone());
            Ok(definition)
        }

        async fn get_workflow_definition(
            &self,
            name: &str,
            version: Option<u32>,
        ) -> AppResult<WorkflowDefinition> {
            let definitions = self.definitions.lock().await;
            let history = definitions
                .get(name)
                .ok_or_else(|| AppError::NotFound(format!("no such definition '{name}'")))?;
            match version {
                Some(v) => history
                    .iter()
                    .find(|d| d.version() == v)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("no version {v} of '{name}'"))),
                None => history
                    .last()
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("no such definition '{name}'"))),
            }
        }

        async fn get_workflow_definitions(&self) -> AppResult<Vec<WorkflowDefinition>> {
            let definitions = self.definitions.lock().await;
            Ok(definitions.values().filter_map(|history| history.last().cloned()).collect())
        }

        async fn get_workflow_definition_versions(&self, name: &str) -> AppResult<Vec<WorkflowDefinition>> {
            let definitions = self.definitions.lock().await;
            match definitions.get(name) {
                Some(history) if !history.is_empty() => Ok(history.clone()),
                _ => Err(AppError::NotFound(format!("no such definition '{name}'"))),
            }
        }

        async fn save_workflow(&self, workflow: Workflow) -> AppResult<Workflow> {
            let mut workflows = self.workflows.lock().await;
            if workflows.contains_key(&workflow.id) {
                return Err(AppError::Conflict(format!("workflow {} already exists", workflow.id)));
            }
            workflows.insert(workflow.id, workflow.clone());
            Ok(workflow)
        }

        async fn update_workflow(
            &self,
            workflow: Workflow,
            expected_last_updated: DateTime<Utc>,
        ) -> AppResult<Workflow> {
            let mut workflows = self.workflows.lock().await;
            let existing = workflows
                .get(&workflow.id)
                .ok_or_else(|| AppError::NotFound(format!("no such workflow {}", workflow.id)))?;
            if existing.last_updated != expected_last_updated {
                return Err(AppError::Conflict(format!("stale write to workflow {}", workflow.id)));
            }
            workflows.insert(workflow.id, workflow.clone());
            Ok(workflow)
        }

        async fn get_workflow(&self, id: WorkflowId) -> AppResult<Workflow> {
            let workflows = self.workflows.lock().await;
            workflows
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("no such workflow {id}")))
        }

        async fn delete_workflow(&self, id: WorkflowId) -> AppResult<()> {
            let mut workflows = self.workflows.lock().await;
            workflows.remove(&id);
            Ok(())
        }

        async fn get_workflows(&self, _query: GetWorkflowsQuery) -> AppResult<Page<Workflow>> {
            Ok(Page {
                items: Vec::new(),
                next_page_token: None,
            })
        }

        async fn get_pending_workflows(
            &self,
            _namespace: &str,
            _page_size: u32,
            _page_token: Option<String>,
        ) -> AppResult<Page<Workflow>> {
            Ok(Page {
                items: Vec::new(),
                next_page_token: None,
            })
        }

        async fn save_state_resource(&self, resource: StateResource) -> AppResult<StateResource> {
            Ok(resource)
        }

        async fn get_state_resource(&self, name: &str, namespace: &str) -> AppResult<StateResource> {
            Err(AppError::NotFound(format!("no such resource {name}/{namespace}")))
        }

        async fn delete_state_resource(&self, _name: &str, _namespace: &str) -> AppResult<()> {
            Ok(())
        }
    }

    struct FakeLock {
        held: Mutex<HashSet<WorkflowId>>,
    }

    impl FakeLock {
        fn new() -> Self {
            Self {
                held: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl WorkflowLock for FakeLock {
        async fn acquire(&self, workflow_id: WorkflowId) -> AppResult<Lock> {
            let mut held = self.held.lock().await;
            if !held.insert(workflow_id) {
                return Err(AppError::Locked(format!("workflow {workflow_id} already locked")));
            }
            Ok(Lock::new(workflow_id, Utc::now()))
        }

        async fn release(&self, lock: &Lock) -> AppResult<()> {
            let mut held = self.held.lock().await;
            held.remove(&lock.workflow_id);
            Ok(())
        }

        async fn renew(&self, lock: &Lock) -> AppResult<Lock> {
            Ok(Lock::new(lock.workflow_id, Utc::now()))
        }
    }

    fn trivial_state_machine() -> StateMachine {
        StateMachine {
            start_at: "only".to_owned(),
            states: BTreeMap::from([("only".to_owned(), flowctl_domain::State::Succeed)]),
            comment: None,
            version: "1.0".to_owned(),
            timeout_seconds: None,
        }
    }

    fn manager() -> WorkflowManager {
        WorkflowManager::new(Arc::new(FakeStore::new()), Arc::new(FakeLock::new()))
    }

    /// Unwraps a test-only result, panicking with context on failure instead
    /// of calling the denied `.unwrap()`/`.expect()` methods.
    fn require<T>(result: AppResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(error) => panic!("expected Ok, got Err: {error}"),
        }
    }

    async fn seeded_workflow(manager: &WorkflowManager) -> Workflow {
        let known_resources = HashSet::new();
        require(
            manager
                .submit_definition("greet", trivial_state_machine(), &known_resources)
                .await,
        );
        require(
            manager
                .start_workflow(
                    "greet",
                    None,
                    "default".to_owned(),
                    "default".to_owned(),
                    serde_json::json!({}),
                    HashMap::new(),
                )
                .await,
        )
    }

    #[tokio::test]
    async fn submits_and_starts_a_workflow() {
        let manager = manager();
        let workflow = seeded_workflow(&manager).await;
        assert_eq!(workflow.status, WorkflowStatus::Queued);
    }

    #[tokio::test]
    async fn report_status_moves_queued_to_running() {
        let manager = manager();
        let workflow = seeded_workflow(&manager).await;

        let updated = manager.report_status(workflow.id, WorkflowStatus::Running, None).await;
        assert_eq!(require(updated).status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn report_status_rejects_illegal_transition() {
        let manager = manager();
        let workflow = seeded_workflow(&manager).await;

        let result = manager
            .report_status(workflow.id, WorkflowStatus::Succeeded, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn resume_requires_a_done_workflow() {
        let manager = manager();
        let workflow = seeded_workflow(&manager).await;

        let result = manager
            .resume_workflow(workflow.id, serde_json::json!({}), HashMap::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn resolve_requires_a_terminal_status() {
        let manager = manager();
        let workflow = seeded_workflow(&manager).await;

        let result = manager.resolve_workflow(workflow.id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn resolve_sets_resolved_by_user_on_a_terminal_workflow() {
        let manager = manager();
        let workflow = seeded_workflow(&manager).await;
        require(manager.report_status(workflow.id, WorkflowStatus::Running, None).await);
        require(
            manager
                .report_status(workflow.id, WorkflowStatus::Succeeded, None)
                .await,
        );

        let resolved = require(manager.resolve_workflow(workflow.id).await);
        assert!(resolved.resolved_by_user);
        assert_eq!(resolved.status, WorkflowStatus::Succeeded);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_a_terminal_workflow() {
        let manager = manager();
        let workflow = seeded_workflow(&manager).await;
        require(manager.report_status(workflow.id, WorkflowStatus::Running, None).await);
        let cancelled = require(manager.cancel_workflow(workflow.id, None).await);
        assert_eq!(cancelled.status, WorkflowStatus::Cancelled);

        let second = require(manager.cancel_workflow(workflow.id, None).await);
        assert_eq!(second.status, WorkflowStatus::Cancelled);
    }
}
