//! Port traits implemented by durable and in-memory store adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_core::{AppResult, WorkflowId};
use flowctl_domain::{Lock, StateMachine, StateResource, Workflow, WorkflowDefinition, WorkflowStatus};

/// Filter and pagination parameters for [`WorkflowStore::get_workflows`].
#[derive(Debug, Clone, Default)]
pub struct GetWorkflowsQuery {
    /// Restrict to a namespace, if set.
    pub namespace: Option<String>,
    /// Restrict to a queue, if set.
    pub queue: Option<String>,
    /// Restrict to a status, if set.
    pub status: Option<WorkflowStatus>,
    /// Maximum number of results to return.
    pub page_size: u32,
    /// Opaque continuation token from a prior page, if any.
    pub page_token: Option<String>,
    /// Sort ascending by `last_updated` instead of the default descending
    /// order.
    pub oldest_first: bool,
    /// Strip each run's `jobs` from the returned documents. Cheaper when a
    /// caller only needs run metadata.
    pub summary_only: bool,
}

/// A single page of results plus an opaque continuation token.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items in this page, ordered per the issuing query.
    pub items: Vec<T>,
    /// Token to fetch the next page, `None` once exhausted.
    pub next_page_token: Option<String>,
}

/// Durable storage for workflow definitions, runs, and the side resources
/// they reference. A conditional write that loses a race returns
/// [`flowctl_core::AppError::Conflict`]; a read against a missing key
/// returns [`flowctl_core::AppError::NotFound`].
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Saves a new version of a workflow definition. The store assigns the
    /// next version number and stamps `created_at`.
    async fn save_workflow_definition(
        &self,
        name: &str,
        state_machine: StateMachine,
    ) -> AppResult<WorkflowDefinition>;

    /// Fetches a definition by name. `version: None` resolves to the latest.
    async fn get_workflow_definition(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> AppResult<WorkflowDefinition>;

    /// Lists the latest version of every known definition name.
    async fn get_workflow_definitions(&self) -> AppResult<Vec<WorkflowDefinition>>;

    /// Lists every version on record for `name`, oldest version first.
    async fn get_workflow_definition_versions(&self, name: &str) -> AppResult<Vec<WorkflowDefinition>>;

    /// Inserts a brand-new workflow run. Conflicts if `workflow.id` already exists.
    async fn save_workflow(&self, workflow: Workflow) -> AppResult<Workflow>;

    /// Conditionally overwrites an existing run, failing with `Conflict` if
    /// `expected_last_updated` no longer matches the stored value.
    async fn update_workflow(
        &self,
        workflow: Workflow,
        expected_last_updated: DateTime<Utc>,
    ) -> AppResult<Workflow>;

    /// Fetches a single run by id.
    async fn get_workflow(&self, id: WorkflowId) -> AppResult<Workflow>;

    /// Deletes a run by id. A no-op if it does not exist.
    async fn delete_workflow(&self, id: WorkflowId) -> AppResult<()>;

    /// Lists runs matching `query`, newest-first within a page.
    async fn get_workflows(&self, query: GetWorkflowsQuery) -> AppResult<Page<Workflow>>;

    /// Lists runs in `namespace` that are not yet done, ordered by
    /// `last_updated` ascending so the longest-waiting runs surface first.
    async fn get_pending_workflows(
        &self,
        namespace: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> AppResult<Page<Workflow>>;

    /// Upserts a state resource, identified by `(name, namespace)`.
    async fn save_state_resource(&self, resource: StateResource) -> AppResult<StateResource>;

    /// Fetches a state resource by `(name, namespace)`.
    async fn get_state_resource(&self, name: &str, namespace: &str) -> AppResult<StateResource>;

    /// Deletes a state resource by `(name, namespace)`. A no-op if it does
    /// not exist.
    async fn delete_state_resource(&self, name: &str, namespace: &str) -> AppResult<()>;
}

/// Advisory, TTL-bound locking over a workflow run. Acquiring an
/// already-held, unexpired lock fails with
/// [`flowctl_core::AppError::Locked`].
#[async_trait]
pub trait WorkflowLock: Send + Sync {
    /// Acquires a lock on `workflow_id`, or fails if already held.
    async fn acquire(&self, workflow_id: WorkflowId) -> AppResult<Lock>;

    /// Releases a previously acquired lock. A no-op if it already expired.
    async fn release(&self, lock: &Lock) -> AppResult<()>;

    /// Extends a held lock's expiry by another TTL window.
    async fn renew(&self, lock: &Lock) -> AppResult<Lock>;
}
