//! Reference [`WorkflowStore`] backed by in-process maps.
//!
//! Exists for tests and single-process deployments; offers no durability
//! across restarts and no cross-process concurrency control (pair it with
//! [`crate::InMemoryWorkflowLock`], never [`crate::RedisWorkflowLock`]).
//! Pagination here is a plain integer offset rather than the Postgres
//! adapter's last-seen key, since there is no index to resume from.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_application::{decode_page_token, encode_page_token, merge_pending_by_last_updated, GetWorkflowsQuery, Page, WorkflowStore};
use flowctl_core::{AppError, AppResult, WorkflowId};
use flowctl_domain::{StateMachine, StateResource, Workflow, WorkflowDefinition, WorkflowStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct OffsetCursor {
    offset: usize,
}

#[derive(Default)]
struct State {
    definitions: HashMap<String, Vec<WorkflowDefinition>>,
    /// Workflows partitioned by queue, mirroring how a durable adapter might
    /// shard a scan; `get_pending_workflows` merges across partitions via
    /// the shared scanner helper instead of relying on a single sorted map.
    workflows_by_queue: HashMap<String, Vec<Workflow>>,
    state_resources: HashMap<(String, String), StateResource>,
}

/// In-memory reference implementation of [`WorkflowStore`].
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    state: Mutex<State>,
}

impl InMemoryWorkflowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save_workflow_definition(
        &self,
        name: &str,
        state_machine: StateMachine,
    ) -> AppResult<WorkflowDefinition> {
        let mut state = self.lock();
        let history = state.definitions.entry(name.to_owned()).or_default();
        let next_version = history.last().map_or(0, |definition| definition.version() + 1);
        let definition = WorkflowDefinition::new(name, next_version, Utc::now(), state_machine)?;
        history.push(definition.clone());
        Ok(definition)
    }

    async fn get_workflow_definition(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> AppResult<WorkflowDefinition> {
        let state = self.lock();
        let history = state
            .definitions
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("no such workflow definition '{name}'")))?;

        match version {
            Some(version) => history
                .iter()
                .find(|definition| definition.version() == version)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("no version {version} of '{name}'"))),
            None => history
                .last()
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("no such workflow definition '{name}'"))),
        }
    }

    async fn get_workflow_definitions(&self) -> AppResult<Vec<WorkflowDefinition>> {
        let state = self.lock();
        Ok(state
            .definitions
            .values()
            .filter_map(|history| history.last().cloned())
            .collect())
    }

    async fn get_workflow_definition_versions(&self, name: &str) -> AppResult<Vec<WorkflowDefinition>> {
        let state = self.lock();
        match state.definitions.get(name) {
            Some(history) if !history.is_empty() => Ok(history.clone()),
            _ => Err(AppError::NotFound(format!("no such workflow definition '{name}'"))),
        }
    }

    async fn save_workflow(&self, workflow: Workflow) -> AppResult<Workflow> {
        let mut state = self.lock();
        let partition = state.workflows_by_queue.entry(workflow.queue.clone()).or_default();
        if partition.iter().any(|existing| existing.id == workflow.id) {
            return Err(AppError::Conflict(format!("workflow {} already exists", workflow.id)));
        }
        partition.push(workflow.clone());
        Ok(workflow)
    }

    async fn update_workflow(
        &self,
        workflow: Workflow,
        expected_last_updated: DateTime<Utc>,
    ) -> AppResult<Workflow> {
        let mut state = self.lock();
        for partition in state.workflows_by_queue.values_mut() {
            if let Some(position) = partition.iter().position(|existing| existing.id == workflow.id) {
                if partition[position].last_updated != expected_last_updated {
                    return Err(AppError::Conflict(format!(
                        "workflow {} was modified concurrently",
                        workflow.id
                    )));
                }
                partition.remove(position);
                state
                    .workflows_by_queue
                    .entry(workflow.queue.clone())
                    .or_default()
                    .push(workflow.clone());
                return Ok(workflow);
            }
        }

        Err(AppError::NotFound(format!("no such workflow {}", workflow.id)))
    }

    async fn get_workflow(&self, id: WorkflowId) -> AppResult<Workflow> {
        let state = self.lock();
        state
            .workflows_by_queue
            .values()
            .flatten()
            .find(|workflow| workflow.id == id)
            .map(Workflow::snapshot)
            .ok_or_else(|| AppError::NotFound(format!("no such workflow {id}")))
    }

    async fn delete_workflow(&self, id: WorkflowId) -> AppResult<()> {
        let mut state = self.lock();
        for partition in state.workflows_by_queue.values_mut() {
            partition.retain(|workflow| workflow.id != id);
        }
        Ok(())
    }

    async fn get_workflows(&self, query: GetWorkflowsQuery) -> AppResult<Page<Workflow>> {
        let offset: usize = match &query.page_token {
            Some(token) => decode_page_token::<OffsetCursor>(token)?.offset,
            None => 0,
        };
        let page_size = query.page_size.max(1) as usize;

        let state = self.lock();
        let mut matching: Vec<Workflow> = state
            .workflows_by_queue
            .values()
            .flatten()
            .filter(|workflow| {
                query.namespace.as_deref().map_or(true, |namespace| workflow.namespace == namespace)
                    && query.queue.as_deref().map_or(true, |queue| workflow.queue == queue)
                    && query.status.map_or(true, |status| workflow.status == status)
            })
            .map(Workflow::snapshot)
            .collect();
        if query.oldest_first {
            matching.sort_by(|a, b| a.last_updated.cmp(&b.last_updated));
        } else {
            matching.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        }
        if query.summary_only {
            for workflow in &mut matching {
                workflow.jobs.clear();
            }
        }

        let items: Vec<Workflow> = matching.iter().skip(offset).take(page_size).cloned().collect();
        let next_page_token = if offset + items.len() < matching.len() {
            Some(encode_page_token(&OffsetCursor {
                offset: offset + items.len(),
            })?)
        } else {
            None
        };

        Ok(Page { items, next_page_token })
    }

    async fn get_pending_workflows(
        &self,
        namespace: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> AppResult<Page<Workflow>> {
        let offset: usize = match &page_token {
            Some(token) => decode_page_token::<OffsetCursor>(token)?.offset,
            None => 0,
        };
        let page_size = page_size.max(1) as usize;

        let state = self.lock();
        let sources: Vec<Vec<Workflow>> = state
            .workflows_by_queue
            .values()
            .map(|partition| {
                let mut matching: Vec<Workflow> = partition
                    .iter()
                    .filter(|workflow| workflow.namespace == namespace && !workflow.status.is_done())
                    .map(Workflow::snapshot)
                    .collect();
                matching.sort_by(|a, b| a.last_updated.cmp(&b.last_updated));
                matching
            })
            .collect();

        let merged = merge_pending_by_last_updated(sources, offset + page_size + 1);
        let total_before_truncation = merged.len();
        let items: Vec<Workflow> = merged.into_iter().skip(offset).take(page_size).collect();

        let next_page_token = if offset + items.len() < total_before_truncation {
            Some(encode_page_token(&OffsetCursor {
                offset: offset + items.len(),
            })?)
        } else {
            None
        };

        Ok(Page { items, next_page_token })
    }

    async fn save_state_resource(&self, resource: StateResource) -> AppResult<StateResource> {
        let mut state = self.lock();
        state
            .state_resources
            .insert((resource.name.clone(), resource.namespace.clone()), resource.clone());
        Ok(resource)
    }

    async fn get_state_resource(&self, name: &str, namespace: &str) -> AppResult<StateResource> {
        let state = self.lock();
        state
            .state_resources
            .get(&(name.to_owned(), namespace.to_owned()))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no such state resource {name}/{namespace}")))
    }

    async fn delete_state_resource(&self, name: &str, namespace: &str) -> AppResult<()> {
        let mut state = self.lock();
        state.state_resources.remove(&(name.to_owned(), namespace.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryWorkflowStore;
    use chrono::{DateTime, Utc};
    use flowctl_application::{GetWorkflowsQuery, WorkflowStore};
    use flowctl_core::WorkflowId;
    use flowctl_domain::{State, StateMachine, Workflow, WorkflowDefinition, WorkflowStatus};
    use std::collections::{BTreeMap, HashMap};

    fn trivial_state_machine() -> StateMachine {
        StateMachine {
            start_at: "only".to_owned(),
            states: BTreeMap::from([("only".to_owned(), State::Succeed)]),
            comment: None,
            version: "1.0".to_owned(),
            timeout_seconds: None,
        }
    }

    fn timestamp(seconds: i64) -> DateTime<Utc> {
        match DateTime::from_timestamp(seconds, 0) {
            Some(value) => value,
            None => panic!("test timestamp {seconds} out of range"),
        }
    }

    fn trivial_definition() -> WorkflowDefinition {
        match WorkflowDefinition::new("greet", 0, timestamp(0), trivial_state_machine()) {
            Ok(definition) => definition,
            Err(error) => panic!("failed to build test definition: {error}"),
        }
    }

    fn workflow_at(seconds: i64, status: WorkflowStatus) -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            workflow_definition: trivial_definition(),
            status,
            resolved_by_user: false,
            namespace: "default".to_owned(),
            queue: "default".to_owned(),
            input: serde_json::json!({}),
            tags: HashMap::new(),
            retries: Vec::new(),
            retry_for: None,
            jobs: Vec::new(),
            created_at: timestamp(seconds),
            last_updated: timestamp(seconds),
        }
    }

    #[tokio::test]
    async fn definition_versions_increment_from_zero() {
        let store = InMemoryWorkflowStore::new();
        let first = store.save_workflow_definition("greet", trivial_state_machine()).await;
        let second = store.save_workflow_definition("greet", trivial_state_machine()).await;

        let first = match first {
            Ok(definition) => definition,
            Err(error) => panic!("expected Ok, got {error}"),
        };
        let second = match second {
            Ok(definition) => definition,
            Err(error) => panic!("expected Ok, got {error}"),
        };
        assert_eq!(first.version(), 0);
        assert_eq!(second.version(), 1);
    }

    #[tokio::test]
    async fn get_workflow_definition_defaults_to_latest() {
        let store = InMemoryWorkflowStore::new();
        let _ = store.save_workflow_definition("greet", trivial_state_machine()).await;
        let _ = store.save_workflow_definition("greet", trivial_state_machine()).await;

        let latest = store.get_workflow_definition("greet", None).await;
        let latest = match latest {
            Ok(definition) => definition,
            Err(error) => panic!("expected Ok, got {error}"),
        };
        assert_eq!(latest.version(), 1);
    }

    #[tokio::test]
    async fn unknown_definition_is_not_found() {
        let store = InMemoryWorkflowStore::new();
        let result = store.get_workflow_definition("missing", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn definition_versions_lists_full_history() {
        let store = InMemoryWorkflowStore::new();
        let _ = store.save_workflow_definition("greet", trivial_state_machine()).await;
        let _ = store.save_workflow_definition("greet", trivial_state_machine()).await;

        let versions = match store.get_workflow_definition_versions("greet").await {
            Ok(versions) => versions,
            Err(error) => panic!("expected Ok, got {error}"),
        };
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn latest_definitions_lists_one_entry_per_name() {
        let store = InMemoryWorkflowStore::new();
        let _ = store.save_workflow_definition("greet", trivial_state_machine()).await;
        let _ = store.save_workflow_definition("farewell", trivial_state_machine()).await;

        let latest = match store.get_workflow_definitions().await {
            Ok(latest) => latest,
            Err(error) => panic!("expected Ok, got {error}"),
        };
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn oldest_first_pagination_replays_insertion_order() {
        let store = InMemoryWorkflowStore::new();
        let mut inserted = Vec::new();
        for seconds in 0..10 {
            let workflow = workflow_at(seconds, WorkflowStatus::Queued);
            inserted.push(workflow.id);
            let saved = store.save_workflow(workflow).await;
            assert!(saved.is_ok());
        }

        let mut seen = Vec::new();
        let mut page_token = None;
        loop {
            let page = store
                .get_workflows(GetWorkflowsQuery {
                    page_size: 3,
                    page_token,
                    oldest_first: true,
                    ..GetWorkflowsQuery::default()
                })
                .await;
            let page = match page {
                Ok(page) => page,
                Err(error) => panic!("expected Ok, got {error}"),
            };
            seen.extend(page.items.into_iter().map(|workflow| workflow.id));
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        assert_eq!(seen, inserted);
    }

    #[tokio::test]
    async fn pending_scan_omits_terminal_and_orders_by_last_updated() {
        let store = InMemoryWorkflowStore::new();
        let running_first = workflow_at(10, WorkflowStatus::Running);
        let running_second = workflow_at(20, WorkflowStatus::Running);
        let queued = workflow_at(5, WorkflowStatus::Queued);
        let done = workflow_at(1, WorkflowStatus::Succeeded);

        let expected_order = vec![queued.id, running_first.id, running_second.id];

        for workflow in [running_first, running_second, queued, done] {
            let saved = store.save_workflow(workflow).await;
            assert!(saved.is_ok());
        }

        let page = store.get_pending_workflows("default", 10, None).await;
        let page = match page {
            Ok(page) => page,
            Err(error) => panic!("expected Ok, got {error}"),
        };
        let ids: Vec<_> = page.items.into_iter().map(|workflow| workflow.id).collect();
        assert_eq!(ids, expected_order);
        assert!(page.next_page_token.is_none());
    }
}
