//! Durable [`WorkflowStore`] backed by Postgres via `sqlx`.
//!
//! Workflow definitions are modeled as a hash/range-key history table
//! (`name`, `version`) plus a latest-pointer row, mirroring a DynamoDB-style
//! definition table. Workflow runs are a single JSONB document keyed by
//! `id`, with `namespace`/`queue`/`status`/`last_updated` promoted to
//! indexed columns that stand in for DynamoDB secondary indexes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_application::{decode_page_token, encode_page_token, GetWorkflowsQuery, Page, WorkflowStore};
use flowctl_core::{AppError, AppResult, WorkflowId};
use flowctl_domain::{StateMachine, StateResource, Workflow, WorkflowDefinition, WorkflowStatus};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder, Row};

/// Cursor encoded into `get_workflows`/`get_pending_workflows` page tokens.
#[derive(Debug, Serialize, Deserialize)]
struct OffsetCursor {
    offset: i64,
}

/// Applies this crate's embedded migrations to `pool`.
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))
}

/// Durable store adapter over a Postgres connection pool.
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn status_label(status: WorkflowStatus) -> &'static str {
        match status {
            WorkflowStatus::Queued => "Queued",
            WorkflowStatus::Running => "Running",
            WorkflowStatus::Succeeded => "Succeeded",
            WorkflowStatus::Failed => "Failed",
            WorkflowStatus::Cancelled => "Cancelled",
        }
    }

    fn definition_from_row(row: sqlx::postgres::PgRow) -> AppResult<WorkflowDefinition> {
        let name: String = row
            .try_get("name")
            .map_err(|error| AppError::Internal(format!("malformed workflow definition row: {error}")))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|error| AppError::Internal(format!("malformed workflow definition row: {error}")))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|error| AppError::Internal(format!("malformed workflow definition row: {error}")))?;
        let state_machine_json: serde_json::Value = row
            .try_get("state_machine")
            .map_err(|error| AppError::Internal(format!("malformed workflow definition row: {error}")))?;
        let state_machine: StateMachine = serde_json::from_value(state_machine_json)
            .map_err(|error| AppError::Internal(format!("failed to decode state machine: {error}")))?;
        let version = u32::try_from(version)
            .map_err(|error| AppError::Internal(format!("version overflowed u32: {error}")))?;

        WorkflowDefinition::new(name, version, created_at, state_machine)
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn save_workflow_definition(
        &self,
        name: &str,
        state_machine: StateMachine,
    ) -> AppResult<WorkflowDefinition> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| AppError::Transient(format!("failed to start transaction: {error}")))?;

        let current_version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM workflow_definitions_latest WHERE name = $1 FOR UPDATE",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| AppError::Transient(format!("failed to lock latest-definition row: {error}")))?;

        let next_version = current_version.map_or(0, |version| version + 1);
        let created_at = Utc::now();
        let state_machine_json = serde_json::to_value(&state_machine)
            .map_err(|error| AppError::Internal(format!("failed to encode state machine: {error}")))?;

        sqlx::query(
            "INSERT INTO workflow_definitions (name, version, created_at, state_machine)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(name)
        .bind(next_version)
        .bind(created_at)
        .bind(&state_machine_json)
        .execute(&mut *tx)
        .await
        .map_err(|error| AppError::Transient(format!("failed to insert definition history row: {error}")))?;

        sqlx::query(
            "INSERT INTO workflow_definitions_latest (name, version) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET version = excluded.version",
        )
        .bind(name)
        .bind(next_version)
        .execute(&mut *tx)
        .await
        .map_err(|error| AppError::Transient(format!("failed to update latest-definition pointer: {error}")))?;

        tx.commit()
            .await
            .map_err(|error| AppError::Transient(format!("failed to commit definition write: {error}")))?;

        let version = u32::try_from(next_version)
            .map_err(|error| AppError::Internal(format!("version overflowed u32: {error}")))?;
        WorkflowDefinition::new(name, version, created_at, state_machine)
    }

    async fn get_workflow_definition(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> AppResult<WorkflowDefinition> {
        let row = match version {
            Some(version) => sqlx::query("SELECT version, created_at, state_machine FROM workflow_definitions WHERE name = $1 AND version = $2")
                .bind(name)
                .bind(i64::from(version))
                .fetch_optional(&self.pool)
                .await,
            None => sqlx::query(
                "SELECT d.version, d.created_at, d.state_machine
                 FROM workflow_definitions d
                 JOIN workflow_definitions_latest l ON l.name = d.name AND l.version = d.version
                 WHERE d.name = $1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await,
        }
        .map_err(|error| AppError::Transient(format!("failed to read workflow definition: {error}")))?;

        let row = row.ok_or_else(|| AppError::NotFound(format!("no such workflow definition '{name}'")))?;

        let version: i64 = row.try_get("version").map_err(|error| {
            AppError::Internal(format!("malformed workflow definition row: {error}"))
        })?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|error| {
            AppError::Internal(format!("malformed workflow definition row: {error}"))
        })?;
        let state_machine_json: serde_json::Value = row.try_get("state_machine").map_err(|error| {
            AppError::Internal(format!("malformed workflow definition row: {error}"))
        })?;
        let state_machine: StateMachine = serde_json::from_value(state_machine_json)
            .map_err(|error| AppError::Internal(format!("failed to decode state machine: {error}")))?;
        let version = u32::try_from(version)
            .map_err(|error| AppError::Internal(format!("version overflowed u32: {error}")))?;

        WorkflowDefinition::new(name, version, created_at, state_machine)
    }

    async fn get_workflow_definitions(&self) -> AppResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query(
            "SELECT d.name, d.version, d.created_at, d.state_machine
             FROM workflow_definitions d
             JOIN workflow_definitions_latest l ON l.name = d.name AND l.version = d.version
             ORDER BY d.name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Transient(format!("failed to list workflow definitions: {error}")))?;

        rows.into_iter().map(Self::definition_from_row).collect()
    }

    async fn get_workflow_definition_versions(&self, name: &str) -> AppResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query(
            "SELECT name, version, created_at, state_machine FROM workflow_definitions
             WHERE name = $1 ORDER BY version ASC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Transient(format!("failed to list workflow definition versions: {error}")))?;

        if rows.is_empty() {
            return Err(AppError::NotFound(format!("no such workflow definition '{name}'")));
        }

        rows.into_iter().map(Self::definition_from_row).collect()
    }

    async fn save_workflow(&self, workflow: Workflow) -> AppResult<Workflow> {
        let document = serde_json::to_value(&workflow)
            .map_err(|error| AppError::Internal(format!("failed to encode workflow: {error}")))?;

        let result = sqlx::query(
            "INSERT INTO workflows (id, namespace, queue, status, created_at, last_updated, document)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(workflow.id.as_uuid())
        .bind(&workflow.namespace)
        .bind(&workflow.queue)
        .bind(Self::status_label(workflow.status))
        .bind(workflow.created_at)
        .bind(workflow.last_updated)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Transient(format!("failed to insert workflow: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!("workflow {} already exists", workflow.id)));
        }

        Ok(workflow)
    }

    async fn update_workflow(
        &self,
        workflow: Workflow,
        expected_last_updated: DateTime<Utc>,
    ) -> AppResult<Workflow> {
        let document = serde_json::to_value(&workflow)
            .map_err(|error| AppError::Internal(format!("failed to encode workflow: {error}")))?;

        let result = sqlx::query(
            "UPDATE workflows
             SET namespace = $2, queue = $3, status = $4, last_updated = $5, document = $6
             WHERE id = $1 AND last_updated = $7",
        )
        .bind(workflow.id.as_uuid())
        .bind(&workflow.namespace)
        .bind(&workflow.queue)
        .bind(Self::status_label(workflow.status))
        .bind(workflow.last_updated)
        .bind(&document)
        .bind(expected_last_updated)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Transient(format!("failed to update workflow: {error}")))?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM workflows WHERE id = $1)")
                .bind(workflow.id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(|error| AppError::Transient(format!("failed to check workflow existence: {error}")))?;

            return if exists {
                Err(AppError::Conflict(format!("workflow {} was modified concurrently", workflow.id)))
            } else {
                Err(AppError::NotFound(format!("no such workflow {}", workflow.id)))
            };
        }

        Ok(workflow)
    }

    async fn get_workflow(&self, id: WorkflowId) -> AppResult<Workflow> {
        let document: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT document FROM workflows WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| AppError::Transient(format!("failed to read workflow: {error}")))?;

        let document = document.ok_or_else(|| AppError::NotFound(format!("no such workflow {id}")))?;
        serde_json::from_value(document)
            .map_err(|error| AppError::Internal(format!("failed to decode workflow: {error}")))
    }

    async fn delete_workflow(&self, id: WorkflowId) -> AppResult<()> {
        sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Transient(format!("failed to delete workflow: {error}")))?;
        Ok(())
    }

    async fn get_workflows(&self, query: GetWorkflowsQuery) -> AppResult<Page<Workflow>> {
        let offset: i64 = match &query.page_token {
            Some(token) => decode_page_token::<OffsetCursor>(token)?.offset,
            None => 0,
        };
        let page_size = i64::from(query.page_size.max(1));

        let mut builder = QueryBuilder::new("SELECT document FROM workflows WHERE 1 = 1");
        if let Some(namespace) = &query.namespace {
            builder.push(" AND namespace = ").push_bind(namespace);
        }
        if let Some(queue) = &query.queue {
            builder.push(" AND queue = ").push_bind(queue);
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(Self::status_label(status));
        }
        if query.oldest_first {
            builder.push(" ORDER BY last_updated ASC LIMIT ");
        } else {
            builder.push(" ORDER BY last_updated DESC LIMIT ");
        }
        builder.push_bind(page_size + 1).push(" OFFSET ").push_bind(offset);

        let rows: Vec<serde_json::Value> = builder
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(|error| AppError::Transient(format!("failed to list workflows: {error}")))?;

        let has_more = rows.len() as i64 > page_size;
        let mut items = Vec::with_capacity(rows.len());
        for document in rows.into_iter().take(page_size as usize) {
            let mut workflow: Workflow = serde_json::from_value(document)
                .map_err(|error| AppError::Internal(format!("failed to decode workflow: {error}")))?;
            if query.summary_only {
                workflow.jobs.clear();
            }
            items.push(workflow);
        }

        let next_page_token = if has_more {
            Some(encode_page_token(&OffsetCursor {
                offset: offset + page_size,
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
        let offset: i64 = match &page_token {
            Some(token) => decode_page_token::<OffsetCursor>(token)?.offset,
            None => 0,
        };
        let page_size = i64::from(page_size.max(1));

        let rows: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT document FROM workflows
             WHERE namespace = $1 AND status IN ('Queued', 'Running')
             ORDER BY last_updated ASC
             LIMIT $2 OFFSET $3",
        )
        .bind(namespace)
        .bind(page_size + 1)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Transient(format!("failed to scan pending workflows: {error}")))?;

        let has_more = rows.len() as i64 > page_size;
        let mut items = Vec::with_capacity(rows.len());
        for document in rows.into_iter().take(page_size as usize) {
            let workflow: Workflow = serde_json::from_value(document)
                .map_err(|error| AppError::Internal(format!("failed to decode workflow: {error}")))?;
            items.push(workflow);
        }

        let next_page_token = if has_more {
            Some(encode_page_token(&OffsetCursor {
                offset: offset + page_size,
            })?)
        } else {
            None
        };

        Ok(Page { items, next_page_token })
    }

    async fn save_state_resource(&self, resource: StateResource) -> AppResult<StateResource> {
        sqlx::query(
            "INSERT INTO state_resources (name, namespace, resource_type, uri, last_updated)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (name, namespace) DO UPDATE
             SET resource_type = excluded.resource_type, uri = excluded.uri, last_updated = excluded.last_updated",
        )
        .bind(&resource.name)
        .bind(&resource.namespace)
        .bind(&resource.resource_type)
        .bind(&resource.uri)
        .bind(resource.last_updated)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Transient(format!("failed to upsert state resource: {error}")))?;

        Ok(resource)
    }

    async fn get_state_resource(&self, name: &str, namespace: &str) -> AppResult<StateResource> {
        let row = sqlx::query(
            "SELECT name, namespace, resource_type, uri, last_updated FROM state_resources
             WHERE name = $1 AND namespace = $2",
        )
        .bind(name)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Transient(format!("failed to read state resource: {error}")))?;

        let row = row.ok_or_else(|| AppError::NotFound(format!("no such state resource {name}/{namespace}")))?;

        Ok(StateResource {
            name: row
                .try_get("name")
                .map_err(|error| AppError::Internal(format!("malformed state resource row: {error}")))?,
            namespace: row
                .try_get("namespace")
                .map_err(|error| AppError::Internal(format!("malformed state resource row: {error}")))?,
            resource_type: row
                .try_get("resource_type")
                .map_err(|error| AppError::Internal(format!("malformed state resource row: {error}")))?,
            uri: row
                .try_get("uri")
                .map_err(|error| AppError::Internal(format!("malformed state resource row: {error}")))?,
            last_updated: row
                .try_get("last_updated")
                .map_err(|error| AppError::Internal(format!("malformed state resource row: {error}")))?,
        })
    }

    async fn delete_state_resource(&self, name: &str, namespace: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM state_resources WHERE name = $1 AND namespace = $2")
            .bind(name)
            .bind(namespace)
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Transient(format!("failed to delete state resource: {error}")))?;
        Ok(())
    }
}
