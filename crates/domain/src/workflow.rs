//! Runtime entities: workflow runs, their jobs, state resources, and locks.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use flowctl_core::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state_machine::WorkflowDefinition;

/// Lifecycle status shared by workflows and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// Submitted but not yet claimed by a worker.
    Queued,
    /// Claimed and executing.
    Running,
    /// Completed successfully. Terminal.
    Succeeded,
    /// Completed unsuccessfully. Terminal.
    Failed,
    /// Cancelled before or during execution. Terminal.
    Cancelled,
}

impl WorkflowStatus {
    /// Returns true for the three terminal statuses.
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// One attempt at executing a job, recorded for audit/history purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttempt {
    /// 1-based attempt number within the job.
    pub attempt_number: u32,
    /// Status this attempt concluded with (or `Running` if still in flight).
    pub status: WorkflowStatus,
    /// Optional human-readable status reason.
    pub reason: Option<String>,
    /// When this attempt started.
    pub started_at: DateTime<Utc>,
    /// When this attempt stopped, if it has.
    pub stopped_at: Option<DateTime<Utc>>,
}

/// One step of a workflow run, corresponding to one visited state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier, unique within its workflow.
    pub id: Uuid,
    /// Name of the state this job executes.
    pub state: String,
    /// Current status.
    pub status: WorkflowStatus,
    /// Optional human-readable status reason (e.g. failure cause).
    pub status_reason: Option<String>,
    /// Ordered attempt history, oldest first.
    pub attempts: Vec<JobAttempt>,
    /// Input payload handed to the resource.
    pub input: Value,
    /// Output payload produced by the resource, once available.
    pub output: Option<Value>,
    /// Optional resource container/queue routing hints.
    pub container: Option<String>,
    /// Optional queue this job was dispatched to.
    pub queue: Option<String>,
    /// When this job was created.
    pub created_at: DateTime<Utc>,
    /// When this job started executing, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// When this job stopped, if it has.
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Returns true once the job has reached a terminal status.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }
}

/// A named, namespaced side resource referenced by in-flight jobs.
/// Identified by `(name, namespace)`; later writes overwrite earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    /// Resource name.
    pub name: String,
    /// Namespace the resource belongs to.
    pub namespace: String,
    /// Resource kind (opaque to the domain).
    pub resource_type: String,
    /// Opaque locator (URL, ARN, connection string, ...).
    pub uri: String,
    /// When this record was last upserted.
    pub last_updated: DateTime<Utc>,
}

/// Duration a [`Lock`] is held before it is considered expired.
pub const LOCK_TTL_SECONDS: i64 = 30;

/// An advisory, TTL-bound lock held by a worker on a workflow while it is
/// being evaluated or transitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Workflow this lock guards.
    pub workflow_id: WorkflowId,
    /// When the lock expires and may be reclaimed by another worker.
    pub expires_at: DateTime<Utc>,
    /// Opaque ownership token. A lock backend that enforces compare-and-swap
    /// release/renew (e.g. a Redis Lua script) uses this to refuse to
    /// release or extend a lock it did not issue.
    pub token: String,
}

impl Lock {
    /// Acquires a fresh lock expiring `LOCK_TTL_SECONDS` after `now`, with a
    /// freshly generated ownership token.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, now: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            expires_at: now + Duration::seconds(LOCK_TTL_SECONDS),
            token: Uuid::new_v4().to_string(),
        }
    }

    /// Returns true once `now` has passed the lock's expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One execution of a [`WorkflowDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow run identifier.
    pub id: WorkflowId,
    /// Snapshot of the definition version this run was started from.
    pub workflow_definition: WorkflowDefinition,
    /// Current status.
    pub status: WorkflowStatus,
    /// Whether a human resolved this workflow's terminal status manually.
    pub resolved_by_user: bool,
    /// Logical namespace this run belongs to.
    pub namespace: String,
    /// Queue this run was dispatched to.
    pub queue: String,
    /// Initial input payload.
    pub input: Value,
    /// Free-form caller-supplied tags.
    pub tags: HashMap<String, Value>,
    /// Workflow ids spawned as retries of this run.
    pub retries: Vec<WorkflowId>,
    /// The workflow id this run itself is a retry of, if any.
    pub retry_for: Option<WorkflowId>,
    /// Jobs executed so far, ordered by creation.
    pub jobs: Vec<Job>,
    /// When this run was created.
    pub created_at: DateTime<Utc>,
    /// When this run was last modified.
    pub last_updated: DateTime<Utc>,
}

impl Workflow {
    /// Returns true once every job is done and the run itself is done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status.is_done() && self.jobs.iter().all(Job::is_done)
    }

    /// Returns an independent, deeply-owned copy of this run.
    ///
    /// Store adapters must hand out snapshots rather than shared references
    /// so that a caller mutating its copy cannot corrupt cached or in-memory
    /// state held elsewhere.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}
