//! Status mapping and transition rules shared by workflows and jobs.

use flowctl_core::AppError;

use crate::workflow::{Job, Workflow, WorkflowStatus};

/// Raw status codes reported by the external execution runtime, before being
/// folded down into the five-value [`WorkflowStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalRuntimeStatus {
    /// Runtime reports the task as in flight.
    Running,
    /// Runtime reports successful completion.
    Succeeded,
    /// Runtime reports failed completion.
    Failed,
    /// Runtime reports the task exceeded its deadline.
    TimedOut,
    /// Runtime reports the task was aborted externally.
    Aborted,
    /// Any status code the mapping does not recognize.
    Other(String),
}

impl ExternalRuntimeStatus {
    /// Parses a raw runtime status code.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "TIMED_OUT" => Self::TimedOut,
            "ABORTED" => Self::Aborted,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Maps a raw runtime status onto the domain's five-value status.
    ///
    /// `TIMED_OUT` folds into `Failed` and any unrecognized code conservatively
    /// folds into `Queued` rather than being assumed terminal.
    #[must_use]
    pub fn map_to_workflow_status(&self) -> WorkflowStatus {
        match self {
            Self::Running => WorkflowStatus::Running,
            Self::Succeeded => WorkflowStatus::Succeeded,
            Self::Failed | Self::TimedOut => WorkflowStatus::Failed,
            Self::Aborted => WorkflowStatus::Cancelled,
            Self::Other(_) => WorkflowStatus::Queued,
        }
    }
}

/// Projects a status onto a signed metric contribution: `-1` for a
/// cancellation, `+1` for a failure, `0` otherwise.
#[must_use]
pub fn workflow_status_metric(status: WorkflowStatus) -> i8 {
    match status {
        WorkflowStatus::Cancelled => -1,
        WorkflowStatus::Failed => 1,
        WorkflowStatus::Queued | WorkflowStatus::Running | WorkflowStatus::Succeeded => 0,
    }
}

/// Returns true once a workflow status has reached a terminal value.
#[must_use]
pub fn workflow_status_is_done(status: WorkflowStatus) -> bool {
    status.is_done()
}

/// Returns true once a job has reached a terminal status.
#[must_use]
pub fn job_is_done(job: &Job) -> bool {
    job.is_done()
}

/// Returns true once a workflow and every one of its jobs are done.
#[must_use]
pub fn workflow_is_done(workflow: &Workflow) -> bool {
    workflow.is_done()
}

/// Validates that `next` is a legal successor of `current`.
///
/// `Queued` may move to `Running`, `Cancelled`, or directly to `Failed`
/// (a workflow can fail before its first job ever starts). `Running` may
/// move to `Succeeded`, `Failed`, or `Cancelled`. No transition is legal out
/// of a terminal status; cancelling or resolving a terminal workflow is
/// handled separately as an idempotent no-op rather than a transition.
pub fn validate_transition(current: WorkflowStatus, next: WorkflowStatus) -> Result<(), AppError> {
    let allowed = match current {
        WorkflowStatus::Queued => matches!(
            next,
            WorkflowStatus::Running | WorkflowStatus::Cancelled | WorkflowStatus::Failed
        ),
        WorkflowStatus::Running => matches!(
            next,
            WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        ),
        WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::Cancelled => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "cannot transition workflow from {current:?} to {next:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        validate_transition, workflow_status_metric, ExternalRuntimeStatus,
    };
    use crate::workflow::WorkflowStatus;

    #[test]
    fn maps_known_runtime_statuses() {
        assert_eq!(
            ExternalRuntimeStatus::parse("RUNNING").map_to_workflow_status(),
            WorkflowStatus::Running
        );
        assert_eq!(
            ExternalRuntimeStatus::parse("TIMED_OUT").map_to_workflow_status(),
            WorkflowStatus::Failed
        );
        assert_eq!(
            ExternalRuntimeStatus::parse("ABORTED").map_to_workflow_status(),
            WorkflowStatus::Cancelled
        );
    }

    #[test]
    fn unrecognized_runtime_status_is_conservative() {
        assert_eq!(
            ExternalRuntimeStatus::parse("WEIRD").map_to_workflow_status(),
            WorkflowStatus::Queued
        );
    }

    #[test]
    fn metric_projection_matches_table() {
        assert_eq!(workflow_status_metric(WorkflowStatus::Cancelled), -1);
        assert_eq!(workflow_status_metric(WorkflowStatus::Failed), 1);
        assert_eq!(workflow_status_metric(WorkflowStatus::Succeeded), 0);
        assert_eq!(workflow_status_metric(WorkflowStatus::Running), 0);
        assert_eq!(workflow_status_metric(WorkflowStatus::Queued), 0);
    }

    #[test]
    fn queued_may_start_cancel_or_fail() {
        assert!(validate_transition(WorkflowStatus::Queued, WorkflowStatus::Running).is_ok());
        assert!(validate_transition(WorkflowStatus::Queued, WorkflowStatus::Cancelled).is_ok());
        assert!(validate_transition(WorkflowStatus::Queued, WorkflowStatus::Failed).is_ok());
        assert!(validate_transition(WorkflowStatus::Queued, WorkflowStatus::Succeeded).is_err());
    }

    #[test]
    fn terminal_statuses_accept_no_transition() {
        assert!(validate_transition(WorkflowStatus::Succeeded, WorkflowStatus::Running).is_err());
        assert!(validate_transition(WorkflowStatus::Cancelled, WorkflowStatus::Queued).is_err());
    }
}
