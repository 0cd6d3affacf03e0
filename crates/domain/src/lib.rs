//! Pure domain types for flowctl: the workflow-definition state machine, its
//! validator, runtime entities, and lifecycle/status rules. Nothing in this
//! crate performs I/O.

#![forbid(unsafe_code)]

mod lifecycle;
mod state_machine;
mod validator;
mod workflow;

pub use lifecycle::{
    job_is_done, validate_transition, workflow_is_done, workflow_status_is_done,
    workflow_status_metric, ExternalRuntimeStatus,
};
pub use state_machine::{
    require_non_empty_states, ChoiceRule, State, StateMachine, WorkflowDefinition,
};
pub use validator::validate_state_machine;
pub use workflow::{Job, JobAttempt, Lock, StateResource, Workflow, WorkflowStatus, LOCK_TTL_SECONDS};
