//! State-machine shape of a workflow definition.

use std::collections::BTreeMap;

use flowctl_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One branch entry of a Choice state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceRule {
    /// State this branch transitions to when selected.
    pub next: String,
    /// Opaque condition payload (variable/operator/value); not interpreted by the validator.
    #[serde(flatten)]
    pub condition: Value,
}

/// A tagged state in a [`StateMachine`]. Discriminated on the wire by `Type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum State {
    /// Invokes an external task resource.
    Task {
        /// Resource identifier this state invokes.
        #[serde(rename = "Resource")]
        resource: String,
        /// Heartbeat interval the runtime enforces while the task executes.
        #[serde(rename = "HeartbeatSeconds")]
        heartbeat_seconds: Option<u64>,
        /// Opaque retry policy; not interpreted by the validator.
        #[serde(rename = "Retry")]
        retry: Option<Value>,
        /// Opaque catch policy; not interpreted by the validator.
        #[serde(rename = "Catch")]
        catch: Option<Value>,
        /// Whether this state terminates the machine.
        #[serde(rename = "End", default)]
        end: bool,
        /// Next state name when `end` is false.
        #[serde(rename = "Next")]
        next: Option<String>,
    },
    /// Branches to one of several next states based on opaque conditions.
    Choice {
        /// Branch entries; each names its own `next` state.
        #[serde(rename = "Choices")]
        choices: Vec<ChoiceRule>,
    },
    /// Pauses for a fixed duration or until a timestamp.
    Wait {
        /// Fixed wait duration in seconds.
        #[serde(rename = "Seconds")]
        seconds: Option<u64>,
        /// Payload path resolving to a wait duration in seconds.
        #[serde(rename = "SecondsPath")]
        seconds_path: Option<String>,
        /// Fixed wait deadline.
        #[serde(rename = "Timestamp")]
        timestamp: Option<String>,
        /// Payload path resolving to a wait deadline.
        #[serde(rename = "TimestampPath")]
        timestamp_path: Option<String>,
        /// Whether this state terminates the machine.
        #[serde(rename = "End", default)]
        end: bool,
        /// Next state name when `end` is false.
        #[serde(rename = "Next")]
        next: Option<String>,
    },
    /// Produces a fixed result without invoking a resource.
    Pass {
        /// Result value substituted for this state's output.
        #[serde(rename = "Result")]
        result: Option<Value>,
        /// Whether this state terminates the machine.
        #[serde(rename = "End", default)]
        end: bool,
        /// Next state name when `end` is false.
        #[serde(rename = "Next")]
        next: Option<String>,
    },
    /// Executes branches concurrently; branches may be empty per current contract.
    Parallel {
        /// Nested state machines executed concurrently.
        #[serde(rename = "Branches", default)]
        branches: Vec<StateMachine>,
        /// Whether this state terminates the machine.
        #[serde(rename = "End", default)]
        end: bool,
        /// Next state name when `end` is false.
        #[serde(rename = "Next")]
        next: Option<String>,
    },
    /// Terminal success state.
    Succeed,
    /// Terminal failure state.
    Fail,
    /// Catch-all for any `Type` value outside the known kind set. The
    /// validator rejects these explicitly rather than failing at decode time,
    /// so a document with an unrecognized state type still produces a
    /// validator error rather than a generic parse failure.
    #[serde(other)]
    Unknown,
}

impl State {
    /// Returns the stable kind name used in validator error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Task { .. } => "Task",
            Self::Choice { .. } => "Choice",
            Self::Wait { .. } => "Wait",
            Self::Pass { .. } => "Pass",
            Self::Parallel { .. } => "Parallel",
            Self::Succeed => "Succeed",
            Self::Fail => "Fail",
            Self::Unknown => "Unknown",
        }
    }

    /// Returns true for states that are terminal regardless of a declared `end` flag.
    #[must_use]
    pub fn is_terminal_kind(&self) -> bool {
        matches!(self, Self::Succeed | Self::Fail)
    }

    /// Returns the literal `end` flag for kinds that carry one (false for Choice/Succeed/Fail/Unknown).
    #[must_use]
    pub fn declared_end(&self) -> bool {
        match self {
            Self::Task { end, .. } | Self::Wait { end, .. } | Self::Pass { end, .. } | Self::Parallel { end, .. } => {
                *end
            }
            Self::Choice { .. } | Self::Succeed | Self::Fail | Self::Unknown => false,
        }
    }

    /// Returns the declared `next` state name for kinds that carry one.
    #[must_use]
    pub fn declared_next(&self) -> Option<&str> {
        match self {
            Self::Task { next, .. } | Self::Wait { next, .. } | Self::Pass { next, .. } | Self::Parallel { next, .. } => {
                next.as_deref()
            }
            Self::Choice { .. } | Self::Succeed | Self::Fail | Self::Unknown => None,
        }
    }
}

/// The declarative graph of states composing one workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachine {
    /// Name of the entry state; must be a key of `states`.
    pub start_at: String,
    /// States keyed by name. Map semantics already guarantee unique keys.
    pub states: BTreeMap<String, State>,
    /// Optional free-text description.
    pub comment: Option<String>,
    /// State-language dialect version.
    pub version: String,
    /// Optional overall execution timeout.
    pub timeout_seconds: Option<u64>,
}

impl StateMachine {
    /// Returns the states map.
    #[must_use]
    pub fn states(&self) -> &BTreeMap<String, State> {
        &self.states
    }

    /// Returns the entry state name.
    #[must_use]
    pub fn start_at(&self) -> &str {
        self.start_at.as_str()
    }
}

/// A named, versioned state machine. Identified by `(name, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    name: NonEmptyString,
    version: u32,
    created_at: chrono::DateTime<chrono::Utc>,
    state_machine: StateMachine,
}

impl WorkflowDefinition {
    /// Builds a definition snapshot. Structural/semantic validation of the state
    /// machine is a separate pass (see [`crate::validate_state_machine`]); this
    /// constructor only enforces that `name` is non-empty.
    pub fn new(
        name: impl Into<String>,
        version: u32,
        created_at: chrono::DateTime<chrono::Utc>,
        state_machine: StateMachine,
    ) -> AppResult<Self> {
        Ok(Self {
            name: NonEmptyString::new(name)?,
            version,
            created_at,
            state_machine,
        })
    }

    /// Returns the definition name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the definition version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the timestamp the store stamped this version with.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    /// Returns the state machine.
    #[must_use]
    pub fn state_machine(&self) -> &StateMachine {
        &self.state_machine
    }

    /// Returns a copy with `version`/`created_at` stamped, as the store does on write.
    #[must_use]
    pub fn stamped(&self, version: u32, created_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            name: self.name.clone(),
            version,
            created_at,
            state_machine: self.state_machine.clone(),
        }
    }
}

/// Raised when the state-machine shape itself cannot be represented, independent
/// of the semantic validator (e.g. a caller building a definition by hand).
pub fn require_non_empty_states(state_machine: &StateMachine) -> AppResult<()> {
    if state_machine.states.is_empty() {
        return Err(AppError::Validation(
            "state machine must define at least one state".to_owned(),
        ));
    }

    Ok(())
}
