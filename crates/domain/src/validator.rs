//! Structural and semantic validation of a [`StateMachine`].
//!
//! Checks run in a fixed order so that the first violation encountered is
//! always the one reported; callers should not rely on later checks running
//! once an earlier one has failed.

use std::collections::HashSet;

use flowctl_core::{AppError, AppResult};

use crate::state_machine::{State, StateMachine};

/// Validates a state machine's shape and a known-resource set.
///
/// Runs, in order:
/// 1. Non-empty states.
/// 2. `startAt` resolves to a declared state.
/// 3. At least one reachable end state (a declared `end: true`, or a
///    Succeed/Fail state, present anywhere in the machine).
/// 4. Per-kind required-attribute checks (Task resource, Choice branches,
///    Wait duration source, Pass result), plus rejection of any state whose
///    `Type` is not one of the seven known kinds.
/// 5. Transition checks: non-end states must name a `next` that resolves to
///    a declared state; Choice states are exempt here and instead have each
///    of their `choices[*].next` checked for resolution.
pub fn validate_state_machine(
    state_machine: &StateMachine,
    known_resources: &HashSet<String>,
) -> AppResult<()> {
    let states = state_machine.states();

    if states.is_empty() {
        return Err(AppError::Validation(
            "state machine must define at least one state".to_owned(),
        ));
    }

    if !states.contains_key(state_machine.start_at()) {
        return Err(AppError::Validation(format!(
            "startAt '{}' does not resolve to a declared state",
            state_machine.start_at()
        )));
    }

    let has_end_state = states
        .values()
        .any(|state| state.declared_end() || state.is_terminal_kind());
    if !has_end_state {
        return Err(AppError::Validation(
            "state machine must declare at least one end state".to_owned(),
        ));
    }

    for (name, state) in states {
        validate_state_shape(name, state, known_resources)?;
    }

    for (name, state) in states {
        validate_transitions(name, state, states)?;
    }

    Ok(())
}

fn validate_state_shape(
    name: &str,
    state: &State,
    known_resources: &HashSet<String>,
) -> AppResult<()> {
    match state {
        State::Task { resource, .. } => {
            if resource.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "state '{name}' must specify resource"
                )));
            }
            if !known_resources.contains(resource) {
                return Err(AppError::Validation(format!(
                    "state '{name}' references unknown resource '{resource}'"
                )));
            }
        }
        State::Choice { choices } => {
            if choices.is_empty() {
                return Err(AppError::Validation(format!(
                    "state '{name}' is a choice state with no choices"
                )));
            }
            for choice in choices {
                if choice.next.trim().is_empty() {
                    return Err(AppError::Validation(format!(
                        "state '{name}' has a choice with no next state"
                    )));
                }
            }
        }
        State::Wait {
            seconds,
            seconds_path,
            timestamp,
            timestamp_path,
            ..
        } => {
            if seconds.is_none() && seconds_path.is_none() && timestamp.is_none() && timestamp_path.is_none() {
                return Err(AppError::Validation(format!(
                    "state '{name}' must specify a seconds parameter or timestamp"
                )));
            }
        }
        State::Pass { result, .. } => {
            let is_empty = match result {
                None => true,
                Some(serde_json::Value::Null) => true,
                _ => false,
            };
            if is_empty {
                return Err(AppError::Validation(format!(
                    "state '{name}' must specify results"
                )));
            }
        }
        State::Parallel { .. } | State::Succeed | State::Fail => {}
        State::Unknown => {
            return Err(AppError::Validation(format!(
                "state '{name}' has invalid state type"
            )));
        }
    }

    Ok(())
}

fn validate_transitions(
    name: &str,
    state: &State,
    states: &std::collections::BTreeMap<String, State>,
) -> AppResult<()> {
    match state {
        State::Choice { choices } => {
            for choice in choices {
                if !states.contains_key(&choice.next) {
                    return Err(AppError::Validation(format!(
                        "state '{name}' has a choice targeting unknown state '{}'",
                        choice.next
                    )));
                }
            }
        }
        State::Succeed | State::Fail | State::Unknown => {}
        other => {
            if other.declared_end() {
                return Ok(());
            }
            match other.declared_next() {
                Some(next) if states.contains_key(next) => {}
                _ => {
                    return Err(AppError::Validation(format!(
                        "state '{name}' must specify next state"
                    )));
                }
            }
        }
    }

    Ok(())
}
