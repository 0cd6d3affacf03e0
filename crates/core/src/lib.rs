//! Shared primitives for all Rust crates in flowctl.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type used across flowctl crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Workflow identifier. Always a UUID v4 per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    /// Creates a fresh random workflow identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for WorkflowId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid workflow id '{value}': {error}")))
    }
}

/// Common application error categories.
///
/// Variants map onto the error taxonomy a store caller must branch on:
/// [`AppError::Conflict`]/[`AppError::NotFound`] are locally recovered at the
/// store boundary from conditional-write failures, [`AppError::Locked`] and
/// [`AppError::InvalidPageToken`] are caller-visible contention/decode
/// signals, and [`AppError::Validation`]/[`AppError::Internal`] surface
/// unchanged.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant (validator failures, malformed requests).
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state (unique-key violation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A workflow lock is held by another caller.
    #[error("workflow locked: {0}")]
    Locked(String),

    /// A page token failed to decode.
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    /// Transient I/O failure; callers may retry with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Internal unexpected error (encode/decode failures, programmer error).
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::{NonEmptyString, WorkflowId};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn workflow_id_formats_as_uuid() {
        let workflow_id = WorkflowId::new();
        assert_eq!(workflow_id.to_string().len(), 36);
    }

    #[test]
    fn workflow_id_round_trips_through_str() {
        let workflow_id = WorkflowId::new();
        let parsed: Result<WorkflowId, _> = workflow_id.to_string().parse();
        assert_eq!(parsed.ok(), Some(workflow_id));
    }
}
