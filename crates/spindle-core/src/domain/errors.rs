//! Engine error taxonomy.
//!
//! Every fallible operation returns `EngineError`. The variants map to the
//! caller-facing classes: argument, not-found, invalid-status (conflict),
//! duplicate, and service-unavailable. Store implementations use
//! `Unavailable` for infrastructure failures and log the detail instead of
//! leaking it through the error message.

use thiserror::Error;

use super::status::TaskStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing, blank, or contradictory caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown task id or external reference.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task type not found: {0}")]
    TaskTypeNotFound(String),

    #[error("no tasks found for batch: {0}")]
    BatchNotFound(String),

    /// Operation attempted against a task in the wrong state.
    #[error("invalid status for operation: current={current}, required one of {required:?}")]
    InvalidStatus {
        current: TaskStatus,
        required: Vec<TaskStatus>,
    },

    /// Creating something that already exists (task type code, external reference).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Operation rejected because of related records (e.g. deleting a task
    /// type that still has tasks).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store or infrastructure failure; retryable from the caller's side.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn invalid_status(current: TaskStatus, required: &[TaskStatus]) -> Self {
        Self::InvalidStatus {
            current,
            required: required.to_vec(),
        }
    }
}
