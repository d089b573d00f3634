//! TaskStore port - the persistent, transactional source of truth.
//!
//! The store is the single coordination point between engine instances:
//! multiple pollers may share one logical queue as long as the store honours
//! the two atomicity contracts below. A relational implementation maps
//! `lock_next_eligible` and `transition` to conditional UPDATEs keyed on the
//! expected prior status; the bundled in-memory implementation serializes
//! them under one mutex.
//!
//! Atomicity contracts:
//! - `lock_next_eligible` is a single select-and-transition: concurrent
//!   callers never receive the same task.
//! - `transition` applies its change only if the current status is one of
//!   the expected values; losers of a race get `InvalidStatus` and no write
//!   happens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    EngineError, TaskChange, TaskEvent, TaskFilter, TaskId, TaskLock, TaskRecord, TaskStatus,
    TaskSummary, TaskTypeConfig,
};

/// Counts of active tasks per status (observability view).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub executing: usize,
    pub suspended: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    // ----- task type registry records -----

    /// Insert or replace a task type configuration.
    async fn put_task_type(&self, config: TaskTypeConfig) -> Result<(), EngineError>;

    async fn get_task_type(&self, code: &str) -> Result<Option<TaskTypeConfig>, EngineError>;

    async fn list_task_types(&self) -> Result<Vec<TaskTypeConfig>, EngineError>;

    /// Remove a type configuration. Policy (refusing removal while tasks
    /// exist) lives in the registry, not here.
    async fn remove_task_type(&self, code: &str) -> Result<bool, EngineError>;

    async fn count_tasks_of_type(&self, code: &str) -> Result<usize, EngineError>;

    // ----- tasks -----

    /// Insert a new task. Fails with `Duplicate` if the external reference
    /// is already present on an active task.
    async fn insert_task(&self, task: TaskRecord) -> Result<(), EngineError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, EngineError>;

    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<TaskRecord>, EngineError>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, EngineError>;

    async fn list_by_batch(&self, batch_id: &str) -> Result<Vec<TaskRecord>, EngineError>;

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, EngineError>;

    /// Terminal tasks whose `updated_at` is before `cutoff` (archiver input).
    async fn list_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, EngineError>;

    /// Remove a task and its events. Returns false if the task was absent.
    async fn delete_task(&self, id: TaskId) -> Result<bool, EngineError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, EngineError>;

    // ----- atomic conditional updates -----

    /// Atomically pick one eligible task and mark it Executing with `lock`.
    ///
    /// Eligible: status Queued, `next_run_at <= now`, type enabled, and the
    /// type's concurrency limit not reached. Oldest eligible first
    /// (`next_run_at`, then `created_at`). Returns the task as locked, or
    /// None if nothing is eligible.
    async fn lock_next_eligible(
        &self,
        now: DateTime<Utc>,
        lock: TaskLock,
    ) -> Result<Option<TaskRecord>, EngineError>;

    /// Compare-and-swap transition: apply `change` only if the task's
    /// current status is in `expected`. Returns the updated record, or
    /// `InvalidStatus` naming the current status when the precondition
    /// fails, or `TaskNotFound`.
    async fn transition(
        &self,
        id: TaskId,
        expected: &[TaskStatus],
        change: TaskChange,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, EngineError>;

    // ----- event log (append-only) -----

    async fn append_event(&self, event: TaskEvent) -> Result<(), EngineError>;

    async fn list_events(&self, task_id: TaskId) -> Result<Vec<TaskEvent>, EngineError>;
}
