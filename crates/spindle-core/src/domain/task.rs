//! Task record: the single source of truth for one unit of work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::status::TaskStatus;

/// The lease marking a task as claimed by an executing worker.
///
/// Invariant: a task carries a lock if and only if its status is Executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLock {
    /// Opaque token identifying the claiming worker.
    pub owner: String,

    /// When the lock was acquired; the hung-task resetter compares this
    /// against the applicable timeout.
    pub locked_at: DateTime<Utc>,
}

/// One unit of deferred work with an opaque payload.
///
/// Design:
/// - Mutated only through `apply()` with a [`TaskChange`], so every store
///   implementation updates records the same way.
/// - The engine never inspects `payload`; handlers own its meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    /// Foreign key into the task type registry.
    pub type_code: String,

    pub status: TaskStatus,

    /// Opaque payload bytes; replaced with continuation data between steps
    /// of a multi-step task.
    pub payload: Vec<u8>,

    /// Caller-supplied correlation key; unique across active tasks when present.
    pub external_ref: Option<String>,

    /// Grouping key for bulk cancel/suspend/unsuspend.
    pub batch_id: Option<String>,

    /// Number of retryable failures so far (not incremented by hung resets).
    pub attempts: u32,

    /// Stage index for multi-step task types.
    pub step: u32,

    pub lock: Option<TaskLock>,

    /// The task is only pollable once this is <= now.
    pub next_run_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// When an execution outcome was last applied.
    pub last_processed_at: Option<DateTime<Utc>>,

    /// Wall-clock duration of the most recent handler run.
    pub last_duration: Option<Duration>,
}

impl TaskRecord {
    pub fn new(id: TaskId, type_code: impl Into<String>, payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            type_code: type_code.into(),
            status: TaskStatus::Queued,
            payload,
            external_ref: None,
            batch_id: None,
            attempts: 0,
            step: 0,
            lock: None,
            next_run_at: now,
            created_at: now,
            updated_at: now,
            last_processed_at: None,
            last_duration: None,
        }
    }

    /// Apply a conditional update. The caller (store) has already verified
    /// the expected prior status; this only mutates fields.
    pub fn apply(&mut self, change: TaskChange, now: DateTime<Utc>) {
        self.status = change.status;
        match change.lock {
            LockChange::Keep => {}
            LockChange::Acquire(lock) => self.lock = Some(lock),
            LockChange::Clear => self.lock = None,
        }
        if let Some(next_run_at) = change.next_run_at {
            self.next_run_at = next_run_at;
        }
        if let Some(attempts) = change.attempts {
            self.attempts = attempts;
        }
        if let Some(step) = change.step {
            self.step = step;
        }
        if let Some(payload) = change.payload {
            self.payload = payload;
        }
        if let Some(at) = change.last_processed_at {
            self.last_processed_at = Some(at);
        }
        if let Some(duration) = change.last_duration {
            self.last_duration = Some(duration);
        }
        self.updated_at = now;
    }

    /// lock is Some <=> status is Executing.
    pub fn lock_invariant_holds(&self) -> bool {
        self.lock.is_some() == (self.status == TaskStatus::Executing)
    }
}

/// How a transition affects the lock field.
#[derive(Debug, Clone, PartialEq)]
pub enum LockChange {
    Keep,
    Acquire(TaskLock),
    Clear,
}

/// Field updates applied together with a status transition.
///
/// Built by the lifecycle core, applied atomically by the store under its
/// conditional-update primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChange {
    pub status: TaskStatus,
    pub lock: LockChange,
    pub next_run_at: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
    pub step: Option<u32>,
    pub payload: Option<Vec<u8>>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
}

impl TaskChange {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            lock: LockChange::Keep,
            next_run_at: None,
            attempts: None,
            step: None,
            payload: None,
            last_processed_at: None,
            last_duration: None,
        }
    }

    pub fn acquire_lock(mut self, lock: TaskLock) -> Self {
        self.lock = LockChange::Acquire(lock);
        self
    }

    pub fn clear_lock(mut self) -> Self {
        self.lock = LockChange::Clear;
        self
    }

    pub fn next_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn processed(mut self, at: DateTime<Utc>, duration: Duration) -> Self {
        self.last_processed_at = Some(at);
        self.last_duration = Some(duration);
        self
    }
}

/// Payload-free view of a task for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub type_code: String,
    pub status: TaskStatus,
    pub external_ref: Option<String>,
    pub batch_id: Option<String>,
    pub attempts: u32,
    pub step: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TaskRecord> for TaskSummary {
    fn from(task: &TaskRecord) -> Self {
        Self {
            id: task.id,
            type_code: task.type_code.clone(),
            status: task.status,
            external_ref: task.external_ref.clone(),
            batch_id: task.batch_id.clone(),
            attempts: task.attempts,
            step: task.step,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Sort order for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSort {
    #[default]
    CreatedAsc,
    CreatedDesc,
    UpdatedAsc,
    UpdatedDesc,
}

/// Filter for task listings. All criteria are ANDed.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub type_code: Option<String>,
    pub batch_id: Option<String>,
    pub sort: TaskSort,
    pub offset: usize,
    pub limit: Option<usize>,
}
