//! Task event log entries.
//!
//! Events are append-only: never updated, deleted only when their owning
//! task is deleted or migrated to the archive alongside it. Lookups are by
//! task id, so no back-references are needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{EventId, TaskId};

/// What happened to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Queued,
    Locked,
    Completed,
    Failed,
    Requeued,
    Delayed,
    Suspended,
    Unsuspended,
    Cancelled,
    /// Lock reclaimed (hung-task reset or startup recovery).
    Reset,
    /// Safety-net unlock after a failure in outcome handling.
    Unlocked,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Queued => "queued",
            EventKind::Locked => "locked",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Requeued => "requeued",
            EventKind::Delayed => "delayed",
            EventKind::Suspended => "suspended",
            EventKind::Unsuspended => "unsuspended",
            EventKind::Cancelled => "cancelled",
            EventKind::Reset => "reset",
            EventKind::Unlocked => "unlocked",
        };
        f.write_str(s)
    }
}

/// One append-only log record for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: EventId,
    pub task_id: TaskId,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub message: Option<String>,
}

impl TaskEvent {
    pub fn new(id: EventId, task_id: TaskId, kind: EventKind, at: DateTime<Utc>) -> Self {
        Self {
            id,
            task_id,
            kind,
            at,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
