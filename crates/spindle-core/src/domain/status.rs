//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Queued -> Executing (lock acquired by a poller)
/// - Executing -> Completed (success, no next step)
/// - Executing -> Queued (next step / retryable failure with attempts left / delay / hung reset)
/// - Executing -> Failed (non-retryable failure, or retry limit exhausted)
/// - Queued | Suspended -> Cancelled
/// - Queued -> Suspended -> Queued
///
/// Executing is never a valid source for cancel/suspend: cancellation is
/// cooperative and only keeps a task from being picked up.
///
/// Design note: an enum keeps outcome handling exhaustive and makes invalid
/// states unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Eligible for execution once `next_run_at` has passed.
    Queued,

    /// Claimed by a worker; the lock (owner, timestamp) is set.
    Executing,

    /// Parked by an operator; invisible to the poller.
    Suspended,

    /// Finished successfully (terminal).
    Completed,

    /// Failed permanently (terminal).
    Failed,

    /// Cancelled before execution (terminal).
    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions, archival only)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Can a task in this state be cancelled?
    pub fn can_cancel(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Suspended)
    }

    /// Can a task in this state be suspended?
    pub fn can_suspend(self) -> bool {
        matches!(self, TaskStatus::Queued)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Suspended => "SUSPENDED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
