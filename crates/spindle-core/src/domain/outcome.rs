//! Execution outcome model: the result shape a task handler reports.
//!
//! Outcomes are data, not exceptions: a tagged variant type keeps the
//! mapping to lifecycle transitions exhaustive and statically checkable.
//! Each variant maps to exactly one transition:
//!
//! - `Success { next: None }`  -> complete (terminal)
//! - `Success { next: Some }`  -> complete (re-queued for the next step)
//! - `Retry`                   -> requeue with backoff (or fail at the limit)
//! - `Delay`                   -> requeue at an explicit delay, attempts unchanged
//! - `Fail`                    -> fail permanently

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Continuation request from a multi-step handler: run again with this
/// payload, optionally after a delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextStep {
    /// Payload for the next step; replaces the task's current payload.
    pub payload: Vec<u8>,

    /// Optional pause before the next step becomes eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
}

impl NextStep {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            delay: None,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Forward progress; `next` requests another step.
    Success { next: Option<NextStep> },

    /// Transient failure; retry with the type's backoff policy.
    Retry { reason: String },

    /// Not a failure: the handler asks to run again later (e.g. a
    /// rate-limited dependency). The attempt counter is left alone.
    Delay { delay: Duration, reason: Option<String> },

    /// Permanent failure; retrying is pointless.
    Fail { reason: String },
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self::Success { next: None }
    }

    pub fn next_step(next: NextStep) -> Self {
        Self::Success { next: Some(next) }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: reason.into(),
        }
    }

    pub fn delay(delay: Duration) -> Self {
        Self::Delay {
            delay,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
        }
    }
}
