//! Task type configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;

/// Configuration shared by all tasks of a kind.
///
/// The `code` is the identity: it is referenced by every task of the type
/// and must never change once a task points at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeConfig {
    /// Unique code; immutable once referenced by a task.
    pub code: String,

    /// Human-readable display name.
    pub name: String,

    /// Maximum concurrent executions of this type. `None` = unbounded.
    pub max_concurrent: Option<u32>,

    /// Maximum retry attempts before a retryable failure becomes permanent.
    pub max_attempts: u32,

    /// Backoff policy for retryable failures.
    pub retry: RetryPolicy,

    /// Hung-task timeout override; falls back to the engine default.
    pub hung_timeout: Option<Duration>,

    /// Disabled types keep their queued tasks frozen: the poller skips them
    /// until the type is re-enabled.
    pub enabled: bool,
}

impl TaskTypeConfig {
    /// A new enabled type with default retry behaviour.
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            max_concurrent: None,
            max_attempts: 3,
            retry: RetryPolicy::default(),
            hung_timeout: None,
            enabled: true,
        }
    }

    pub fn with_max_concurrent(mut self, limit: u32) -> Self {
        self.max_concurrent = Some(limit);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_hung_timeout(mut self, timeout: Duration) -> Self {
        self.hung_timeout = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
