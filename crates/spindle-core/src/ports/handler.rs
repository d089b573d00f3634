//! TaskHandler port - the opaque execution capability.
//!
//! The engine never interprets payloads; it hands them to the handler
//! registered for the task's type and maps the returned [`TaskOutcome`]
//! to exactly one lifecycle transition.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{EngineError, TaskId, TaskOutcome};

/// Boxed error for handler failures (the usual async-ecosystem error type).
///
/// A handler `Err` is an unexpected failure, treated as retryable; handlers
/// signal deliberate terminal failure with [`TaskOutcome::Fail`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a handler gets to see about its task.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task_id: TaskId,
    pub type_code: String,
    /// Current stage of a multi-step task (0 for the first run).
    pub step: u32,
    /// Retryable failures so far.
    pub attempt: u32,
    /// Opaque payload; for steps > 0 this is the previous step's continuation data.
    pub payload: Vec<u8>,
}

/// A handler for one task type.
///
/// Handlers must be idempotent or safe to retry: a worker crash after
/// partial side effects leads to re-execution.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, input: TaskInput) -> Result<TaskOutcome, HandlerError>;
}

/// Registry of handlers (type code -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, behind `Arc`).
/// This avoids locks on the hot path.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        type_code: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), EngineError> {
        let type_code = type_code.into();
        if self.handlers.contains_key(&type_code) {
            return Err(EngineError::Duplicate(format!(
                "handler for task type '{type_code}' is already registered"
            )));
        }
        self.handlers.insert(type_code, handler);
        Ok(())
    }

    pub fn get(&self, type_code: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(type_code).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
