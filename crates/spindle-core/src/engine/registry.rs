//! Task type registry: administrative CRUD over [`TaskTypeConfig`].
//!
//! Validation lives here; the store only persists. The type code is the
//! identity and is immutable once any task references it (updates go
//! through the same code, deletes are refused while tasks exist).

use std::sync::Arc;

use tracing::info;

use crate::domain::{EngineError, TaskTypeConfig};
use crate::ports::TaskStore;

pub struct TaskTypeRegistry {
    store: Arc<dyn TaskStore>,
}

impl TaskTypeRegistry {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, config: TaskTypeConfig) -> Result<(), EngineError> {
        validate(&config)?;
        if self.store.get_task_type(&config.code).await?.is_some() {
            return Err(EngineError::Duplicate(format!(
                "task type '{}'",
                config.code
            )));
        }
        info!(code = %config.code, "task type created");
        self.store.put_task_type(config).await
    }

    /// Replace the configuration of an existing type (same code).
    pub async fn update(&self, config: TaskTypeConfig) -> Result<(), EngineError> {
        validate(&config)?;
        if self.store.get_task_type(&config.code).await?.is_none() {
            return Err(EngineError::TaskTypeNotFound(config.code.clone()));
        }
        info!(code = %config.code, "task type updated");
        self.store.put_task_type(config).await
    }

    pub async fn get(&self, code: &str) -> Result<TaskTypeConfig, EngineError> {
        self.store
            .get_task_type(code)
            .await?
            .ok_or_else(|| EngineError::TaskTypeNotFound(code.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<TaskTypeConfig>, EngineError> {
        self.store.list_task_types().await
    }

    /// Delete a type. Refused while tasks of the type exist in the active
    /// store (archived tasks do not block deletion).
    pub async fn delete(&self, code: &str) -> Result<(), EngineError> {
        if self.store.get_task_type(code).await?.is_none() {
            return Err(EngineError::TaskTypeNotFound(code.to_string()));
        }
        let in_use = self.store.count_tasks_of_type(code).await?;
        if in_use > 0 {
            return Err(EngineError::Conflict(format!(
                "task type '{code}' still has {in_use} task(s)"
            )));
        }
        self.store.remove_task_type(code).await?;
        info!(code, "task type deleted");
        Ok(())
    }
}

fn validate(config: &TaskTypeConfig) -> Result<(), EngineError> {
    if config.code.trim().is_empty() {
        return Err(EngineError::InvalidArgument("type code must not be blank".into()));
    }
    if config.name.trim().is_empty() {
        return Err(EngineError::InvalidArgument("type name must not be blank".into()));
    }
    if config.max_concurrent == Some(0) {
        return Err(EngineError::InvalidArgument(
            "max_concurrent of 0 would never execute; use None for unbounded".into(),
        ));
    }
    if config.retry.multiplier < 1.0 {
        return Err(EngineError::InvalidArgument(
            "retry multiplier must be >= 1.0".into(),
        ));
    }
    if config.retry.max_delay < config.retry.base_delay {
        return Err(EngineError::InvalidArgument(
            "retry max_delay must be >= base_delay".into(),
        ));
    }
    Ok(())
}
