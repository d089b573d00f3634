//! In-memory archive store (development/testing).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ArchivedTask, EngineError, TaskId};
use crate::ports::ArchiveStore;

#[derive(Default)]
pub struct InMemoryArchiveStore {
    entries: Arc<Mutex<HashMap<TaskId, ArchivedTask>>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn store(&self, entry: ArchivedTask) -> Result<(), EngineError> {
        let mut entries = self.entries.lock().await;
        entries.insert(entry.task.id, entry);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<ArchivedTask>, EngineError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&id).cloned())
    }

    async fn len(&self) -> Result<usize, EngineError> {
        let entries = self.entries.lock().await;
        Ok(entries.len())
    }
}
