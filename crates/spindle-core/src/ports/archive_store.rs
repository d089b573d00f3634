//! ArchiveStore port - cold storage for terminal tasks.
//!
//! Entries are written once by the archiver and never mutated. They are
//! excluded from all active-store queries; the only read path is by id.

use async_trait::async_trait;

use crate::domain::{ArchivedTask, EngineError, TaskId};

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn store(&self, entry: ArchivedTask) -> Result<(), EngineError>;

    async fn get(&self, id: TaskId) -> Result<Option<ArchivedTask>, EngineError>;

    async fn len(&self) -> Result<usize, EngineError>;
}
