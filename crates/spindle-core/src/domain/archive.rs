//! Archived tasks: cold storage for terminal tasks past retention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::TaskEvent;
use super::task::TaskRecord;

/// A terminal task migrated out of the active store, with its event log.
/// Read-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTask {
    pub task: TaskRecord,
    pub events: Vec<TaskEvent>,
    pub archived_at: DateTime<Utc>,
}
