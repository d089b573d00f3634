//! Domain model (ids, task records, task types, events, outcomes, errors).

pub mod archive;
pub mod errors;
pub mod event;
pub mod ids;
pub mod outcome;
pub mod retry;
pub mod status;
pub mod task;
pub mod task_type;

pub use archive::ArchivedTask;
pub use errors::EngineError;
pub use event::{EventKind, TaskEvent};
pub use ids::{EventId, TaskId};
pub use outcome::{NextStep, TaskOutcome};
pub use retry::RetryPolicy;
pub use status::TaskStatus;
pub use task::{LockChange, TaskChange, TaskFilter, TaskLock, TaskRecord, TaskSort, TaskSummary};
pub use task_type::TaskTypeConfig;
