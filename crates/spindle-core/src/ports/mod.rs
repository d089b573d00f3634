//! Ports - the engine's seams to the outside world.
//!
//! Each trait hides an external system or ambient capability:
//! - [`TaskStore`]: the transactional source of truth (active tasks, types,
//!   event log) and the coordination point between engine instances.
//! - [`ArchiveStore`]: cold storage for terminal tasks past retention.
//! - [`TaskHandler`]: the opaque per-type execution capability.
//! - [`Clock`] / [`IdGenerator`]: time and identity, injected for testability.
//!
//! Production store implementations belong in separate crates; this crate
//! ships in-memory implementations under `impls` for development and tests.

pub mod archive_store;
pub mod clock;
pub mod handler;
pub mod id_generator;
pub mod task_store;

pub use self::archive_store::ArchiveStore;
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::handler::{HandlerError, HandlerRegistry, TaskHandler, TaskInput};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{StatusCounts, TaskStore};
