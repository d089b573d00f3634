//! spindle-core
//!
//! A task execution engine: queue tasks, execute them on a bounded worker
//! pool, retry with backoff, recover hung work, archive old results.
//!
//! # Module layout
//! - **domain**: the model (ids, status, task, task_type, outcome, event,
//!   retry, archive, errors)
//! - **ports**: abstraction layer (TaskStore, ArchiveStore, TaskHandler,
//!   Clock, IdGenerator)
//! - **engine**: application logic (lifecycle, registry, poller, resetter,
//!   archiver, builder)
//! - **impls**: in-memory port implementations for development and tests

pub mod domain;
pub mod engine;
pub mod impls;
pub mod ports;
