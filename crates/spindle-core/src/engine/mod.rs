//! Engine - the application layer over the ports.
//!
//! - **lifecycle**: the sole writer of task status transitions.
//! - **registry**: task type administration.
//! - **poller**: dispatch loop + worker pool.
//! - **resetter**: reclaims locks of hung tasks.
//! - **archiver**: moves old terminal tasks to cold storage.
//! - **builder**: wires everything into a running [`Engine`].

pub mod archiver;
pub mod builder;
pub mod lifecycle;
pub mod poller;
pub mod registry;
pub mod resetter;

pub use self::archiver::Archiver;
pub use self::builder::{Engine, EngineBuilder, EngineConfig};
pub use self::lifecycle::{QueueRequest, TaskLifecycle};
pub use self::poller::DispatchPoller;
pub use self::registry::TaskTypeRegistry;
pub use self::resetter::HungTaskResetter;
