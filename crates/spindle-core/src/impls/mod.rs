//! Impls - port implementations bundled with the engine.
//!
//! Only in-memory stores live here (development and tests). Production
//! implementations belong in separate crates, e.g. a `spindle-pg` crate
//! mapping the conditional updates onto `UPDATE ... WHERE status = $expected`.

pub mod inmem_archive;
pub mod inmem_store;

pub use self::inmem_archive::InMemoryArchiveStore;
pub use self::inmem_store::InMemoryTaskStore;
