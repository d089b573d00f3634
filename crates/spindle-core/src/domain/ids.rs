//! Domain identifiers (strongly-typed IDs).
//!
//! IDs are ULIDs (Universally Unique Lexicographically Sortable Identifiers)
//! wrapped in a phantom-typed `Id<T>`:
//! - sortable by creation time (the timestamp is the leading component)
//! - generatable on any node without coordination
//! - `TaskId` and `EventId` are distinct types and cannot be mixed up

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID type.
///
/// Provides the prefix used by `Display` ("task-", "event-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ID type.
///
/// `T` is `PhantomData`: it costs nothing at runtime but makes each ID a
/// distinct compile-time type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker type for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Marker type for task events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "event-"
    }
}

/// Identifier of a Task (one unit of deferred work).
pub type TaskId = Id<Task>;

/// Identifier of a TaskEvent (one append-only log entry).
pub type EventId = Id<Event>;
