//! IdGenerator port - ID and lock-token generation.
//!
//! ULIDs sort by creation time and need no coordination between engine
//! instances. The generator takes a [`Clock`] so tests with a fixed clock
//! produce IDs with deterministic timestamp components.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{EventId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn event_id(&self) -> EventId;

    /// Opaque lock-owner token, unique per lease.
    fn lock_token(&self) -> String;
}

/// ULID-based generator (production default).
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn task_id(&self) -> TaskId {
        TaskId::from_ulid(self.next_ulid())
    }

    fn event_id(&self) -> EventId {
        EventId::from_ulid(self.next_ulid())
    }

    fn lock_token(&self) -> String {
        format!("lock-{}", self.next_ulid())
    }
}
