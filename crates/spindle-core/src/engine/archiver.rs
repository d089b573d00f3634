//! Archiver: moves terminal tasks past retention into cold storage.
//!
//! Copy-then-delete, in that order. If the process dies between the two
//! writes the task exists in both stores and the next sweep deletes the
//! active copy, so a task is never lost, only briefly duplicated.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::{ArchivedTask, EngineError};
use crate::ports::{ArchiveStore, Clock, TaskStore};

pub struct Archiver {
    store: Arc<dyn TaskStore>,
    archive: Arc<dyn ArchiveStore>,
    clock: Arc<dyn Clock>,
    /// How long terminal tasks stay queryable in the active store.
    retention: Duration,
    interval: Duration,
}

impl Archiver {
    pub fn new(
        store: Arc<dyn TaskStore>,
        archive: Arc<dyn ArchiveStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            archive,
            clock,
            retention,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "archive sweep failed");
            }
        }
        debug!("archiver stopped");
    }

    /// One sweep: archive every terminal task untouched for the retention
    /// window. Returns how many were moved.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let cutoff =
            now - ChronoDuration::from_std(self.retention).unwrap_or(ChronoDuration::MAX);
        let expired = self.store.list_terminal_before(cutoff).await?;
        let mut moved = 0;

        for task in expired {
            let id = task.id;
            let events = self.store.list_events(id).await?;
            self.archive
                .store(ArchivedTask {
                    task,
                    events,
                    archived_at: now,
                })
                .await?;
            self.store.delete_task(id).await?;
            moved += 1;
        }
        if moved > 0 {
            info!(count = moved, "archived terminal tasks");
        }
        Ok(moved)
    }
}
