//! Hung-task resetter.
//!
//! The engine's defense against crashed workers: any task still Executing
//! past its timeout gets its lock reclaimed and goes back to the queue.
//! A hang is not counted as a failed attempt, since the handler may never
//! have run to completion.
//!
//! Together with the store's atomic lock acquisition this is the core
//! correctness mechanism against lost or duplicated work: the reset itself
//! is a compare-and-swap keyed on Executing, so a worker finishing at the
//! same instant wins or loses cleanly, never both.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::domain::{EngineError, EventKind, TaskChange, TaskEvent, TaskStatus};
use crate::ports::{Clock, IdGenerator, TaskStore};

pub struct HungTaskResetter {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    /// Applies when the task's type carries no override.
    default_timeout: Duration,
    interval: Duration,
}

impl HungTaskResetter {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        default_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            default_timeout,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick; startup recovery already ran.
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
                warn!(error = %e, "hung-task sweep failed");
            }
        }
        debug!("hung-task resetter stopped");
    }

    /// One sweep: reset every task locked longer than its applicable
    /// timeout. Returns how many were reset.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let executing = self.store.list_by_status(TaskStatus::Executing).await?;
        let mut reset = 0;

        for task in executing {
            let Some(lock) = &task.lock else {
                // Violates the lock invariant; leave it to be noticed rather
                // than guessing a lock age.
                warn!(task_id = %task.id, "executing task without a lock");
                continue;
            };

            let timeout = match self.store.get_task_type(&task.type_code).await? {
                Some(config) => config.hung_timeout.unwrap_or(self.default_timeout),
                None => self.default_timeout,
            };
            let cutoff = now
                - ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::MAX);
            if lock.locked_at > cutoff {
                continue;
            }

            // The worker may finish concurrently; losing that race is fine.
            match self
                .store
                .transition(
                    task.id,
                    &[TaskStatus::Executing],
                    TaskChange::to(TaskStatus::Queued)
                        .clear_lock()
                        .next_run_at(now),
                    now,
                )
                .await
            {
                Ok(_) => {
                    self.store
                        .append_event(
                            TaskEvent::new(self.ids.event_id(), task.id, EventKind::Reset, now)
                                .with_message(format!(
                                    "lock held since {} exceeded timeout {timeout:?}",
                                    lock.locked_at
                                )),
                        )
                        .await?;
                    warn!(task_id = %task.id, ?timeout, "hung task reset to queued");
                    reset += 1;
                }
                Err(EngineError::InvalidStatus { .. }) | Err(EngineError::TaskNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskLock, TaskRecord, TaskTypeConfig};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{ManualClock, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    struct Fixture {
        resetter: HungTaskResetter,
        store: Arc<InMemoryTaskStore>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(types: Vec<TaskTypeConfig>) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryTaskStore::new());
        for config in types {
            store.put_task_type(config).await.unwrap();
        }
        let resetter = HungTaskResetter::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(UlidGenerator::new(Arc::clone(&clock) as Arc<dyn Clock>)),
            Duration::from_secs(600),
            Duration::from_secs(60),
        );
        Fixture {
            resetter,
            store,
            clock,
        }
    }

    async fn insert_executing(fx: &Fixture, type_code: &str, attempts: u32) -> TaskRecord {
        let now = fx.clock.now();
        let mut task = TaskRecord::new(
            crate::domain::TaskId::from_ulid(Ulid::new()),
            type_code,
            vec![],
            now,
        );
        task.status = TaskStatus::Executing;
        task.attempts = attempts;
        task.lock = Some(TaskLock {
            owner: "worker-gone".into(),
            locked_at: now,
        });
        fx.store.insert_task(task.clone()).await.unwrap();
        task
    }

    #[tokio::test]
    async fn resets_tasks_past_the_default_timeout() {
        let fx = fixture(vec![TaskTypeConfig::new("demo", "Demo")]).await;
        let task = insert_executing(&fx, "demo", 2).await;

        // Not hung yet.
        assert_eq!(fx.resetter.sweep().await.unwrap(), 0);

        fx.clock.advance(Duration::from_secs(601));
        assert_eq!(fx.resetter.sweep().await.unwrap(), 1);

        let reset = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(reset.status, TaskStatus::Queued);
        assert!(reset.lock.is_none());
        // A hang is not a failed attempt.
        assert_eq!(reset.attempts, 2);
        assert!(reset.next_run_at <= fx.clock.now());

        let events = fx.store.list_events(task.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Reset);
    }

    #[tokio::test]
    async fn type_override_beats_the_default_timeout() {
        let fx = fixture(vec![
            TaskTypeConfig::new("slowpoke", "Slowpoke")
                .with_hung_timeout(Duration::from_secs(3600)),
            TaskTypeConfig::new("quick", "Quick").with_hung_timeout(Duration::from_secs(60)),
        ])
        .await;
        let slow = insert_executing(&fx, "slowpoke", 0).await;
        let quick = insert_executing(&fx, "quick", 0).await;

        fx.clock.advance(Duration::from_secs(120));
        assert_eq!(fx.resetter.sweep().await.unwrap(), 1);

        let slow = fx.store.get_task(slow.id).await.unwrap().unwrap();
        assert_eq!(slow.status, TaskStatus::Executing);
        let quick = fx.store.get_task(quick.id).await.unwrap().unwrap();
        assert_eq!(quick.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn sweep_ignores_non_executing_tasks() {
        let fx = fixture(vec![TaskTypeConfig::new("demo", "Demo")]).await;
        let now = fx.clock.now();
        let task = TaskRecord::new(
            crate::domain::TaskId::from_ulid(Ulid::new()),
            "demo",
            vec![],
            now,
        );
        fx.store.insert_task(task).await.unwrap();

        fx.clock.advance(Duration::from_secs(100_000));
        assert_eq!(fx.resetter.sweep().await.unwrap(), 0);
    }
}
