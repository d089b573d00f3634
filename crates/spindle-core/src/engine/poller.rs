//! Dispatch poller + worker pool.
//!
//! A fixed number of execution slots (semaphore permits) backs the pool.
//! The poll loop runs on a fixed cadence and is additionally woken
//! out-of-band whenever a task is queued or unsuspended. Each cycle keeps
//! claiming work until the pool is saturated or nothing is eligible, then
//! returns; it never blocks on handler execution.
//!
//! Workers map the handler's outcome to exactly one lifecycle call. Any
//! failure inside that mapping is converted into a forced unlock to FAILED,
//! so a double fault cannot leave a task locked forever. A panicking
//! handler aborts its worker task; the lease it held is reclaimed by the
//! hung-task resetter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::domain::{TaskOutcome, TaskRecord, TaskStatus};
use crate::ports::{HandlerRegistry, TaskInput};

use super::lifecycle::TaskLifecycle;

pub struct DispatchPoller {
    lifecycle: Arc<TaskLifecycle>,
    handlers: Arc<HandlerRegistry>,
    slots: Arc<Semaphore>,
    workers: u32,
    wake: Arc<Notify>,
    poll_interval: Duration,
}

impl DispatchPoller {
    pub fn new(
        lifecycle: Arc<TaskLifecycle>,
        handlers: Arc<HandlerRegistry>,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        let wake = lifecycle.wake_signal();
        Self {
            lifecycle,
            handlers,
            slots: Arc::new(Semaphore::new(workers)),
            workers: workers as u32,
            wake,
            poll_interval,
        }
    }

    /// Poll until shutdown: every tick, plus immediately on wakeups.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.poll_once().await;
        }
        debug!("dispatch poller stopped");
    }

    /// One poll cycle: dispatch until the pool is full or nothing is eligible.
    pub async fn poll_once(&self) {
        loop {
            // Saturated pool: defer to the next tick instead of queueing up.
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };
            match self.lifecycle.lock_next_queued().await {
                Ok(Some(task)) => {
                    let lifecycle = Arc::clone(&self.lifecycle);
                    let handlers = Arc::clone(&self.handlers);
                    tokio::spawn(async move {
                        execute_one(lifecycle, handlers, task).await;
                        drop(permit);
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "poll cycle failed; retrying next tick");
                    break;
                }
            }
        }
    }

    /// Wait until every in-flight worker has finished, up to `grace`.
    /// Returns false if workers were still running when the grace expired.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.slots.acquire_many(self.workers))
            .await
            .is_ok()
    }
}

/// Run one claimed task to its transition.
async fn execute_one(
    lifecycle: Arc<TaskLifecycle>,
    handlers: Arc<HandlerRegistry>,
    task: TaskRecord,
) {
    let input = TaskInput {
        task_id: task.id,
        type_code: task.type_code.clone(),
        step: task.step,
        attempt: task.attempts,
        payload: task.payload.clone(),
    };

    let started = Instant::now();
    let result = match handlers.get(&task.type_code) {
        Some(handler) => handler.execute(input).await,
        // The builder checks this at startup, but a type can be created
        // after the engine booted.
        None => Ok(TaskOutcome::fail(format!(
            "no handler registered for type '{}'",
            task.type_code
        ))),
    };
    let elapsed = started.elapsed();

    let applied = match result {
        Ok(TaskOutcome::Success { next }) => lifecycle.complete_task(&task, next, elapsed).await,
        Ok(TaskOutcome::Fail { reason }) => lifecycle.fail_task(&task, &reason).await,
        Ok(TaskOutcome::Retry { reason }) => lifecycle.requeue_task(&task, &reason).await,
        Ok(TaskOutcome::Delay { delay, reason }) => {
            lifecycle.delay_task(&task, delay, reason.as_deref()).await
        }
        Err(e) => {
            lifecycle
                .requeue_task(&task, &format!("handler error: {e}"))
                .await
        }
    };

    // Double fault: outcome handling itself failed. Force the lock clear so
    // the task cannot stay Executing forever.
    if let Err(outcome_err) = applied {
        error!(task_id = %task.id, error = %outcome_err, "outcome handling failed");
        if let Err(unlock_err) = lifecycle.unlock_task(task.id, TaskStatus::Failed).await {
            error!(task_id = %task.id, error = %unlock_err, "safety-net unlock failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineError, EventKind, NextStep, RetryPolicy, TaskId, TaskTypeConfig};
    use crate::engine::lifecycle::QueueRequest;
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{
        Clock, HandlerError, IdGenerator, SystemClock, TaskHandler, TaskStore, UlidGenerator,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        lifecycle: Arc<TaskLifecycle>,
        store: Arc<InMemoryTaskStore>,
        handlers: HandlerRegistry,
    }

    async fn fixture(types: Vec<TaskTypeConfig>) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryTaskStore::new());
        for config in types {
            store.put_task_type(config).await.unwrap();
        }
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let lifecycle = Arc::new(TaskLifecycle::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            clock,
            ids,
        ));
        Fixture {
            lifecycle,
            store,
            handlers: HandlerRegistry::new(),
        }
    }

    fn poller(fx: &Fixture, workers: usize, handlers: HandlerRegistry) -> DispatchPoller {
        DispatchPoller::new(
            Arc::clone(&fx.lifecycle),
            Arc::new(handlers),
            workers,
            Duration::from_millis(20),
        )
    }

    async fn wait_for_status(
        lifecycle: &TaskLifecycle,
        id: TaskId,
        status: TaskStatus,
    ) -> TaskRecord {
        for _ in 0..200 {
            let task = lifecycle.get_task(id).await.unwrap();
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} never reached {status}");
    }

    struct SucceedHandler;

    #[async_trait]
    impl TaskHandler for SucceedHandler {
        async fn execute(&self, _input: TaskInput) -> Result<TaskOutcome, HandlerError> {
            Ok(TaskOutcome::success())
        }
    }

    /// Fails (retryably) n times, then succeeds.
    struct FlakyHandler {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn execute(&self, _input: TaskInput) -> Result<TaskOutcome, HandlerError> {
            let left = self.remaining_failures.load(Ordering::Relaxed);
            if left > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
                return Ok(TaskOutcome::retry(format!("intentional failure (left={left})")));
            }
            Ok(TaskOutcome::success())
        }
    }

    /// Echoes the payload back as one continuation step.
    struct StepHandler;

    #[async_trait]
    impl TaskHandler for StepHandler {
        async fn execute(&self, input: TaskInput) -> Result<TaskOutcome, HandlerError> {
            if input.step == 0 {
                Ok(TaskOutcome::next_step(NextStep::new(b"second".to_vec())))
            } else {
                assert_eq!(input.payload, b"second".to_vec());
                Ok(TaskOutcome::success())
            }
        }
    }

    /// Blocks until released.
    struct BlockingHandler {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TaskHandler for BlockingHandler {
        async fn execute(&self, _input: TaskInput) -> Result<TaskOutcome, HandlerError> {
            self.release.notified().await;
            Ok(TaskOutcome::success())
        }
    }

    /// Blocks until released, then asks for a retry.
    struct BlockingRetryHandler {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TaskHandler for BlockingRetryHandler {
        async fn execute(&self, _input: TaskInput) -> Result<TaskOutcome, HandlerError> {
            self.release.notified().await;
            Ok(TaskOutcome::retry("try again"))
        }
    }

    #[tokio::test]
    async fn poll_once_dispatches_and_completes() {
        let mut fx = fixture(vec![TaskTypeConfig::new("ok", "Ok")]).await;
        fx.handlers.register("ok", Arc::new(SucceedHandler)).unwrap();
        let handlers = std::mem::take(&mut fx.handlers);
        let poller = poller(&fx, 2, handlers);

        let id = fx
            .lifecycle
            .queue(QueueRequest::new("ok", b"x".to_vec()))
            .await
            .unwrap();
        poller.poll_once().await;

        let task = wait_for_status(&fx.lifecycle, id, TaskStatus::Completed).await;
        assert!(task.last_duration.is_some());
        assert!(task.lock_invariant_holds());
    }

    #[tokio::test]
    async fn retry_outcome_requeues_until_success() {
        let mut fx = fixture(vec![
            TaskTypeConfig::new("flaky", "Flaky")
                .with_max_attempts(5)
                .with_retry(RetryPolicy::fixed(Duration::ZERO)),
        ])
        .await;
        fx.handlers
            .register(
                "flaky",
                Arc::new(FlakyHandler {
                    remaining_failures: AtomicU32::new(2),
                }),
            )
            .unwrap();
        let handlers = std::mem::take(&mut fx.handlers);
        let poller = poller(&fx, 1, handlers);

        let id = fx
            .lifecycle
            .queue(QueueRequest::new("flaky", vec![]))
            .await
            .unwrap();

        for _ in 0..10 {
            poller.poll_once().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let task = wait_for_status(&fx.lifecycle, id, TaskStatus::Completed).await;
        assert_eq!(task.attempts, 2);
    }

    #[tokio::test]
    async fn multi_step_task_runs_both_steps() {
        let mut fx = fixture(vec![TaskTypeConfig::new("steps", "Steps")]).await;
        fx.handlers.register("steps", Arc::new(StepHandler)).unwrap();
        let handlers = std::mem::take(&mut fx.handlers);
        let poller = poller(&fx, 1, handlers);

        let id = fx
            .lifecycle
            .queue(QueueRequest::new("steps", b"first".to_vec()))
            .await
            .unwrap();

        for _ in 0..10 {
            poller.poll_once().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let task = wait_for_status(&fx.lifecycle, id, TaskStatus::Completed).await;
        assert_eq!(task.step, 1);
    }

    #[tokio::test]
    async fn missing_handler_fails_the_task() {
        let fx = fixture(vec![TaskTypeConfig::new("orphan", "Orphan")]).await;
        let poller = poller(&fx, 1, HandlerRegistry::new());

        let id = fx
            .lifecycle
            .queue(QueueRequest::new("orphan", vec![]))
            .await
            .unwrap();
        poller.poll_once().await;

        wait_for_status(&fx.lifecycle, id, TaskStatus::Failed).await;
    }

    #[tokio::test]
    async fn saturated_pool_defers_instead_of_queueing() {
        let mut fx = fixture(vec![TaskTypeConfig::new("slow", "Slow")]).await;
        let release = Arc::new(Notify::new());
        fx.handlers
            .register(
                "slow",
                Arc::new(BlockingHandler {
                    release: Arc::clone(&release),
                }),
            )
            .unwrap();
        let handlers = std::mem::take(&mut fx.handlers);
        let poller = poller(&fx, 1, handlers);

        let first = fx
            .lifecycle
            .queue(QueueRequest::new("slow", vec![]))
            .await
            .unwrap();
        let second = fx
            .lifecycle
            .queue(QueueRequest::new("slow", vec![]))
            .await
            .unwrap();

        poller.poll_once().await;
        wait_for_status(&fx.lifecycle, first, TaskStatus::Executing).await;

        // Only one slot: the second task must still be queued.
        poller.poll_once().await;
        let task = fx.lifecycle.get_task(second).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        // Release the workers. notify_waiters only wakes handlers that are
        // already parked, so keep releasing until both tasks finish.
        for _ in 0..200 {
            release.notify_waiters();
            poller.poll_once().await;
            let done = fx.lifecycle.get_task(second).await.unwrap();
            if done.status == TaskStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_for_status(&fx.lifecycle, first, TaskStatus::Completed).await;
        wait_for_status(&fx.lifecycle, second, TaskStatus::Completed).await;
    }

    #[tokio::test]
    async fn double_fault_forces_unlock_to_failed() {
        let mut fx = fixture(vec![
            TaskTypeConfig::new("doomed", "Doomed").with_max_attempts(3),
        ])
        .await;
        let release = Arc::new(Notify::new());
        fx.handlers
            .register(
                "doomed",
                Arc::new(BlockingRetryHandler {
                    release: Arc::clone(&release),
                }),
            )
            .unwrap();
        let handlers = std::mem::take(&mut fx.handlers);
        let poller = poller(&fx, 1, handlers);

        let id = fx
            .lifecycle
            .queue(QueueRequest::new("doomed", vec![]))
            .await
            .unwrap();
        poller.poll_once().await;
        wait_for_status(&fx.lifecycle, id, TaskStatus::Executing).await;

        // Sabotage outcome handling while the handler is parked: requeue
        // needs the type's retry policy, so removing the type makes the
        // retry transition fail and trips the safety net.
        fx.store.remove_task_type("doomed").await.unwrap();
        for _ in 0..200 {
            release.notify_waiters();
            let task = fx.lifecycle.get_task(id).await.unwrap();
            if task.status == TaskStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let task = fx.lifecycle.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.lock.is_none());

        let events = fx.store.list_events(id).await.unwrap();
        assert!(events.iter().any(|e| e.kind == EventKind::Unlocked));
    }

    #[tokio::test]
    async fn run_loop_reacts_to_wake_signal() {
        let mut fx = fixture(vec![TaskTypeConfig::new("ok", "Ok")]).await;
        fx.handlers.register("ok", Arc::new(SucceedHandler)).unwrap();
        // Long cadence: completion within the test window proves the
        // out-of-band wakeup worked.
        let poller = Arc::new(DispatchPoller::new(
            Arc::clone(&fx.lifecycle),
            Arc::new(std::mem::take(&mut fx.handlers)),
            1,
            Duration::from_secs(3600),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = fx
            .lifecycle
            .queue(QueueRequest::new("ok", vec![]))
            .await
            .unwrap();

        let task = wait_for_status(&fx.lifecycle, id, TaskStatus::Completed).await;
        assert_eq!(task.status, TaskStatus::Completed);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("poller loop exits on shutdown")
            .unwrap();
        assert!(poller.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn poll_errors_do_not_kill_the_cycle() {
        // No task types at all: lock_next_queued returns None, never Err,
        // but an empty store exercises the early-return path.
        let fx = fixture(vec![]).await;
        let poller = poller(&fx, 1, HandlerRegistry::new());
        poller.poll_once().await;
        let err = fx
            .lifecycle
            .queue(QueueRequest::new("ghost", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskTypeNotFound(_)));
    }
}
