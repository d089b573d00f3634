//! Task lifecycle core: the sole writer of task status transitions.
//!
//! Every operation is a conditional, idempotent transition against the
//! store. Nothing here mutates a task except through the store's
//! compare-and-swap primitive, so concurrent engine instances sharing one
//! store stay consistent without in-process coordination.
//!
//! Ordering note: the poller wakeup is signalled only after the store write
//! has returned. With a transactional store the write is durably committed
//! at that point, so the poller can never go looking for a task that is not
//! yet visible.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::{
    EngineError, EventKind, NextStep, TaskChange, TaskEvent, TaskFilter, TaskId, TaskLock,
    TaskRecord, TaskStatus, TaskSummary,
};
use crate::ports::{Clock, IdGenerator, StatusCounts, TaskStore};

/// Input for [`TaskLifecycle::queue`].
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub type_code: String,
    /// Opaque payload handed to the handler untouched.
    pub payload: Vec<u8>,
    pub batch_id: Option<String>,
    pub external_ref: Option<String>,
    /// Create the task parked instead of eligible.
    pub suspended: bool,
}

impl QueueRequest {
    pub fn new(type_code: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_code: type_code.into(),
            payload,
            batch_id: None,
            external_ref: None,
            suspended: false,
        }
    }

    pub fn in_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn suspended(mut self) -> Self {
        self.suspended = true;
        self
    }
}

/// The lifecycle core. Cheap to clone via `Arc`; shared by the poller,
/// resetter and any administrative caller.
pub struct TaskLifecycle {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    wake: Arc<Notify>,
}

impl TaskLifecycle {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            wake: Arc::new(Notify::new()),
        }
    }

    /// The out-of-band poller wakeup, signalled after queue/unsuspend.
    pub fn wake_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    // ----- creation -----

    /// Create a task in Queued (or Suspended) and signal the poller.
    pub async fn queue(&self, request: QueueRequest) -> Result<TaskId, EngineError> {
        require_non_blank(&request.type_code, "type code")?;
        if let Some(external_ref) = &request.external_ref {
            require_non_blank(external_ref, "external reference")?;
        }
        if let Some(batch_id) = &request.batch_id {
            require_non_blank(batch_id, "batch id")?;
        }

        let config = self
            .store
            .get_task_type(&request.type_code)
            .await?
            .ok_or_else(|| EngineError::TaskTypeNotFound(request.type_code.clone()))?;

        let now = self.clock.now();
        let mut task = TaskRecord::new(self.ids.task_id(), &config.code, request.payload, now);
        task.external_ref = request.external_ref;
        task.batch_id = request.batch_id;
        if request.suspended {
            task.status = TaskStatus::Suspended;
        }
        let id = task.id;
        let suspended = request.suspended;

        self.store.insert_task(task).await?;
        self.emit(
            id,
            EventKind::Queued,
            suspended.then(|| "created suspended".to_string()),
        )
        .await?;

        info!(task_id = %id, task_type = %config.code, suspended, "task queued");

        // Signal only after the store write has returned (committed).
        if !suspended {
            self.wake.notify_one();
        }
        Ok(id)
    }

    // ----- dispatch path -----

    /// Atomically claim the next eligible task, if any.
    ///
    /// Racing callers (multiple poll cycles, multiple engine instances) are
    /// safe: the store's select-and-transition is a single conditional
    /// update, so exactly one caller wins each row.
    pub async fn lock_next_queued(&self) -> Result<Option<TaskRecord>, EngineError> {
        let now = self.clock.now();
        let lock = TaskLock {
            owner: self.ids.lock_token(),
            locked_at: now,
        };
        let owner = lock.owner.clone();

        let Some(task) = self.store.lock_next_eligible(now, lock).await? else {
            return Ok(None);
        };

        self.emit(task.id, EventKind::Locked, Some(format!("locked by {owner}")))
            .await?;
        debug!(task_id = %task.id, task_type = %task.type_code, %owner, "task locked");
        Ok(Some(task))
    }

    /// Apply a successful execution.
    ///
    /// Without a next step the task completes; with one it re-enters the
    /// queue with the continuation payload and an advanced step index.
    pub async fn complete_task(
        &self,
        task: &TaskRecord,
        next: Option<NextStep>,
        elapsed: Duration,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        match next {
            None => {
                self.store
                    .transition(
                        task.id,
                        &[TaskStatus::Executing],
                        TaskChange::to(TaskStatus::Completed)
                            .clear_lock()
                            .processed(now, elapsed),
                        now,
                    )
                    .await?;
                self.emit(task.id, EventKind::Completed, None).await?;
                info!(task_id = %task.id, ?elapsed, "task completed");
            }
            Some(next) => {
                let next_step = task.step + 1;
                let delay = next.delay;
                let next_run_at = now + to_chrono(delay.unwrap_or(Duration::ZERO));
                self.store
                    .transition(
                        task.id,
                        &[TaskStatus::Executing],
                        TaskChange::to(TaskStatus::Queued)
                            .clear_lock()
                            .step(next_step)
                            .payload(next.payload)
                            .next_run_at(next_run_at)
                            .processed(now, elapsed),
                        now,
                    )
                    .await?;
                self.emit(
                    task.id,
                    EventKind::Queued,
                    Some(format!("step {} complete; queued for step {next_step}", task.step)),
                )
                .await?;
                info!(task_id = %task.id, step = next_step, "task queued for next step");
                if delay.is_none() {
                    self.wake.notify_one();
                }
            }
        }
        Ok(())
    }

    /// Permanent, non-retryable failure.
    pub async fn fail_task(&self, task: &TaskRecord, reason: &str) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.store
            .transition(
                task.id,
                &[TaskStatus::Executing],
                TaskChange::to(TaskStatus::Failed).clear_lock(),
                now,
            )
            .await?;
        self.emit(task.id, EventKind::Failed, Some(reason.to_string()))
            .await?;
        warn!(task_id = %task.id, reason, "task failed");
        Ok(())
    }

    /// Retryable failure: requeue with backoff, or fail once the type's
    /// retry limit is exhausted.
    pub async fn requeue_task(&self, task: &TaskRecord, reason: &str) -> Result<(), EngineError> {
        let config = self
            .store
            .get_task_type(&task.type_code)
            .await?
            .ok_or_else(|| EngineError::TaskTypeNotFound(task.type_code.clone()))?;

        if task.attempts >= config.max_attempts {
            return self
                .fail_task(
                    task,
                    &format!("retry limit {} exhausted: {reason}", config.max_attempts),
                )
                .await;
        }

        let attempts = task.attempts + 1;
        let delay = config.retry.delay_for(attempts);
        let now = self.clock.now();
        self.store
            .transition(
                task.id,
                &[TaskStatus::Executing],
                TaskChange::to(TaskStatus::Queued)
                    .clear_lock()
                    .attempts(attempts)
                    .next_run_at(now + to_chrono(delay)),
                now,
            )
            .await?;
        self.emit(
            task.id,
            EventKind::Requeued,
            Some(format!(
                "attempt {attempts}/{}: {reason}; retrying in {delay:?}",
                config.max_attempts
            )),
        )
        .await?;
        info!(task_id = %task.id, attempts, ?delay, "task requeued");
        Ok(())
    }

    /// Handler-requested deferral; not a failure, attempts unchanged.
    pub async fn delay_task(
        &self,
        task: &TaskRecord,
        delay: Duration,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.store
            .transition(
                task.id,
                &[TaskStatus::Executing],
                TaskChange::to(TaskStatus::Queued)
                    .clear_lock()
                    .next_run_at(now + to_chrono(delay)),
                now,
            )
            .await?;
        self.emit(
            task.id,
            EventKind::Delayed,
            Some(match reason {
                Some(reason) => format!("delayed {delay:?}: {reason}"),
                None => format!("delayed {delay:?}"),
            }),
        )
        .await?;
        debug!(task_id = %task.id, ?delay, "task delayed");
        Ok(())
    }

    /// Safety net: force-clear the lock of an Executing task and pin an
    /// explicit status, so a failure inside outcome handling can never leave
    /// a task locked forever.
    pub async fn unlock_task(&self, id: TaskId, status: TaskStatus) -> Result<(), EngineError> {
        if !matches!(status, TaskStatus::Failed | TaskStatus::Queued) {
            return Err(EngineError::InvalidArgument(format!(
                "unlock target must be FAILED or QUEUED, got {status}"
            )));
        }
        let now = self.clock.now();
        self.store
            .transition(
                id,
                &[TaskStatus::Executing],
                TaskChange::to(status).clear_lock().next_run_at(now),
                now,
            )
            .await?;
        self.emit(id, EventKind::Unlocked, Some(format!("force-unlocked to {status}")))
            .await?;
        warn!(task_id = %id, %status, "task force-unlocked");
        Ok(())
    }

    // ----- administrative transitions -----

    pub async fn cancel_task(&self, id: TaskId) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.store
            .transition(
                id,
                &[TaskStatus::Queued, TaskStatus::Suspended],
                TaskChange::to(TaskStatus::Cancelled),
                now,
            )
            .await?;
        self.emit(id, EventKind::Cancelled, None).await?;
        info!(task_id = %id, "task cancelled");
        Ok(())
    }

    pub async fn suspend_task(&self, id: TaskId) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.store
            .transition(
                id,
                &[TaskStatus::Queued],
                TaskChange::to(TaskStatus::Suspended),
                now,
            )
            .await?;
        self.emit(id, EventKind::Suspended, None).await?;
        info!(task_id = %id, "task suspended");
        Ok(())
    }

    pub async fn unsuspend_task(&self, id: TaskId) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.store
            .transition(
                id,
                &[TaskStatus::Suspended],
                TaskChange::to(TaskStatus::Queued),
                now,
            )
            .await?;
        self.emit(id, EventKind::Unsuspended, None).await?;
        info!(task_id = %id, "task unsuspended");
        self.wake.notify_one();
        Ok(())
    }

    // ----- batch operations -----
    //
    // Members in an ineligible state are skipped, not errors: a batch cancel
    // against a half-executed batch cancels what it still can. Only an
    // unknown batch id fails.

    /// Cancel every cancellable member. Returns how many were cancelled.
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<usize, EngineError> {
        let members = self.batch_members(batch_id).await?;
        let mut applied = 0;
        for member in members {
            if !member.status.can_cancel() {
                debug!(task_id = %member.id, status = %member.status, "batch cancel: skipped");
                continue;
            }
            match self.cancel_task(member.id).await {
                Ok(()) => applied += 1,
                // Lost a race with a status change since listing; skip.
                Err(EngineError::InvalidStatus { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        info!(batch_id, applied, "batch cancelled");
        Ok(applied)
    }

    /// Suspend every Queued member. Returns how many were suspended.
    pub async fn suspend_batch(&self, batch_id: &str) -> Result<usize, EngineError> {
        let members = self.batch_members(batch_id).await?;
        let mut applied = 0;
        for member in members {
            if !member.status.can_suspend() {
                debug!(task_id = %member.id, status = %member.status, "batch suspend: skipped");
                continue;
            }
            match self.suspend_task(member.id).await {
                Ok(()) => applied += 1,
                Err(EngineError::InvalidStatus { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        info!(batch_id, applied, "batch suspended");
        Ok(applied)
    }

    /// Unsuspend every Suspended member. Returns how many were released.
    pub async fn unsuspend_batch(&self, batch_id: &str) -> Result<usize, EngineError> {
        let members = self.batch_members(batch_id).await?;
        let mut applied = 0;
        for member in members {
            if member.status != TaskStatus::Suspended {
                debug!(task_id = %member.id, status = %member.status, "batch unsuspend: skipped");
                continue;
            }
            match self.unsuspend_task(member.id).await {
                Ok(()) => applied += 1,
                Err(EngineError::InvalidStatus { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        info!(batch_id, applied, "batch unsuspended");
        Ok(applied)
    }

    async fn batch_members(&self, batch_id: &str) -> Result<Vec<TaskRecord>, EngineError> {
        require_non_blank(batch_id, "batch id")?;
        let members = self.store.list_by_batch(batch_id).await?;
        if members.is_empty() {
            return Err(EngineError::BatchNotFound(batch_id.to_string()));
        }
        Ok(members)
    }

    // ----- removal and recovery -----

    /// Remove a task and its events outright (not a status transition).
    pub async fn delete_task(&self, id: TaskId) -> Result<(), EngineError> {
        if !self.store.delete_task(id).await? {
            return Err(EngineError::TaskNotFound(id.to_string()));
        }
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Startup recovery: return every task left Executing by a previous
    /// process to the queue. Runs before polling begins.
    pub async fn recover_abandoned(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let executing = self.store.list_by_status(TaskStatus::Executing).await?;
        let mut recovered = 0;
        for task in executing {
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
                    self.emit(task.id, EventKind::Reset, Some("recovered at startup".into()))
                        .await?;
                    recovered += 1;
                }
                Err(EngineError::InvalidStatus { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if recovered > 0 {
            warn!(recovered, "recovered tasks left executing by a previous run");
        }
        Ok(recovered)
    }

    // ----- queries -----

    pub async fn get_task(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))
    }

    pub async fn get_task_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<TaskRecord, EngineError> {
        require_non_blank(external_ref, "external reference")?;
        self.store
            .find_by_external_ref(external_ref)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(external_ref.to_string()))
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, EngineError> {
        self.store.list_tasks(filter).await
    }

    pub async fn list_events(&self, task_id: TaskId) -> Result<Vec<TaskEvent>, EngineError> {
        // Distinguish "no events" from "no such task".
        self.get_task(task_id).await?;
        self.store.list_events(task_id).await
    }

    pub async fn counts_by_status(&self) -> Result<StatusCounts, EngineError> {
        self.store.counts_by_status().await
    }

    async fn emit(
        &self,
        task_id: TaskId,
        kind: EventKind,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        let mut event = TaskEvent::new(self.ids.event_id(), task_id, kind, self.clock.now());
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.store.append_event(event).await
    }
}

fn require_non_blank(value: &str, what: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidArgument(format!("{what} must not be blank")));
    }
    Ok(())
}

/// Engine delays are bounded, so out-of-range only happens on absurd caller
/// input; saturate instead of panicking.
fn to_chrono(delay: Duration) -> ChronoDuration {
    ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::MAX)
}
