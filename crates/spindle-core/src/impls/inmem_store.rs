//! In-memory task store.
//!
//! Development/testing implementation of [`TaskStore`]. One tokio mutex
//! guards the whole state, so `lock_next_eligible` and `transition` are
//! trivially atomic; a relational implementation would express them as
//! conditional UPDATEs keyed on the expected prior status instead.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    EngineError, TaskChange, TaskEvent, TaskFilter, TaskId, TaskLock, TaskRecord, TaskSort,
    TaskStatus, TaskSummary, TaskTypeConfig,
};
use crate::ports::{StatusCounts, TaskStore};

/// Everything behind one lock: tasks, types and the event log.
#[derive(Default)]
struct StoreState {
    types: HashMap<String, TaskTypeConfig>,

    /// All active task records (single source of truth).
    tasks: HashMap<TaskId, TaskRecord>,

    /// Append-only event log, bucketed by task id.
    events: HashMap<TaskId, Vec<TaskEvent>>,
}

impl StoreState {
    fn executing_counts(&self) -> HashMap<&str, usize> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for task in self.tasks.values() {
            if task.status == TaskStatus::Executing {
                *counts.entry(task.type_code.as_str()).or_default() += 1;
            }
        }
        counts
    }
}

/// In-memory [`TaskStore`] implementation.
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put_task_type(&self, config: TaskTypeConfig) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.types.insert(config.code.clone(), config);
        Ok(())
    }

    async fn get_task_type(&self, code: &str) -> Result<Option<TaskTypeConfig>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.types.get(code).cloned())
    }

    async fn list_task_types(&self) -> Result<Vec<TaskTypeConfig>, EngineError> {
        let state = self.state.lock().await;
        let mut types: Vec<_> = state.types.values().cloned().collect();
        types.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(types)
    }

    async fn remove_task_type(&self, code: &str) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        Ok(state.types.remove(code).is_some())
    }

    async fn count_tasks_of_type(&self, code: &str) -> Result<usize, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.type_code == code)
            .count())
    }

    async fn insert_task(&self, task: TaskRecord) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(EngineError::Duplicate(format!("task id {}", task.id)));
        }
        if let Some(external_ref) = &task.external_ref
            && state
                .tasks
                .values()
                .any(|t| t.external_ref.as_deref() == Some(external_ref))
        {
            return Err(EngineError::Duplicate(format!(
                "external reference '{external_ref}'"
            )));
        }
        state.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .find(|t| t.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, EngineError> {
        let state = self.state.lock().await;
        let mut matches: Vec<&TaskRecord> = state
            .tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| {
                filter
                    .type_code
                    .as_deref()
                    .is_none_or(|c| t.type_code == c)
            })
            .filter(|t| {
                filter
                    .batch_id
                    .as_deref()
                    .is_none_or(|b| t.batch_id.as_deref() == Some(b))
            })
            .collect();

        matches.sort_by(|a, b| match filter.sort {
            TaskSort::CreatedAsc => (a.created_at, a.id).cmp(&(b.created_at, b.id)),
            TaskSort::CreatedDesc => (b.created_at, b.id).cmp(&(a.created_at, a.id)),
            TaskSort::UpdatedAsc => (a.updated_at, a.id).cmp(&(b.updated_at, b.id)),
            TaskSort::UpdatedDesc => (b.updated_at, b.id).cmp(&(a.updated_at, a.id)),
        });

        Ok(matches
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(TaskSummary::from)
            .collect())
    }

    async fn list_by_batch(&self, batch_id: &str) -> Result<Vec<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| t.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn list_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| t.status.is_terminal() && t.updated_at < cutoff)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.updated_at, t.id));
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        let existed = state.tasks.remove(&id).is_some();
        state.events.remove(&id);
        Ok(existed)
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, EngineError> {
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Executing => counts.executing += 1,
                TaskStatus::Suspended => counts.suspended += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }

    async fn lock_next_eligible(
        &self,
        now: DateTime<Utc>,
        lock: TaskLock,
    ) -> Result<Option<TaskRecord>, EngineError> {
        let mut state = self.state.lock().await;
        let executing = state.executing_counts();

        // Oldest eligible first; skip disabled types and types at their
        // concurrency limit. All inside one critical section, so two racing
        // pollers can never pick the same row.
        let mut candidates: Vec<(DateTime<Utc>, DateTime<Utc>, TaskId)> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued && t.next_run_at <= now)
            .filter(|t| {
                let Some(config) = state.types.get(&t.type_code) else {
                    return false;
                };
                if !config.enabled {
                    return false;
                }
                match config.max_concurrent {
                    Some(limit) => {
                        executing.get(t.type_code.as_str()).copied().unwrap_or(0)
                            < limit as usize
                    }
                    None => true,
                }
            })
            .map(|t| (t.next_run_at, t.created_at, t.id))
            .collect();
        candidates.sort();

        let Some((_, _, id)) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let task = state.tasks.get_mut(&id).expect("candidate taken from map");
        task.apply(
            TaskChange::to(TaskStatus::Executing).acquire_lock(lock),
            now,
        );
        Ok(Some(task.clone()))
    }

    async fn transition(
        &self,
        id: TaskId,
        expected: &[TaskStatus],
        change: TaskChange,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, EngineError> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        if !expected.contains(&task.status) {
            return Err(EngineError::invalid_status(task.status, expected));
        }
        task.apply(change, now);
        Ok(task.clone())
    }

    async fn append_event(&self, event: TaskEvent) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.events.entry(event.task_id).or_default().push(event);
        Ok(())
    }

    async fn list_events(&self, task_id: TaskId) -> Result<Vec<TaskEvent>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.events.get(&task_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::EventId;
    use crate::domain::RetryPolicy;
    use std::time::Duration;
    use ulid::Ulid;

    fn task_id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    fn lock_at(now: DateTime<Utc>) -> TaskLock {
        TaskLock {
            owner: "worker-test".into(),
            locked_at: now,
        }
    }

    async fn store_with_type(config: TaskTypeConfig) -> InMemoryTaskStore {
        let store = InMemoryTaskStore::new();
        store.put_task_type(config).await.unwrap();
        store
    }

    fn queued(type_code: &str, now: DateTime<Utc>) -> TaskRecord {
        TaskRecord::new(task_id(), type_code, b"{}".to_vec(), now)
    }

    #[tokio::test]
    async fn duplicate_external_ref_is_rejected() {
        let now = Utc::now();
        let store = store_with_type(TaskTypeConfig::new("demo", "Demo")).await;

        let mut a = queued("demo", now);
        a.external_ref = Some("order-1".into());
        store.insert_task(a).await.unwrap();

        let mut b = queued("demo", now);
        b.external_ref = Some("order-1".into());
        let err = store.insert_task(b).await.unwrap_err();
        assert!(matches!(err, EngineError::Duplicate(_)));
    }

    #[tokio::test]
    async fn lock_next_eligible_picks_oldest_and_sets_lock() {
        let now = Utc::now();
        let store = store_with_type(TaskTypeConfig::new("demo", "Demo")).await;

        let mut old = queued("demo", now);
        old.next_run_at = now - chrono::Duration::seconds(60);
        old.created_at = now - chrono::Duration::seconds(60);
        let old_id = old.id;
        store.insert_task(old).await.unwrap();
        store.insert_task(queued("demo", now)).await.unwrap();

        let locked = store
            .lock_next_eligible(now, lock_at(now))
            .await
            .unwrap()
            .expect("one eligible task");
        assert_eq!(locked.id, old_id);
        assert_eq!(locked.status, TaskStatus::Executing);
        assert!(locked.lock_invariant_holds());
    }

    #[tokio::test]
    async fn lock_next_eligible_skips_future_and_disabled() {
        let now = Utc::now();
        let store = store_with_type(TaskTypeConfig::new("demo", "Demo")).await;
        store
            .put_task_type(TaskTypeConfig::new("off", "Off").disabled())
            .await
            .unwrap();

        let mut delayed = queued("demo", now);
        delayed.next_run_at = now + chrono::Duration::seconds(30);
        store.insert_task(delayed).await.unwrap();
        store.insert_task(queued("off", now)).await.unwrap();

        let locked = store.lock_next_eligible(now, lock_at(now)).await.unwrap();
        assert!(locked.is_none());
    }

    #[tokio::test]
    async fn lock_next_eligible_respects_type_concurrency_limit() {
        let now = Utc::now();
        let store = store_with_type(
            TaskTypeConfig::new("narrow", "Narrow")
                .with_max_concurrent(1)
                .with_retry(RetryPolicy::fixed(Duration::from_secs(1))),
        )
        .await;

        store.insert_task(queued("narrow", now)).await.unwrap();
        store.insert_task(queued("narrow", now)).await.unwrap();

        let first = store.lock_next_eligible(now, lock_at(now)).await.unwrap();
        assert!(first.is_some());

        // Second task stays queued while the first holds the only slot.
        let second = store.lock_next_eligible(now, lock_at(now)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn transition_is_a_compare_and_swap() {
        let now = Utc::now();
        let store = store_with_type(TaskTypeConfig::new("demo", "Demo")).await;
        let task = queued("demo", now);
        let id = task.id;
        store.insert_task(task).await.unwrap();

        // Expected status mismatch: no write happens.
        let err = store
            .transition(
                id,
                &[TaskStatus::Executing],
                TaskChange::to(TaskStatus::Completed).clear_lock(),
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidStatus {
                current: TaskStatus::Queued,
                ..
            }
        ));
        let unchanged = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TaskStatus::Queued);

        let updated = store
            .transition(
                id,
                &[TaskStatus::Queued],
                TaskChange::to(TaskStatus::Suspended),
                now,
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Suspended);
    }

    #[tokio::test]
    async fn concurrent_lockers_never_share_a_task() {
        let now = Utc::now();
        let store = Arc::new(store_with_type(TaskTypeConfig::new("demo", "Demo")).await);
        store.insert_task(queued("demo", now)).await.unwrap();

        let mut joins = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                store
                    .lock_next_eligible(
                        now,
                        TaskLock {
                            owner: format!("worker-{i}"),
                            locked_at: now,
                        },
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for join in joins {
            if join.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn list_tasks_filters_sorts_and_pages() {
        let now = Utc::now();
        let store = store_with_type(TaskTypeConfig::new("demo", "Demo")).await;

        for i in 0..5 {
            let mut task = queued("demo", now);
            task.created_at = now + chrono::Duration::seconds(i);
            task.batch_id = Some(if i < 3 { "a".into() } else { "b".into() });
            store.insert_task(task).await.unwrap();
        }

        let page = store
            .list_tasks(&TaskFilter {
                batch_id: Some("a".into()),
                sort: TaskSort::CreatedDesc,
                offset: 1,
                limit: Some(1),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].batch_id.as_deref(), Some("a"));

        let by_status = store
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Queued),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_status.len(), 5);
    }

    #[tokio::test]
    async fn delete_task_removes_its_events() {
        let now = Utc::now();
        let store = store_with_type(TaskTypeConfig::new("demo", "Demo")).await;
        let task = queued("demo", now);
        let id = task.id;
        store.insert_task(task).await.unwrap();
        store
            .append_event(TaskEvent::new(
                EventId::from_ulid(Ulid::new()),
                id,
                crate::domain::EventKind::Queued,
                now,
            ))
            .await
            .unwrap();

        assert!(store.delete_task(id).await.unwrap());
        assert!(store.get_task(id).await.unwrap().is_none());
        assert!(store.list_events(id).await.unwrap().is_empty());
        assert!(!store.delete_task(id).await.unwrap());
    }
}
