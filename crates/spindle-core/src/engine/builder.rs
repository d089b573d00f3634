//! Engine assembly: configuration, builder, and the running engine.
//!
//! The builder wires the stores, clock, and handlers into the lifecycle
//! core plus the three background loops (poller, hung-task resetter,
//! archiver) and checks at build time that every enabled task type has a
//! handler, so a misconfigured deployment fails at startup instead of
//! failing tasks one by one at runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::{ArchivedTask, EngineError, TaskId};
use crate::ports::{
    ArchiveStore, Clock, HandlerRegistry, IdGenerator, StatusCounts, SystemClock, TaskHandler,
    TaskStore, UlidGenerator,
};

use super::archiver::Archiver;
use super::lifecycle::TaskLifecycle;
use super::poller::DispatchPoller;
use super::registry::TaskTypeRegistry;
use super::resetter::HungTaskResetter;

/// Tuning knobs for the engine's background loops.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size, the global concurrency budget.
    pub workers: usize,
    /// Poll cadence; the out-of-band wakeup makes dispatch prompt anyway,
    /// so this is a backstop for delayed and requeued tasks.
    pub poll_interval: Duration,
    pub reset_interval: Duration,
    /// Applies to types without a `hung_timeout` of their own.
    pub default_hung_timeout: Duration,
    pub archive_interval: Duration,
    /// How long terminal tasks stay in the active store.
    pub retention: Duration,
    /// How long `stop` waits for in-flight workers before giving up.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
            reset_interval: Duration::from_secs(30),
            default_hung_timeout: Duration::from_secs(600),
            archive_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

pub struct EngineBuilder {
    store: Arc<dyn TaskStore>,
    archive: Arc<dyn ArchiveStore>,
    clock: Arc<dyn Clock>,
    handlers: HandlerRegistry,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn TaskStore>, archive: Arc<dyn ArchiveStore>) -> Self {
        Self {
            store,
            archive,
            clock: Arc::new(SystemClock),
            handlers: HandlerRegistry::new(),
            config: EngineConfig::default(),
        }
    }

    /// Swap the wall clock out, for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_handler(
        mut self,
        type_code: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, EngineError> {
        self.handlers.register(type_code, handler)?;
        Ok(self)
    }

    /// Assemble the engine. Fails if any enabled task type in the store has
    /// no registered handler.
    pub async fn build(self) -> Result<Engine, EngineError> {
        if self.config.workers == 0 {
            return Err(EngineError::InvalidArgument(
                "worker count must be at least 1".into(),
            ));
        }

        let unhandled: Vec<String> = self
            .store
            .list_task_types()
            .await?
            .into_iter()
            .filter(|t| t.enabled && self.handlers.get(&t.code).is_none())
            .map(|t| t.code)
            .collect();
        if !unhandled.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "enabled task type(s) without a handler: {}",
                unhandled.join(", ")
            )));
        }

        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let lifecycle = Arc::new(TaskLifecycle::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&ids),
        ));
        let poller = Arc::new(DispatchPoller::new(
            Arc::clone(&lifecycle),
            Arc::new(self.handlers),
            self.config.workers,
            self.config.poll_interval,
        ));
        let resetter = Arc::new(HungTaskResetter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            ids,
            self.config.default_hung_timeout,
            self.config.reset_interval,
        ));
        let archiver = Arc::new(Archiver::new(
            Arc::clone(&self.store),
            Arc::clone(&self.archive),
            Arc::clone(&self.clock),
            self.config.retention,
            self.config.archive_interval,
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(Engine {
            types: TaskTypeRegistry::new(Arc::clone(&self.store)),
            archive: self.archive,
            lifecycle,
            poller,
            resetter,
            archiver,
            shutdown,
            loops: Vec::new(),
            grace: self.config.shutdown_grace,
        })
    }
}

/// The assembled engine. `start` recovers abandoned work and launches the
/// background loops; `stop` drains them.
pub struct Engine {
    lifecycle: Arc<TaskLifecycle>,
    types: TaskTypeRegistry,
    archive: Arc<dyn ArchiveStore>,
    poller: Arc<DispatchPoller>,
    resetter: Arc<HungTaskResetter>,
    archiver: Arc<Archiver>,
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Recover tasks abandoned by a previous run, then start polling.
    /// Idempotent: a second call while running is a no-op.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if !self.loops.is_empty() {
            return Ok(());
        }
        let recovered = self.lifecycle.recover_abandoned().await?;
        info!(recovered, "engine starting");

        let poller = Arc::clone(&self.poller);
        let rx = self.shutdown.subscribe();
        self.loops
            .push(tokio::spawn(async move { poller.run(rx).await }));

        let resetter = Arc::clone(&self.resetter);
        let rx = self.shutdown.subscribe();
        self.loops
            .push(tokio::spawn(async move { resetter.run(rx).await }));

        let archiver = Arc::clone(&self.archiver);
        let rx = self.shutdown.subscribe();
        self.loops
            .push(tokio::spawn(async move { archiver.run(rx).await }));
        Ok(())
    }

    /// Stop the loops and wait up to the grace period for in-flight workers.
    /// Tasks still running after the grace are left Executing for the next
    /// run's startup recovery.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.loops.drain(..) {
            let _ = handle.await;
        }
        if !self.poller.wait_idle(self.grace).await {
            warn!(grace = ?self.grace, "workers still running at shutdown");
        }
        info!("engine stopped");
    }

    /// Lifecycle operations: queue, cancel, suspend, queries.
    pub fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    /// Task type administration.
    pub fn types(&self) -> &TaskTypeRegistry {
        &self.types
    }

    pub async fn status(&self) -> Result<StatusCounts, EngineError> {
        self.lifecycle.counts_by_status().await
    }

    pub async fn get_archived_task(&self, id: TaskId) -> Result<ArchivedTask, EngineError> {
        self.archive
            .get(id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))
    }

    /// Run one archive sweep immediately instead of waiting for the cadence.
    pub async fn archive_now(&self) -> Result<usize, EngineError> {
        self.archiver.sweep().await
    }
}
