use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::info;

use spindle_core::domain::{EngineError, RetryPolicy, TaskOutcome, TaskTypeConfig};
use spindle_core::engine::{EngineBuilder, EngineConfig, QueueRequest};
use spindle_core::impls::{InMemoryArchiveStore, InMemoryTaskStore};
use spindle_core::ports::{ArchiveStore, HandlerError, TaskHandler, TaskInput, TaskStore};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

/// Demo handler: fails the first `n` executions, then greets.
struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskHandler for HelloHandler {
    async fn execute(&self, input: TaskInput) -> Result<TaskOutcome, HandlerError> {
        let p: HelloPayload = serde_json::from_slice(&input.payload)?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Ok(TaskOutcome::retry(format!(
                "intentional failure (left={left})"
            )));
        }

        println!("Hello, {}! (attempt {})", p.name, input.attempt + 1);
        Ok(TaskOutcome::success())
    }
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // (A) in-memory stores and an engine with a short retry backoff
    let store = Arc::new(InMemoryTaskStore::new());
    let archive = Arc::new(InMemoryArchiveStore::new());
    let mut engine = EngineBuilder::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        archive as Arc<dyn ArchiveStore>,
    )
    .config(EngineConfig {
        workers: 2,
        poll_interval: Duration::from_millis(200),
        ..EngineConfig::default()
    })
    .register_handler("hello", Arc::new(HelloHandler::new(2)))?
    .build()
    .await?;

    // (B) a task type that retries quickly, up to 5 attempts
    engine
        .types()
        .create(
            TaskTypeConfig::new("hello", "Hello greeter")
                .with_max_attempts(5)
                .with_retry(RetryPolicy::new(
                    Duration::from_millis(200),
                    2.0,
                    Duration::from_secs(2),
                )),
        )
        .await?;

    engine.start().await?;

    // (C) queue one task
    let payload = serde_json::to_vec(&serde_json::json!({ "name": "spindle" }))
        .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
    let id = engine
        .lifecycle()
        .queue(QueueRequest::new("hello", payload).with_external_ref("demo-1"))
        .await?;
    info!(task_id = %id, "queued demo task");

    // (D) wait for a terminal status
    loop {
        let task = engine.lifecycle().get_task(id).await?;
        if task.status.is_terminal() {
            info!(status = %task.status, attempts = task.attempts, "demo task finished");
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    for event in engine.lifecycle().list_events(id).await? {
        println!(
            "{} {} {}",
            event.at.format("%H:%M:%S%.3f"),
            event.kind,
            event.message.as_deref().unwrap_or("")
        );
    }
    println!("counts: {:?}", engine.status().await?);

    engine.stop().await;
    Ok(())
}
