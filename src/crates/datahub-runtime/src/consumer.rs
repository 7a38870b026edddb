//! Message-queue consumers for trigger pipelines
//!
//! A consumer polls one queue of the external broker and runs its pipeline
//! for every message. The broker itself is a collaborator behind
//! [`MessageQueue`]; this module owns the lifecycle (start/stop), the
//! counters and the cooperative shutdown. In-flight messages finish before a
//! stopped consumer's task exits.

use crate::commands::CommandOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Poll interval when the queue is empty
const IDLE_POLL: Duration = Duration::from_millis(50);

/// One message delivered by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub payload: Value,
}

/// External broker interface
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Pop the next message from a queue, or `None` when it is empty
    async fn receive(&self, queue: &str) -> Result<Option<QueueMessage>, String>;
}

/// In-memory queue double for tests and local development
#[derive(Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, Vec<QueueMessage>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, queue: &str, payload: Value) {
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push(QueueMessage { payload });
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn receive(&self, queue: &str) -> Result<Option<QueueMessage>, String> {
        let mut guard = self.queues.lock();
        Ok(guard.get_mut(queue).and_then(|messages| {
            if messages.is_empty() {
                None
            } else {
                Some(messages.remove(0))
            }
        }))
    }
}

/// Observable state of one consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerState {
    pub pipeline_code: String,
    pub queue_name: String,
    pub is_active: bool,
    pub messages_processed: u64,
    pub messages_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Handler invoked per message; the runner supplies one that starts a run
pub type MessageHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

struct ConsumerHandle {
    state: Arc<Mutex<ConsumerState>>,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Registry of running consumers keyed by pipeline code
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: RwLock<HashMap<String, ConsumerHandle>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a consumer for a pipeline; a second start is rejected while the
    /// first is active.
    pub fn start(
        &self,
        pipeline_code: &str,
        queue_name: &str,
        queue: Arc<dyn MessageQueue>,
        handler: MessageHandler,
    ) -> CommandOutcome {
        let mut consumers = self.consumers.write();
        if let Some(existing) = consumers.get(pipeline_code) {
            if existing.active.load(Ordering::SeqCst) {
                return CommandOutcome::failure(format!(
                    "consumer for '{pipeline_code}' is already running"
                ));
            }
        }

        let state = Arc::new(Mutex::new(ConsumerState {
            pipeline_code: pipeline_code.to_string(),
            queue_name: queue_name.to_string(),
            is_active: true,
            messages_processed: 0,
            messages_failed: 0,
            last_message_at: None,
        }));
        let active = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(consume_loop(
            queue_name.to_string(),
            queue,
            handler,
            state.clone(),
            active.clone(),
        ));

        info!(pipeline = pipeline_code, queue = queue_name, "consumer started");
        consumers.insert(
            pipeline_code.to_string(),
            ConsumerHandle {
                state,
                active,
                task,
            },
        );
        CommandOutcome::ok()
    }

    /// Request a cooperative stop; the task exits after its current message.
    pub fn stop(&self, pipeline_code: &str) -> CommandOutcome {
        let consumers = self.consumers.read();
        let Some(handle) = consumers.get(pipeline_code) else {
            return CommandOutcome::failure(format!("no consumer for '{pipeline_code}'"));
        };
        handle.active.store(false, Ordering::SeqCst);
        handle.state.lock().is_active = false;
        info!(pipeline = pipeline_code, "consumer stop requested");
        CommandOutcome::ok()
    }

    /// Snapshot of a consumer's state
    pub fn state(&self, pipeline_code: &str) -> Option<ConsumerState> {
        self.consumers
            .read()
            .get(pipeline_code)
            .map(|handle| handle.state.lock().clone())
    }

    /// Wait for a stopped consumer's task to wind down (tests, shutdown)
    pub async fn join(&self, pipeline_code: &str) {
        let task = {
            let mut consumers = self.consumers.write();
            consumers.remove(pipeline_code).map(|handle| handle.task)
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn consume_loop(
    queue_name: String,
    queue: Arc<dyn MessageQueue>,
    handler: MessageHandler,
    state: Arc<Mutex<ConsumerState>>,
    active: Arc<AtomicBool>,
) {
    while active.load(Ordering::SeqCst) {
        match queue.receive(&queue_name).await {
            Ok(Some(message)) => {
                let outcome = handler(message.payload).await;
                let mut state = state.lock();
                state.last_message_at = Some(Utc::now());
                match outcome {
                    Ok(()) => state.messages_processed += 1,
                    Err(error) => {
                        warn!(queue = %queue_name, %error, "message handling failed");
                        state.messages_failed += 1;
                    }
                }
            }
            Ok(None) => tokio::time::sleep(IDLE_POLL).await,
            Err(error) => {
                warn!(queue = %queue_name, %error, "broker receive failed");
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
    }
    state.lock().is_active = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn consumer_processes_and_counts_messages() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("q", json!({"n": 1}));
        queue.push("q", json!({"bad": true}));
        queue.push("q", json!({"n": 2}));

        let registry = ConsumerRegistry::new();
        let handler: MessageHandler = Arc::new(|payload| {
            Box::pin(async move {
                if payload.get("bad").is_some() {
                    Err("rejected".to_string())
                } else {
                    Ok(())
                }
            })
        });

        let outcome = registry.start("import", "q", queue.clone(), handler.clone());
        assert!(outcome.success);
        // A second start while active is rejected.
        assert!(!registry.start("import", "q", queue, handler).success);

        // Let the loop drain the queue.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if registry
                .state("import")
                .is_some_and(|state| state.messages_processed + state.messages_failed >= 3)
            {
                break;
            }
        }

        let state = registry.state("import").unwrap();
        assert_eq!(state.messages_processed, 2);
        assert_eq!(state.messages_failed, 1);
        assert!(state.last_message_at.is_some());

        assert!(registry.stop("import").success);
        registry.join("import").await;
        assert!(registry.state("import").is_none());
    }

    #[tokio::test]
    async fn stop_without_consumer_reports_failure() {
        let registry = ConsumerRegistry::new();
        assert!(!registry.stop("ghost").success);
    }
}
