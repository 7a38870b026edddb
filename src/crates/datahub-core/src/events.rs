//! Domain event bus: typed lifecycle, step and record events
//!
//! Strategies and orchestrators publish [`EventEnvelope`]s describing what a
//! run is doing; an external observability surface tails them. Publishing is
//! **best-effort**: a failed publish logs a warning and never aborts the step
//! that produced it ([`publish_best_effort`]).
//!
//! Three buses ship here:
//!
//! - [`TracingEventBus`] - logs every event, the default for embedders that
//!   only want logs
//! - [`MemoryEventBus`] - buffers events for assertions in tests
//! - [`BroadcastEventBus`] - fan-out over `tokio::sync::broadcast` with a
//!   [`BroadcastEventBus::subscribe`] stream for live dashboards

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Kinds of domain events emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "PIPELINE_STARTED")]
    PipelineStarted,
    #[serde(rename = "PIPELINE_COMPLETED")]
    PipelineCompleted,
    #[serde(rename = "PIPELINE_FAILED")]
    PipelineFailed,
    #[serde(rename = "PipelinePaused")]
    PipelinePaused,
    #[serde(rename = "PipelineRunCancelled")]
    PipelineRunCancelled,
    #[serde(rename = "PipelineRunProgress")]
    PipelineRunProgress,
    #[serde(rename = "StepStarted")]
    StepStarted,
    #[serde(rename = "StepCompleted")]
    StepCompleted,
    #[serde(rename = "StepFailed")]
    StepFailed,
    #[serde(rename = "StepSkipped")]
    StepSkipped,
    #[serde(rename = "RECORD_EXTRACTED")]
    RecordExtracted,
    #[serde(rename = "RECORD_TRANSFORMED")]
    RecordTransformed,
    #[serde(rename = "RECORD_VALIDATED")]
    RecordValidated,
    #[serde(rename = "RECORD_ENRICHED")]
    RecordEnriched,
    #[serde(rename = "RECORD_ROUTED")]
    RecordRouted,
    #[serde(rename = "RECORD_LOADED")]
    RecordLoaded,
    #[serde(rename = "RECORD_EXPORTED")]
    RecordExported,
    #[serde(rename = "FEED_GENERATED")]
    FeedGenerated,
    #[serde(rename = "RECORD_INDEXED")]
    RecordIndexed,
    #[serde(rename = "GateApprovalRequested")]
    GateApprovalRequested,
}

/// Event payload: common envelope fields plus kind-specific extras
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// RECORD_TRANSFORMED carries `stage: ENRICH` when emitted by enrichment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A typed domain event: `{type, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: EventData,
}

impl EventEnvelope {
    /// Bare event of a kind
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            data: EventData::default(),
        }
    }

    /// Event scoped to a run
    pub fn for_run(kind: EventKind, run_id: &str, pipeline_id: &str) -> Self {
        let mut event = Self::new(kind);
        event.data.run_id = Some(run_id.to_string());
        event.data.pipeline_id = Some(pipeline_id.to_string());
        event
    }

    /// Event scoped to one step of a run
    pub fn for_step(kind: EventKind, run_id: &str, pipeline_id: &str, step_key: &str) -> Self {
        let mut event = Self::for_run(kind, run_id, pipeline_id);
        event.data.step_key = Some(step_key.to_string());
        event
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.data.count = Some(count);
        self
    }

    pub fn with_outcome(mut self, ok: u64, fail: u64) -> Self {
        self.data.ok = Some(ok);
        self.data.fail = Some(fail);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.data.reason = Some(reason.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.data.stage = Some(stage.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.data.output_path = Some(path.into());
        self
    }
}

/// Sink for domain events
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event. Failures are the caller's problem only insofar as
    /// they get logged - use [`publish_best_effort`].
    async fn publish(&self, event: EventEnvelope) -> Result<(), String>;
}

/// Publish and swallow failure with a warning; never fatal to a step
pub async fn publish_best_effort(bus: &dyn EventBus, event: EventEnvelope) {
    let kind = event.kind;
    if let Err(error) = bus.publish(event).await {
        warn!(?kind, %error, "event publish failed, continuing");
    }
}

/// Bus that logs every event through `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingEventBus;

#[async_trait]
impl EventBus for TracingEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), String> {
        debug!(kind = ?event.kind, data = ?event.data, "domain event");
        Ok(())
    }
}

/// Bus that buffers events in memory (tests, small embedders)
#[derive(Default)]
pub struct MemoryEventBus {
    events: parking_lot::Mutex<Vec<EventEnvelope>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn snapshot(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }

    /// Kinds in publish order (compact assertion helper)
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), String> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Bus that fans events out to live subscribers
pub struct BroadcastEventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventBus {
    /// `capacity` bounds the per-subscriber backlog; slow subscribers drop
    /// the oldest events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Tail the event stream
    pub fn subscribe(&self) -> BroadcastStream<EventEnvelope> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), String> {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn envelope_serializes_as_type_and_data() {
        let event = EventEnvelope::for_step(EventKind::RecordLoaded, "r1", "p1", "load")
            .with_outcome(3, 1);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], serde_json::json!("RECORD_LOADED"));
        assert_eq!(value["data"]["stepKey"], serde_json::json!("load"));
        assert_eq!(value["data"]["ok"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn memory_bus_records_in_order() {
        let bus = MemoryEventBus::new();
        publish_best_effort(&bus, EventEnvelope::new(EventKind::StepStarted)).await;
        publish_best_effort(&bus, EventEnvelope::new(EventKind::StepCompleted)).await;
        assert_eq!(bus.kinds(), vec![EventKind::StepStarted, EventKind::StepCompleted]);
    }

    #[tokio::test]
    async fn broadcast_bus_delivers_to_subscribers() {
        let bus = BroadcastEventBus::new(8);
        let mut stream = bus.subscribe();
        bus.publish(EventEnvelope::new(EventKind::PipelineStarted))
            .await
            .unwrap();
        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.kind, EventKind::PipelineStarted);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_not_an_error() {
        let bus = BroadcastEventBus::new(8);
        assert!(bus
            .publish(EventEnvelope::new(EventKind::StepSkipped))
            .await
            .is_ok());
    }
}
