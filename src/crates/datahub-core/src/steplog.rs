//! Optional durable audit of per-step execution
//!
//! A [`StepLogSink`] receives step timing, DEBUG-level input/output samples
//! and the first transform mapping pair. Every callback is awaited inside the
//! strategy, but a sink error never fails a step: [`SafeStepLog`] swallows it
//! with a warning. Sinks opt into the sample callbacks via
//! [`StepLogSink::debug_samples`] because samples clone record data.

use crate::definition::StepKind;
use crate::metrics::StepDetail;
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Durable audit sink for step execution
#[async_trait]
pub trait StepLogSink: Send + Sync {
    /// Whether the sink wants `on_extract_data` / `on_load_data` /
    /// `on_transform_mapping` samples
    fn debug_samples(&self) -> bool {
        false
    }

    async fn on_step_start(
        &self,
        step_key: &str,
        kind: StepKind,
        input_count: usize,
    ) -> Result<(), String> {
        let _ = (step_key, kind, input_count);
        Ok(())
    }

    async fn on_step_complete(&self, detail: &StepDetail) -> Result<(), String> {
        let _ = detail;
        Ok(())
    }

    async fn on_step_failed(&self, step_key: &str, error: &str) -> Result<(), String> {
        let _ = (step_key, error);
        Ok(())
    }

    /// DEBUG sample of freshly extracted rows
    async fn on_extract_data(&self, step_key: &str, sample: &[Record]) -> Result<(), String> {
        let _ = (step_key, sample);
        Ok(())
    }

    /// DEBUG sample of records about to be loaded
    async fn on_load_data(&self, step_key: &str, sample: &[Record]) -> Result<(), String> {
        let _ = (step_key, sample);
        Ok(())
    }

    /// First input/output pair of a transform, for mapping introspection
    async fn on_transform_mapping(
        &self,
        step_key: &str,
        input: &Record,
        output: &Record,
    ) -> Result<(), String> {
        let _ = (step_key, input, output);
        Ok(())
    }
}

/// Sink that records nothing
#[derive(Debug, Clone, Default)]
pub struct NullStepLog;

#[async_trait]
impl StepLogSink for NullStepLog {}

/// Wrapper that makes every sink call non-fatal
#[derive(Clone)]
pub struct SafeStepLog {
    sink: Arc<dyn StepLogSink>,
}

impl SafeStepLog {
    pub fn new(sink: Arc<dyn StepLogSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullStepLog))
    }

    pub fn debug_samples(&self) -> bool {
        self.sink.debug_samples()
    }

    pub async fn step_start(&self, step_key: &str, kind: StepKind, input_count: usize) {
        if let Err(error) = self.sink.on_step_start(step_key, kind, input_count).await {
            warn!(step_key, %error, "step log start callback failed");
        }
    }

    pub async fn step_complete(&self, detail: &StepDetail) {
        if let Err(error) = self.sink.on_step_complete(detail).await {
            warn!(step_key = %detail.step_key, %error, "step log complete callback failed");
        }
    }

    pub async fn step_failed(&self, step_key: &str, message: &str) {
        if let Err(error) = self.sink.on_step_failed(step_key, message).await {
            warn!(step_key, %error, "step log failure callback failed");
        }
    }

    pub async fn extract_data(&self, step_key: &str, sample: &[Record]) {
        if !self.debug_samples() {
            return;
        }
        if let Err(error) = self.sink.on_extract_data(step_key, sample).await {
            warn!(step_key, %error, "step log extract sample failed");
        }
    }

    pub async fn load_data(&self, step_key: &str, sample: &[Record]) {
        if !self.debug_samples() {
            return;
        }
        if let Err(error) = self.sink.on_load_data(step_key, sample).await {
            warn!(step_key, %error, "step log load sample failed");
        }
    }

    pub async fn transform_mapping(&self, step_key: &str, input: &Record, output: &Record) {
        if !self.debug_samples() {
            return;
        }
        if let Err(error) = self
            .sink
            .on_transform_mapping(step_key, input, output)
            .await
        {
            warn!(step_key, %error, "step log transform mapping failed");
        }
    }
}

/// In-memory sink used by tests and local debugging
#[derive(Default)]
pub struct MemoryStepLog {
    entries: parking_lot::Mutex<Vec<StepLogEntry>>,
}

/// One recorded callback
#[derive(Debug, Clone, PartialEq)]
pub enum StepLogEntry {
    Started { step_key: String, input_count: usize },
    Completed { step_key: String },
    Failed { step_key: String, error: String },
    ExtractSample { step_key: String, count: usize },
    LoadSample { step_key: String, count: usize },
    TransformMapping { step_key: String },
}

impl MemoryStepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<StepLogEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl StepLogSink for MemoryStepLog {
    fn debug_samples(&self) -> bool {
        true
    }

    async fn on_step_start(
        &self,
        step_key: &str,
        _kind: StepKind,
        input_count: usize,
    ) -> Result<(), String> {
        self.entries.lock().push(StepLogEntry::Started {
            step_key: step_key.to_string(),
            input_count,
        });
        Ok(())
    }

    async fn on_step_complete(&self, detail: &StepDetail) -> Result<(), String> {
        self.entries.lock().push(StepLogEntry::Completed {
            step_key: detail.step_key.clone(),
        });
        Ok(())
    }

    async fn on_step_failed(&self, step_key: &str, error: &str) -> Result<(), String> {
        self.entries.lock().push(StepLogEntry::Failed {
            step_key: step_key.to_string(),
            error: error.to_string(),
        });
        Ok(())
    }

    async fn on_extract_data(&self, step_key: &str, sample: &[Record]) -> Result<(), String> {
        self.entries.lock().push(StepLogEntry::ExtractSample {
            step_key: step_key.to_string(),
            count: sample.len(),
        });
        Ok(())
    }

    async fn on_load_data(&self, step_key: &str, sample: &[Record]) -> Result<(), String> {
        self.entries.lock().push(StepLogEntry::LoadSample {
            step_key: step_key.to_string(),
            count: sample.len(),
        });
        Ok(())
    }

    async fn on_transform_mapping(
        &self,
        step_key: &str,
        _input: &Record,
        _output: &Record,
    ) -> Result<(), String> {
        self.entries.lock().push(StepLogEntry::TransformMapping {
            step_key: step_key.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl StepLogSink for FailingSink {
        async fn on_step_start(
            &self,
            _step_key: &str,
            _kind: StepKind,
            _input_count: usize,
        ) -> Result<(), String> {
            Err("disk full".to_string())
        }
    }

    #[tokio::test]
    async fn sink_errors_are_swallowed() {
        let log = SafeStepLog::new(Arc::new(FailingSink));
        // Must not panic or propagate.
        log.step_start("extract", StepKind::Extract, 0).await;
    }

    #[tokio::test]
    async fn samples_respect_opt_in() {
        let null = SafeStepLog::disabled();
        assert!(!null.debug_samples());

        let memory = Arc::new(MemoryStepLog::new());
        let log = SafeStepLog::new(memory.clone());
        log.extract_data("extract", &[]).await;
        assert_eq!(
            memory.snapshot(),
            vec![StepLogEntry::ExtractSample {
                step_key: "extract".to_string(),
                count: 0
            }]
        );
    }
}
