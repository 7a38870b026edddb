//! External executor interfaces
//!
//! The engine never parses CSV, talks HTTP or writes to the catalog itself -
//! concrete adapters live behind [`StepExecutors`], selected by the
//! `adapterCode` inside each step's config. Strategies call exactly one
//! method per step kind and normalize the result for the orchestrator.
//!
//! Per-record failures are reported through [`RecordErrorSink`] - the
//! quarantine's intake. A failure handed to the sink never aborts the step.

use crate::context::ExecutorContext;
use crate::definition::StepDefinition;
use crate::error::{RecordFailure, Result};
use crate::record::{BranchOutput, Record};
use async_trait::async_trait;
use serde_json::Value;

/// A record dropped by a VALIDATE step
#[derive(Debug, Clone)]
pub struct ValidationDrop {
    pub record: Record,
    pub reason: String,
    /// Stable code such as `REQUIRED` or `INVALID_FORMAT`
    pub code: Option<String>,
}

/// Result of a VALIDATE step: kept records plus individual drops
#[derive(Debug, Clone, Default)]
pub struct ValidateOutcome {
    pub kept: Vec<Record>,
    pub dropped: Vec<ValidationDrop>,
}

/// One record that failed inside a terminal step
#[derive(Debug, Clone)]
pub struct RecordOutcomeFailure {
    pub record: Record,
    pub failure: RecordFailure,
}

/// Result of a LOAD step
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub ok: u64,
    pub fail: u64,
    pub failures: Vec<RecordOutcomeFailure>,
}

/// Result of an EXPORT / FEED / SINK step
#[derive(Debug, Clone, Default)]
pub struct TerminalReport {
    pub ok: u64,
    pub fail: u64,
    /// FEED: where the generated feed landed
    pub output_path: Option<String>,
    pub failures: Vec<RecordOutcomeFailure>,
}

/// The complete adapter surface, one method per processing kind
///
/// Implementations dispatch internally on `step.config.adapter_code()`.
/// All methods may read and write per-step checkpoint scratch data through
/// the context.
#[async_trait]
pub trait StepExecutors: Send + Sync {
    /// Produce records from the outside world; EXTRACT has no input
    async fn extract(&self, step: &StepDefinition, cx: &ExecutorContext) -> Result<Vec<Record>>;

    /// 1:1 record mapping by default
    async fn transform(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<Vec<Record>>;

    /// Split records into kept and dropped; drops never fail the run
    async fn validate(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<ValidateOutcome>;

    /// Augment records from defaults, computed fields or external sources
    async fn enrich(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<Vec<Record>>;

    /// Partition records into named branches
    async fn route(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<BranchOutput>;

    /// Persist records into the destination catalog
    async fn load(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<LoadReport>;

    /// Write records to an export target (file, HTTP, ...)
    async fn export(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<TerminalReport>;

    /// Generate a product feed
    async fn feed(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<TerminalReport>;

    /// Push records into a search index or similar sink
    async fn sink(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<TerminalReport>;
}

/// A freshly quarantined record error, before storage assigns ids
#[derive(Debug, Clone)]
pub struct NewRecordError {
    pub run_id: String,
    pub step_key: String,
    pub message: String,
    pub code: Option<String>,
    pub recoverable: bool,
    pub payload: Value,
}

impl NewRecordError {
    /// Build from a classified failure and its payload
    pub fn from_failure(
        run_id: &str,
        step_key: &str,
        failure: &RecordFailure,
        payload: Value,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_key: step_key.to_string(),
            message: failure.message.clone(),
            code: failure.code.clone(),
            recoverable: failure.recoverable,
            payload,
        }
    }
}

/// Intake of the record-error quarantine
#[async_trait]
pub trait RecordErrorSink: Send + Sync {
    async fn report(&self, error: NewRecordError);
}

/// Sink that drops everything (engine default when no quarantine is wired)
#[derive(Debug, Clone, Default)]
pub struct NullRecordErrorSink;

#[async_trait]
impl RecordErrorSink for NullRecordErrorSink {
    async fn report(&self, _error: NewRecordError) {}
}
