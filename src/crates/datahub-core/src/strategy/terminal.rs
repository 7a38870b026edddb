//! EXPORT, FEED and SINK strategies: terminal record consumers

use super::{StepStrategy, StrategyContext, StrategyResult};
use crate::error::Result;
use crate::events::{EventEnvelope, EventKind};
use crate::executor::NewRecordError;
use crate::hooks::HookStage;
use crate::record::StepOutput;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
enum TerminalKind {
    Export,
    Feed,
    Sink,
}

impl TerminalKind {
    fn stages(self) -> (HookStage, HookStage) {
        match self {
            TerminalKind::Export => (HookStage::BeforeExport, HookStage::AfterExport),
            TerminalKind::Feed => (HookStage::BeforeFeed, HookStage::AfterFeed),
            TerminalKind::Sink => (HookStage::BeforeSink, HookStage::AfterSink),
        }
    }

    fn event_kind(self) -> EventKind {
        match self {
            TerminalKind::Export => EventKind::RecordExported,
            TerminalKind::Feed => EventKind::FeedGenerated,
            TerminalKind::Sink => EventKind::RecordIndexed,
        }
    }
}

/// Shared flow of the three terminal consumer kinds: observational hooks
/// around the executor, failures into the quarantine, output discarded.
async fn run_terminal(scx: StrategyContext<'_>, kind: TerminalKind) -> Result<StrategyResult> {
    scx.step_log
        .step_start(&scx.step.key, scx.step.step_type, scx.records.len())
        .await;
    let started = Instant::now();
    let (before, after) = kind.stages();

    scx.run_observational_hooks(before, &scx.records).await?;

    let records = scx.records.clone();
    let report = match kind {
        TerminalKind::Export => scx.executors.export(scx.step, records, scx.cx).await?,
        TerminalKind::Feed => scx.executors.feed(scx.step, records, scx.cx).await?,
        TerminalKind::Sink => scx.executors.sink(scx.step, records, scx.cx).await?,
    };

    scx.run_observational_hooks(after, &scx.records).await?;

    let mut failed_payloads = Vec::with_capacity(report.failures.len());
    for failure in &report.failures {
        let payload = Value::Object(failure.record.clone());
        scx.error_sink
            .report(NewRecordError::from_failure(
                scx.run_id(),
                &scx.step.key,
                &failure.failure,
                payload.clone(),
            ))
            .await;
        scx.cx.record_outcome(false);
        failed_payloads.push(payload);
    }
    for _ in 0..report.ok {
        scx.cx.record_outcome(true);
    }

    let mut detail = scx.detail();
    detail.ok = Some(report.ok);
    detail.fail = Some(report.fail);
    detail.output_path = report.output_path.clone();
    detail.duration_ms = started.elapsed().as_millis() as u64;

    let mut event = EventEnvelope::for_step(
        kind.event_kind(),
        scx.run_id(),
        scx.pipeline_id(),
        &scx.step.key,
    )
    .with_outcome(report.ok, report.fail);
    if let Some(path) = &report.output_path {
        event = event.with_output_path(path.clone());
    }

    scx.step_log.step_complete(&detail).await;
    debug!(step = %scx.step.key, ok = report.ok, fail = report.fail, "terminal step complete");

    let mut result = StrategyResult::empty(detail);
    result.output = StepOutput::empty();
    result.event = Some(event);
    result.failed_payloads = failed_payloads;
    Ok(result)
}

/// Strategy for EXPORT steps
#[derive(Debug, Clone, Default)]
pub struct ExportStrategy;

#[async_trait]
impl StepStrategy for ExportStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        run_terminal(scx, TerminalKind::Export).await
    }
}

/// Strategy for FEED steps; the report's `output_path` says where the feed
/// landed
#[derive(Debug, Clone, Default)]
pub struct FeedStrategy;

#[async_trait]
impl StepStrategy for FeedStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        run_terminal(scx, TerminalKind::Feed).await
    }
}

/// Strategy for SINK steps (search indexes and similar destinations)
#[derive(Debug, Clone, Default)]
pub struct SinkStrategy;

#[async_trait]
impl StepStrategy for SinkStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        run_terminal(scx, TerminalKind::Sink).await
    }
}
