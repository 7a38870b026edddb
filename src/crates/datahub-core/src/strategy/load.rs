//! LOAD strategy: idempotency filter, loader loop, quarantine reporting

use super::{StepStrategy, StrategyContext, StrategyResult, DEBUG_SAMPLE_LIMIT};
use crate::error::Result;
use crate::events::{EventEnvelope, EventKind};
use crate::executor::NewRecordError;
use crate::hooks::HookStage;
use crate::idempotency::apply_idempotency;
use crate::record::StepOutput;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

/// Strategy for LOAD steps
///
/// Applies the run-scoped idempotency filter, then hands the batch to the
/// loader framework behind the executor seam. LOAD is terminal: its hook
/// chains are observational and its output is discarded. Per-record failures
/// feed the quarantine and `counters.rejected`; they never abort the step.
#[derive(Debug, Clone, Default)]
pub struct LoadStrategy;

#[async_trait]
impl StepStrategy for LoadStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        scx.step_log
            .step_start(&scx.step.key, scx.step.step_type, scx.records.len())
            .await;
        let started = Instant::now();

        scx.run_observational_hooks(HookStage::BeforeLoad, &scx.records)
            .await?;

        let batch = apply_idempotency(scx.definition, scx.records.clone(), scx.cx);
        let sample_len = batch.len().min(DEBUG_SAMPLE_LIMIT);
        scx.step_log
            .load_data(&scx.step.key, &batch[..sample_len])
            .await;

        let report = scx.executors.load(scx.step, batch, scx.cx).await?;

        scx.run_observational_hooks(HookStage::AfterLoad, &scx.records)
            .await?;

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
            failed_payloads.push(payload);
        }
        for _ in 0..report.ok {
            scx.cx.record_outcome(true);
        }
        for _ in 0..report.fail {
            scx.cx.record_outcome(false);
        }

        let mut detail = scx.detail();
        detail.ok = Some(report.ok);
        detail.fail = Some(report.fail);
        detail.duration_ms = started.elapsed().as_millis() as u64;

        let event = EventEnvelope::for_step(
            EventKind::RecordLoaded,
            scx.run_id(),
            scx.pipeline_id(),
            &scx.step.key,
        )
        .with_outcome(report.ok, report.fail);

        scx.step_log.step_complete(&detail).await;
        debug!(step = %scx.step.key, ok = report.ok, fail = report.fail, "load complete");

        let mut result = StrategyResult::empty(detail);
        result.output = StepOutput::empty();
        result.succeeded = report.ok;
        result.failed = report.fail;
        result.counters.loaded = report.ok;
        result.counters.rejected = report.fail;
        result.event = Some(event);
        result.failed_payloads = failed_payloads;
        Ok(result)
    }
}
