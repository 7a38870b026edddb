//! VALIDATE strategy: drop bad records without failing the run

use super::{StepStrategy, StrategyContext, StrategyResult};
use crate::error::{RecordFailure, Result};
use crate::events::{EventEnvelope, EventKind};
use crate::executor::NewRecordError;
use crate::hooks::HookStage;
use crate::record::StepOutput;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

/// Strategy for VALIDATE steps
///
/// Output is a subset of the input. Every drop is reported to the quarantine
/// with its reason and counts toward the run's `failed` - but the run keeps
/// going; only a whole-step throw aborts it. Validation failures are never
/// recoverable regardless of their message.
#[derive(Debug, Clone, Default)]
pub struct ValidateStrategy;

#[async_trait]
impl StepStrategy for ValidateStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        scx.step_log
            .step_start(&scx.step.key, scx.step.step_type, scx.records.len())
            .await;
        let started = Instant::now();

        let input = scx
            .run_mutating_hooks(HookStage::BeforeValidate, scx.records.clone())
            .await?;

        let outcome = scx.executors.validate(scx.step, input, scx.cx).await?;
        let kept = scx
            .run_mutating_hooks(HookStage::AfterValidate, outcome.kept)
            .await?;

        let mut failed_payloads = Vec::with_capacity(outcome.dropped.len());
        for drop in &outcome.dropped {
            let failure = RecordFailure {
                message: drop.reason.clone(),
                code: drop.code.clone(),
                recoverable: false,
            };
            let payload = Value::Object(drop.record.clone());
            scx.error_sink
                .report(NewRecordError::from_failure(
                    scx.run_id(),
                    &scx.step.key,
                    &failure,
                    payload.clone(),
                ))
                .await;
            scx.cx.record_outcome(false);
            failed_payloads.push(payload);
        }
        for _ in &kept {
            scx.cx.record_outcome(true);
        }

        let kept_count = kept.len() as u64;
        let dropped_count = outcome.dropped.len() as u64;
        let mut detail = scx.detail();
        detail.out = Some(kept_count);
        detail.fail = Some(dropped_count);
        detail.duration_ms = started.elapsed().as_millis() as u64;

        let event = EventEnvelope::for_step(
            EventKind::RecordValidated,
            scx.run_id(),
            scx.pipeline_id(),
            &scx.step.key,
        )
        .with_count(kept_count);

        scx.step_log.step_complete(&detail).await;
        debug!(
            step = %scx.step.key,
            kept = kept_count,
            dropped = dropped_count,
            "validate complete"
        );

        let mut result = StrategyResult::empty(detail);
        result.output = StepOutput::Records(kept);
        result.failed = dropped_count;
        result.counters.validated = kept_count;
        result.event = Some(event);
        result.failed_payloads = failed_payloads;
        Ok(result)
    }
}
