//! TRANSFORM and ENRICH strategies: 1:1 record mapping

use super::{StepStrategy, StrategyContext, StrategyResult};
use crate::error::Result;
use crate::events::{EventEnvelope, EventKind};
use crate::hooks::HookStage;
use crate::record::StepOutput;
use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

/// Strategy for TRANSFORM steps
#[derive(Debug, Clone, Default)]
pub struct TransformStrategy;

#[async_trait]
impl StepStrategy for TransformStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        scx.step_log
            .step_start(&scx.step.key, scx.step.step_type, scx.records.len())
            .await;
        let started = Instant::now();

        let input = scx
            .run_mutating_hooks(HookStage::BeforeTransform, scx.records.clone())
            .await?;
        // First input survives for the mapping sample below.
        let first_input = input.first().cloned();

        let output = scx.executors.transform(scx.step, input, scx.cx).await?;
        let output = scx
            .run_mutating_hooks(HookStage::AfterTransform, output)
            .await?;

        if let (Some(first_in), Some(first_out)) = (first_input.as_ref(), output.first()) {
            scx.step_log
                .transform_mapping(&scx.step.key, first_in, first_out)
                .await;
        }

        let count = output.len() as u64;
        let mut detail = scx.detail();
        detail.out = Some(count);
        detail.duration_ms = started.elapsed().as_millis() as u64;

        let event = EventEnvelope::for_step(
            EventKind::RecordTransformed,
            scx.run_id(),
            scx.pipeline_id(),
            &scx.step.key,
        )
        .with_count(count);

        scx.step_log.step_complete(&detail).await;
        debug!(step = %scx.step.key, count, "transform complete");

        let mut result = StrategyResult::empty(detail);
        result.output = StepOutput::Records(output);
        result.counters.transformed = count;
        result.event = Some(event);
        Ok(result)
    }
}

/// Strategy for ENRICH steps
///
/// Identical flow to transform; the executor augments records from defaults,
/// computed fields or external sources instead of reshaping them.
#[derive(Debug, Clone, Default)]
pub struct EnrichStrategy;

#[async_trait]
impl StepStrategy for EnrichStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        scx.step_log
            .step_start(&scx.step.key, scx.step.step_type, scx.records.len())
            .await;
        let started = Instant::now();

        let input = scx
            .run_mutating_hooks(HookStage::BeforeEnrich, scx.records.clone())
            .await?;

        let output = scx.executors.enrich(scx.step, input, scx.cx).await?;
        let output = scx
            .run_mutating_hooks(HookStage::AfterEnrich, output)
            .await?;

        let count = output.len() as u64;
        let mut detail = scx.detail();
        detail.out = Some(count);
        detail.duration_ms = started.elapsed().as_millis() as u64;

        let event = EventEnvelope::for_step(
            EventKind::RecordEnriched,
            scx.run_id(),
            scx.pipeline_id(),
            &scx.step.key,
        )
        .with_count(count)
        .with_stage("ENRICH");

        scx.step_log.step_complete(&detail).await;
        debug!(step = %scx.step.key, count, "enrich complete");

        let mut result = StrategyResult::empty(detail);
        result.output = StepOutput::Records(output);
        result.counters.enriched = count;
        result.event = Some(event);
        Ok(result)
    }
}
