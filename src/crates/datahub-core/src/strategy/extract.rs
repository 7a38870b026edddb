//! EXTRACT strategy: pull records from the outside world

use super::{StepStrategy, StrategyContext, StrategyResult, DEBUG_SAMPLE_LIMIT};
use crate::error::Result;
use crate::events::{EventEnvelope, EventKind};
use crate::hooks::HookStage;
use crate::record::StepOutput;
use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

/// Strategy for EXTRACT steps
///
/// Extract has no input records; the before chain runs for observability and
/// symmetry, and the after chain may mutate the freshly extracted sequence
/// before successors see it. Output length drives `counters.extracted` and
/// the run's `processed` total.
#[derive(Debug, Clone, Default)]
pub struct ExtractStrategy;

#[async_trait]
impl StepStrategy for ExtractStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        debug!(step = %scx.step.key, "extract starting");
        scx.step_log
            .step_start(&scx.step.key, scx.step.step_type, 0)
            .await;
        let started = Instant::now();

        // No input flows into an extract; the chain still runs so lifecycle
        // interceptors observe the step boundary.
        scx.run_mutating_hooks(HookStage::BeforeExtract, Vec::new())
            .await?;

        let extracted = scx.executors.extract(scx.step, scx.cx).await?;
        let extracted = scx
            .run_mutating_hooks(HookStage::AfterExtract, extracted)
            .await?;

        let sample_len = extracted.len().min(DEBUG_SAMPLE_LIMIT);
        scx.step_log
            .extract_data(&scx.step.key, &extracted[..sample_len])
            .await;

        let count = extracted.len() as u64;
        let mut detail = scx.detail();
        detail.out = Some(count);
        detail.duration_ms = started.elapsed().as_millis() as u64;

        let event = EventEnvelope::for_step(
            EventKind::RecordExtracted,
            scx.run_id(),
            scx.pipeline_id(),
            &scx.step.key,
        )
        .with_count(count);

        scx.step_log.step_complete(&detail).await;
        debug!(step = %scx.step.key, count, "extract complete");

        let mut result = StrategyResult::empty(detail);
        result.output = StepOutput::Records(extracted);
        result.processed = count;
        result.counters.extracted = count;
        result.event = Some(event);
        Ok(result)
    }
}
