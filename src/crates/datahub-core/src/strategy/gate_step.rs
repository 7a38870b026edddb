//! GATE strategy: policy evaluation and pause signalling

use super::{StepStrategy, StrategyContext, StrategyResult};
use crate::error::Result;
use crate::events::{EventEnvelope, EventKind};
use crate::gate::{GateController, GateState};
use crate::record::StepOutput;
use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

/// Strategy for GATE steps
///
/// Gates have no hook stages of their own. The controller evaluates the
/// policy; on pause the pending set is already persisted to the checkpoint
/// and the detail's `should_pause` tells the orchestrator to exit its loop
/// cleanly. Records that pass count toward `counters.gated`.
#[derive(Debug, Clone, Default)]
pub struct GateStrategy {
    controller: GateController,
}

#[async_trait]
impl StepStrategy for GateStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        scx.step_log
            .step_start(&scx.step.key, scx.step.step_type, scx.records.len())
            .await;
        let started = Instant::now();

        let config = scx.step.gate_config()?;
        let outcome =
            self.controller
                .evaluate(scx.step, &config, scx.records.clone(), scx.cx)?;

        let mut detail = scx.detail();
        detail.paused = Some(outcome.should_pause);
        detail.should_pause = Some(outcome.should_pause);
        detail.duration_ms = started.elapsed().as_millis() as u64;

        let result = if outcome.should_pause {
            let event = EventEnvelope::for_step(
                EventKind::GateApprovalRequested,
                scx.run_id(),
                scx.pipeline_id(),
                &scx.step.key,
            )
            .with_count(outcome.pending_count as u64)
            .with_reason(config.approval_type.as_str());

            let mut result = StrategyResult::empty(detail);
            result.event = Some(event);
            result
        } else {
            debug_assert_eq!(outcome.state, GateState::AutoApproved);
            let passed = outcome.passed;
            let count = passed.len() as u64;
            let mut result = StrategyResult::empty({
                let mut d = detail;
                d.out = Some(count);
                d
            });
            result.output = StepOutput::Records(passed);
            result.counters.gated = count;
            result
        };

        scx.step_log.step_complete(&result.detail).await;
        debug!(
            step = %scx.step.key,
            paused = result.detail.should_pause.unwrap_or(false),
            "gate complete"
        );
        Ok(result)
    }
}
