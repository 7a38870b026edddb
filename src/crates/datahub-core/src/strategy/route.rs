//! ROUTE strategy: partition records into named branches

use super::{StepStrategy, StrategyContext, StrategyResult};
use crate::error::Result;
use crate::hooks::HookStage;
use crate::record::StepOutput;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// Strategy for ROUTE steps
///
/// Produces a branch map consumed by successors whose edge carries a
/// matching `branch` label. The after chain observes the flattened records;
/// the branch structure itself is not open to interceptor mutation. Route
/// emits no domain event of its own.
#[derive(Debug, Clone, Default)]
pub struct RouteStrategy;

#[async_trait]
impl StepStrategy for RouteStrategy {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        scx.step_log
            .step_start(&scx.step.key, scx.step.step_type, scx.records.len())
            .await;
        let started = Instant::now();

        let input = scx
            .run_mutating_hooks(HookStage::BeforeRoute, scx.records.clone())
            .await?;

        let branches = scx.executors.route(scx.step, input, scx.cx).await?;

        let flattened: Vec<_> = branches.values().flatten().cloned().collect();
        scx.run_observational_hooks(HookStage::AfterRoute, &flattened)
            .await?;

        let total = flattened.len() as u64;
        let branch_counts: BTreeMap<String, u64> = branches
            .iter()
            .map(|(name, records)| (name.clone(), records.len() as u64))
            .collect();

        let mut detail = scx.detail();
        detail.out = Some(total);
        detail.branches = Some(branch_counts);
        detail.duration_ms = started.elapsed().as_millis() as u64;

        scx.step_log.step_complete(&detail).await;
        debug!(step = %scx.step.key, total, branches = branches.len(), "route complete");

        let mut result = StrategyResult::empty(detail);
        result.output = StepOutput::Branches(branches);
        result.counters.routed = total;
        Ok(result)
    }
}
