//! Gate controller: conditional pause pending external approval
//!
//! A GATE step evaluates its policy against the run so far and either lets
//! records pass or pauses the run. The state machine:
//!
//! ```text
//! OPEN ──> EVALUATING ──> AUTO_APPROVED        (threshold satisfied)
//!                   └───> PAUSED ──> APPROVED  (operator, resume)
//!                              └───> REJECTED  (operator, run CANCELLED)
//!                              └───> EXPIRED   (sweeper, TIMEOUT gates)
//! ```
//!
//! THRESHOLD gates read the error rate from the checkpoint's
//! `__pipelineStats` entry and auto-approve iff the threshold is unset, no
//! records were processed, or `100 * errorCount / totalCount` is strictly
//! below the threshold. Missing stats pause as the safe default. TIMEOUT is
//! materialized as PAUSED plus a `__gateTimeout:<stepKey>` entry carrying
//! `expires_at`; a background sweeper may later flip EXPIRED -> APPROVED,
//! and without one the gate degrades to manual approval.
//!
//! On pause the controller persists the **full** pending record set under
//! `__gate:<stepKey>` (the preview attached to the outcome is capped at
//! `preview_count`, default 10) and records any notification intent; actual
//! webhook/email delivery is a collaborator responsibility.

use crate::context::ExecutorContext;
use crate::definition::{GateApprovalType, GateStepConfig, StepDefinition};
use crate::error::Result;
use crate::record::Record;
use chrono::{Duration, Utc};
use datahub_checkpoint::{GateCheckpoint, GateTimeoutCheckpoint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// States of the gate state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    /// Not yet reached by the run
    Open,
    /// Policy evaluation in progress
    Evaluating,
    /// Threshold satisfied; records pass without operator involvement
    AutoApproved,
    /// Run paused pending an operator decision
    Paused,
    /// Operator approved; run resumes
    Approved,
    /// Operator rejected; run cancelled
    Rejected,
    /// TIMEOUT gate whose expiry passed
    Expired,
}

/// What the gate decided for this run
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub state: GateState,
    pub should_pause: bool,
    pub pending_count: usize,
    /// Operator preview, capped at the configured preview count
    pub preview: Vec<Record>,
    /// Records allowed through (empty when paused)
    pub passed: Vec<Record>,
}

/// Evaluates gate policy and persists pause checkpoints
#[derive(Debug, Clone, Default)]
pub struct GateController;

impl GateController {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a gate step against the records arriving at it.
    ///
    /// Writes the pause checkpoint (and TIMEOUT expiry) through the context
    /// when the outcome is PAUSED.
    pub fn evaluate(
        &self,
        step: &StepDefinition,
        config: &GateStepConfig,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<GateOutcome> {
        debug!(step = %step.key, approval = config.approval_type.as_str(), "gate evaluating");

        let auto_approved = match config.approval_type {
            GateApprovalType::Manual => false,
            GateApprovalType::Timeout => false,
            GateApprovalType::Threshold => self.threshold_satisfied(config, cx)?,
        };

        if auto_approved {
            debug!(step = %step.key, "gate auto-approved");
            return Ok(GateOutcome {
                state: GateState::AutoApproved,
                should_pause: false,
                pending_count: records.len(),
                preview: Vec::new(),
                passed: records,
            });
        }

        self.pause(step, config, records, cx)
    }

    /// THRESHOLD policy: auto-approve iff the threshold is unset, nothing was
    /// processed, or the error rate is strictly below the threshold. Missing
    /// stats pause as the safe default.
    fn threshold_satisfied(&self, config: &GateStepConfig, cx: &ExecutorContext) -> Result<bool> {
        let Some(threshold) = config.error_threshold_percent else {
            return Ok(true);
        };

        let (has_stats, stats) = cx.with_checkpoint(|checkpoint| {
            (checkpoint.has_pipeline_stats(), checkpoint.pipeline_stats())
        });
        let stats = stats?;
        if !has_stats {
            return Ok(false);
        }

        match stats.error_rate_percent() {
            None => Ok(true),
            Some(rate) => Ok(rate < threshold),
        }
    }

    fn pause(
        &self,
        step: &StepDefinition,
        config: &GateStepConfig,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<GateOutcome> {
        let pending: Vec<Value> = records.iter().cloned().map(Value::Object).collect();
        let preview: Vec<Record> = records
            .iter()
            .take(config.preview_count())
            .cloned()
            .collect();

        let gate = GateCheckpoint {
            step_key: step.key.clone(),
            approval_type: config.approval_type.as_str().to_string(),
            pending_record_count: pending.len(),
            pending_records: pending,
            paused_at: Utc::now(),
            notify_webhook: config.notify_webhook.clone(),
            notify_email: config.notify_email.clone(),
        };

        cx.with_checkpoint(|checkpoint| -> Result<()> {
            checkpoint.write_gate(&gate)?;
            if config.approval_type == GateApprovalType::Timeout {
                let seconds = config.timeout_seconds.unwrap_or(0) as i64;
                checkpoint.write_gate_timeout(&GateTimeoutCheckpoint {
                    step_key: step.key.clone(),
                    expires_at: Utc::now() + Duration::seconds(seconds),
                })?;
            }
            checkpoint.mark_dirty();
            Ok(())
        })?;

        info!(
            step = %step.key,
            pending = gate.pending_record_count,
            "gate paused run pending approval"
        );

        Ok(GateOutcome {
            state: GateState::Paused,
            should_pause: true,
            pending_count: gate.pending_record_count,
            preview,
            passed: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{StepConfig, StepKind};
    use crate::record::record_from;
    use datahub_checkpoint::PipelineStats;
    use serde_json::json;

    fn gate_step(config: StepConfig) -> StepDefinition {
        StepDefinition::new("gate", StepKind::Gate).with_config(config)
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| record_from(&[("sku", json!(format!("S{i}")))]))
            .collect()
    }

    fn seed_stats(cx: &ExecutorContext, errors: u64, successes: u64) {
        cx.with_checkpoint(|checkpoint| {
            checkpoint
                .set_pipeline_stats(PipelineStats {
                    error_count: errors,
                    success_count: successes,
                })
                .unwrap();
        });
    }

    #[test]
    fn manual_gate_always_pauses() {
        let cx = ExecutorContext::new("run-1", "p");
        let step = gate_step(StepConfig::new().with("approvalType", json!("MANUAL")));
        let config = step.gate_config().unwrap();

        let outcome = GateController::new()
            .evaluate(&step, &config, records(3), &cx)
            .unwrap();
        assert!(outcome.should_pause);
        assert_eq!(outcome.state, GateState::Paused);
        assert_eq!(outcome.pending_count, 3);

        let stored = cx
            .with_checkpoint(|checkpoint| checkpoint.gate("gate"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.pending_record_count, 3);
        assert_eq!(stored.approval_type, "MANUAL");
    }

    #[test]
    fn threshold_below_limit_auto_approves_without_checkpoint_write() {
        let cx = ExecutorContext::new("run-1", "p");
        seed_stats(&cx, 2, 98);
        let step = gate_step(
            StepConfig::new()
                .with("approvalType", json!("THRESHOLD"))
                .with("errorThresholdPercent", json!(5)),
        );
        let config = step.gate_config().unwrap();

        let outcome = GateController::new()
            .evaluate(&step, &config, records(100), &cx)
            .unwrap();
        assert!(!outcome.should_pause);
        assert_eq!(outcome.state, GateState::AutoApproved);
        assert_eq!(outcome.passed.len(), 100);
        assert!(cx
            .with_checkpoint(|checkpoint| checkpoint.gate("gate"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn threshold_at_or_above_limit_pauses() {
        let cx = ExecutorContext::new("run-1", "p");
        seed_stats(&cx, 5, 95);
        let step = gate_step(
            StepConfig::new()
                .with("approvalType", json!("THRESHOLD"))
                .with("errorThresholdPercent", json!(5)),
        );
        let config = step.gate_config().unwrap();

        // 5% is not strictly below 5%.
        let outcome = GateController::new()
            .evaluate(&step, &config, records(10), &cx)
            .unwrap();
        assert!(outcome.should_pause);
    }

    #[test]
    fn threshold_without_stats_pauses_as_safe_default() {
        let cx = ExecutorContext::new("run-1", "p");
        let step = gate_step(
            StepConfig::new()
                .with("approvalType", json!("THRESHOLD"))
                .with("errorThresholdPercent", json!(5)),
        );
        let config = step.gate_config().unwrap();
        let outcome = GateController::new()
            .evaluate(&step, &config, records(1), &cx)
            .unwrap();
        assert!(outcome.should_pause);
    }

    #[test]
    fn threshold_unset_or_zero_total_auto_approves() {
        let cx = ExecutorContext::new("run-1", "p");
        let step = gate_step(StepConfig::new().with("approvalType", json!("THRESHOLD")));
        let config = step.gate_config().unwrap();
        let outcome = GateController::new()
            .evaluate(&step, &config, records(1), &cx)
            .unwrap();
        assert!(!outcome.should_pause);

        // Zero processed records with a threshold set also auto-approves.
        let cx = ExecutorContext::new("run-2", "p");
        seed_stats(&cx, 0, 0);
        let step = gate_step(
            StepConfig::new()
                .with("approvalType", json!("THRESHOLD"))
                .with("errorThresholdPercent", json!(1)),
        );
        let config = step.gate_config().unwrap();
        let outcome = GateController::new()
            .evaluate(&step, &config, records(1), &cx)
            .unwrap();
        assert!(!outcome.should_pause);
    }

    #[test]
    fn timeout_gate_pauses_with_expiry() {
        let cx = ExecutorContext::new("run-1", "p");
        let step = gate_step(
            StepConfig::new()
                .with("approvalType", json!("TIMEOUT"))
                .with("timeoutSeconds", json!(3600)),
        );
        let config = step.gate_config().unwrap();
        let outcome = GateController::new()
            .evaluate(&step, &config, records(2), &cx)
            .unwrap();
        assert!(outcome.should_pause);

        let timeout = cx
            .with_checkpoint(|checkpoint| checkpoint.take_gate_timeout("gate"))
            .unwrap()
            .unwrap();
        assert!(timeout.expires_at > Utc::now());
    }

    #[test]
    fn preview_is_capped() {
        let cx = ExecutorContext::new("run-1", "p");
        let step = gate_step(
            StepConfig::new()
                .with("approvalType", json!("MANUAL"))
                .with("previewCount", json!(2)),
        );
        let config = step.gate_config().unwrap();
        let outcome = GateController::new()
            .evaluate(&step, &config, records(5), &cx)
            .unwrap();
        assert_eq!(outcome.preview.len(), 2);
        // The persisted set is the full pending list.
        let stored = cx
            .with_checkpoint(|checkpoint| checkpoint.gate("gate"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.pending_records.len(), 5);
    }
}
