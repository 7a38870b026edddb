//! Linear orchestrator: declaration-order execution for edge-less pipelines
//!
//! Records flow from each step into the next; a ROUTE step's branches are
//! concatenated (branch name order) for its successor, and terminal steps
//! pass nothing on. Gate pauses, cancellation probes and progress events
//! behave exactly as in the graph orchestrator - the linear form is just the
//! degenerate chain topology.

use super::{ExecutionReport, PipelineExecutor, ResumePoint, RunOutcome};
use crate::context::ExecutorContext;
use crate::definition::PipelineDefinition;
use crate::error::Result;
use crate::metrics::RunMetrics;
use crate::record::Record;
use tracing::debug;

impl PipelineExecutor {
    pub(crate) async fn execute_linear(
        &self,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        resume: Option<ResumePoint>,
    ) -> Result<ExecutionReport> {
        let total = definition.steps.len() as u64;
        let mut metrics = RunMetrics::new();
        let mut current: Vec<Record> = Vec::new();
        let mut start_index = 0usize;
        let mut completed = 0u64;

        if let Some(resume) = &resume {
            let gate_index = definition
                .steps
                .iter()
                .position(|step| step.key == resume.step_key)
                .ok_or_else(|| crate::error::PipelineError::UnknownStep(resume.step_key.clone()))?;
            Self::inject_resume_metrics(&mut metrics, resume);
            current = resume.records.clone();
            start_index = gate_index + 1;
            completed = start_index as u64;
        }

        for step in definition.steps.iter().skip(start_index) {
            if cx.cancel_requested() {
                self.publish_cancelled(cx).await;
                return Ok(ExecutionReport {
                    metrics,
                    outcome: RunOutcome::Cancelled,
                });
            }

            match self.run_step(definition, step, current.clone(), cx).await {
                Ok(result) => {
                    let (output, paused) = Self::apply_result(&mut metrics, result);
                    completed += 1;
                    self.publish_progress(cx, completed, total, &metrics, &step.key)
                        .await;

                    if paused {
                        self.mark_paused(cx, &mut metrics, &step.key).await;
                        return Ok(ExecutionReport {
                            metrics,
                            outcome: RunOutcome::Paused {
                                step_key: step.key.clone(),
                            },
                        });
                    }
                    current = output.into_records();
                }
                Err(error) => {
                    let message = error.to_string();
                    Self::record_step_failure(&mut metrics, step, &message);
                    return Ok(ExecutionReport {
                        metrics,
                        outcome: RunOutcome::Failed {
                            step_key: step.key.clone(),
                            message,
                        },
                    });
                }
            }
        }

        debug!(run_id = cx.run_id(), "linear execution complete");
        Ok(ExecutionReport {
            metrics,
            outcome: RunOutcome::Completed,
        })
    }
}
