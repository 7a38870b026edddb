//! Graph orchestrator: topological execution with two scheduling modes
//!
//! Sequential mode pops one ready step at a time. Bounded-parallel mode keeps
//! up to `max_concurrent_steps` steps in flight, waits for whichever finishes
//! first, folds its result into the shared metrics (single awaiter - no lock
//! needed), then refills. The ready queue is FIFO; among steps that become
//! ready together, launch order follows the order they became ready.
//!
//! Stopping conditions:
//!
//! - **Gate pause**: stop launching, drain in-flight steps (their results
//!   still count), stamp the pause and emit `PipelinePaused`.
//! - **Cancellation**: probed before every launch and at every loop
//!   iteration. In-flight steps run to completion; successors are not
//!   scheduled; `PipelineRunCancelled` is emitted once quiescent.
//! - **Step error**: FAIL_FAST records the first error, drains, and reports
//!   a failed outcome. BEST_EFFORT logs the error, skips the step's
//!   successors and keeps independent branches going.

use super::{ExecutionReport, PipelineExecutor, ResumePoint, RunOutcome};
use crate::context::ExecutorContext;
use crate::definition::{ErrorPolicy, ParallelExecution, PipelineDefinition};
use crate::error::Result;
use crate::metrics::RunMetrics;
use crate::record::StepOutput;
use crate::strategy::StrategyResult;
use crate::topology::Topology;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

type StepFuture<'a> = futures::future::BoxFuture<'a, (String, Result<StrategyResult>)>;

/// Mutable scheduling state of one graph execution segment
struct Schedule {
    topology: Topology,
    ready: VecDeque<String>,
    indegree: HashMap<String, usize>,
    outputs: HashMap<String, StepOutput>,
    completed: u64,
    total: u64,
}

impl Schedule {
    fn new(topology: Topology) -> Self {
        let ready = topology.initial_ready();
        let indegree = topology.indegree.clone();
        let total = topology.order.len() as u64;
        Self {
            topology,
            ready,
            indegree,
            outputs: HashMap::new(),
            completed: 0,
            total,
        }
    }

    /// Seed the schedule for a gate resume: everything outside the gate's
    /// downstream subgraph counts as done, and the gate's output is the
    /// pending set consumed from the checkpoint.
    fn for_resume(topology: Topology, resume: &ResumePoint) -> Self {
        let downstream: HashSet<String> =
            topology.descendants_of(&resume.step_key).into_iter().collect();
        let done: HashSet<String> = topology
            .order
            .iter()
            .filter(|key| !downstream.contains(*key))
            .cloned()
            .collect();

        let mut indegree: HashMap<String, usize> = HashMap::new();
        for key in &downstream {
            let remaining = topology
                .predecessors
                .get(key)
                .map(|preds| preds.iter().filter(|edge| !done.contains(&edge.from)).count())
                .unwrap_or(0);
            indegree.insert(key.clone(), remaining);
        }

        let ready: VecDeque<String> = topology
            .order
            .iter()
            .filter(|key| downstream.contains(*key) && indegree.get(*key) == Some(&0))
            .cloned()
            .collect();

        let mut outputs = HashMap::new();
        outputs.insert(
            resume.step_key.clone(),
            StepOutput::Records(resume.records.clone()),
        );

        let completed = done.len() as u64;
        let total = topology.order.len() as u64;
        Self {
            topology,
            ready,
            indegree,
            outputs,
            completed,
            total,
        }
    }

    /// Decrement successors' indegrees, enqueueing those that reach zero
    fn schedule_successors(&mut self, step_key: &str) {
        let Some(successors) = self.topology.successors.get(step_key).cloned() else {
            return;
        };
        for successor in successors {
            if let Some(count) = self.indegree.get_mut(&successor) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ready.push_back(successor);
                }
            }
        }
    }
}

impl PipelineExecutor {
    pub(crate) async fn execute_graph(
        &self,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        resume: Option<ResumePoint>,
    ) -> Result<ExecutionReport> {
        let topology = Topology::build(definition)?;
        let mut metrics = RunMetrics::new();

        let schedule = match &resume {
            Some(resume) => {
                Self::inject_resume_metrics(&mut metrics, resume);
                Schedule::for_resume(topology, resume)
            }
            None => Schedule::new(topology),
        };

        match definition.parallelism() {
            Some(parallel) => {
                self.graph_parallel(definition, cx, schedule, metrics, parallel)
                    .await
            }
            None => self.graph_sequential(definition, cx, schedule, metrics).await,
        }
    }

    async fn graph_sequential(
        &self,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        mut schedule: Schedule,
        mut metrics: RunMetrics,
    ) -> Result<ExecutionReport> {
        while let Some(key) = schedule.ready.pop_front() {
            if cx.cancel_requested() {
                self.publish_cancelled(cx).await;
                return Ok(ExecutionReport {
                    metrics,
                    outcome: RunOutcome::Cancelled,
                });
            }

            let step = definition
                .step(&key)
                .ok_or_else(|| crate::error::PipelineError::UnknownStep(key.clone()))?;
            let inputs = Self::gather_inputs(&schedule.topology, &schedule.outputs, &key);

            match self.run_step(definition, step, inputs, cx).await {
                Ok(result) => {
                    let (output, paused) = Self::apply_result(&mut metrics, result);
                    schedule.outputs.insert(key.clone(), output);
                    schedule.completed += 1;
                    self.publish_progress(cx, schedule.completed, schedule.total, &metrics, &key)
                        .await;

                    if paused {
                        self.mark_paused(cx, &mut metrics, &key).await;
                        return Ok(ExecutionReport {
                            metrics,
                            outcome: RunOutcome::Paused { step_key: key },
                        });
                    }
                    schedule.schedule_successors(&key);
                }
                Err(error) => {
                    let message = error.to_string();
                    Self::record_step_failure(&mut metrics, step, &message);
                    return Ok(ExecutionReport {
                        metrics,
                        outcome: RunOutcome::Failed {
                            step_key: key,
                            message,
                        },
                    });
                }
            }
        }

        debug!(run_id = cx.run_id(), "graph execution complete");
        Ok(ExecutionReport {
            metrics,
            outcome: RunOutcome::Completed,
        })
    }

    async fn graph_parallel(
        &self,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        mut schedule: Schedule,
        mut metrics: RunMetrics,
        parallel: &ParallelExecution,
    ) -> Result<ExecutionReport> {
        let cap = parallel.max_concurrent_steps.max(1);
        let mut in_flight: FuturesUnordered<StepFuture<'_>> = FuturesUnordered::new();
        let mut first_error: Option<(String, String)> = None;
        let mut paused_at: Option<String> = None;
        let mut cancelled = false;

        loop {
            if cx.cancel_requested() {
                cancelled = true;
            }

            // Refill the pool unless a stop condition holds; in-flight steps
            // always drain.
            while !cancelled
                && first_error.is_none()
                && paused_at.is_none()
                && in_flight.len() < cap
            {
                if cx.cancel_requested() {
                    cancelled = true;
                    break;
                }
                let Some(key) = schedule.ready.pop_front() else {
                    break;
                };
                let step = definition
                    .step(&key)
                    .ok_or_else(|| crate::error::PipelineError::UnknownStep(key.clone()))?;
                let inputs = Self::gather_inputs(&schedule.topology, &schedule.outputs, &key);
                debug!(step = %key, in_flight = in_flight.len(), "launching step");
                in_flight.push(Box::pin(async move {
                    let outcome = self.run_step(definition, step, inputs, cx).await;
                    (key, outcome)
                }));
            }

            // Quiescent: nothing running and nothing launchable.
            let Some((key, outcome)) = in_flight.next().await else {
                break;
            };

            match outcome {
                Ok(result) => {
                    let (output, paused) = Self::apply_result(&mut metrics, result);
                    schedule.outputs.insert(key.clone(), output);
                    schedule.completed += 1;
                    self.publish_progress(cx, schedule.completed, schedule.total, &metrics, &key)
                        .await;

                    if paused {
                        // First pause wins if several gates race.
                        paused_at.get_or_insert(key);
                    } else if first_error.is_none() {
                        schedule.schedule_successors(&key);
                    }
                }
                Err(error) => {
                    let message = error.to_string();
                    // Successors of a failed step are never scheduled in
                    // either policy; its output does not exist.
                    if let Some(step) = definition.step(&key) {
                        Self::record_step_failure(&mut metrics, step, &message);
                    }
                    match parallel.error_policy {
                        ErrorPolicy::FailFast => {
                            if first_error.is_none() {
                                first_error = Some((key, message));
                            }
                        }
                        ErrorPolicy::BestEffort => {
                            warn!(step = %key, %message, "step failed, continuing (best effort)");
                            metrics.failed += 1;
                        }
                    }
                }
            }
        }

        if let Some((step_key, message)) = first_error {
            return Ok(ExecutionReport {
                metrics,
                outcome: RunOutcome::Failed { step_key, message },
            });
        }
        if let Some(step_key) = paused_at {
            self.mark_paused(cx, &mut metrics, &step_key).await;
            return Ok(ExecutionReport {
                metrics,
                outcome: RunOutcome::Paused { step_key },
            });
        }
        if cancelled {
            self.publish_cancelled(cx).await;
            return Ok(ExecutionReport {
                metrics,
                outcome: RunOutcome::Cancelled,
            });
        }

        debug!(run_id = cx.run_id(), "parallel graph execution complete");
        Ok(ExecutionReport {
            metrics,
            outcome: RunOutcome::Completed,
        })
    }
}
