//! Pipeline orchestrators
//!
//! [`PipelineExecutor`] drives one run of a definition: the graph
//! orchestrator when edges are present, the linear orchestrator otherwise.
//! Both share the same step runner, which wraps every dispatch with
//! `StepStarted` / domain event / `StepCompleted` (or `StepFailed` plus the
//! `ON_ERROR` hook chain) and publishes a run-progress event after each
//! completed step.
//!
//! Orchestrators do not own run status - they return an
//! [`ExecutionReport`] whose [`RunOutcome`] tells the supervisor how the
//! segment ended (completed, paused at a gate, cancelled, or failed at a
//! step). Step failures are reported through the outcome rather than `Err`
//! so accumulated metrics always survive; `Err` is reserved for structural
//! problems such as an invalid topology.

mod graph;
mod linear;

use crate::context::ExecutorContext;
use crate::definition::{PipelineDefinition, StepDefinition};
use crate::error::{PipelineError, Result};
use crate::events::{publish_best_effort, EventBus, EventEnvelope, EventKind, TracingEventBus};
use crate::executor::{NullRecordErrorSink, RecordErrorSink, StepExecutors};
use crate::hooks::{HookService, HookStage};
use crate::metrics::{RunMetrics, StepDetail};
use crate::record::{Record, StepOutput};
use crate::steplog::SafeStepLog;
use crate::strategy::{StepDispatcher, StrategyContext, StrategyResult};
use crate::topology::Topology;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// How an execution segment ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// A gate paused the run; the pending set is in the checkpoint
    Paused { step_key: String },
    /// Cancellation was requested and honored
    Cancelled,
    /// A step aborted the run (sequential mode or FAIL_FAST)
    Failed { step_key: String, message: String },
}

/// Metrics plus outcome for one execution segment
#[derive(Debug)]
pub struct ExecutionReport {
    pub metrics: RunMetrics,
    pub outcome: RunOutcome,
}

/// Where to restart after a gate approval: the gate's key plus the pending
/// records consumed from its checkpoint entry
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub step_key: String,
    pub records: Vec<Record>,
}

/// Executes pipeline definitions against an executor context
pub struct PipelineExecutor {
    executors: Arc<dyn StepExecutors>,
    hooks: Arc<HookService>,
    events: Arc<dyn EventBus>,
    step_log: SafeStepLog,
    error_sink: Arc<dyn RecordErrorSink>,
    dispatcher: StepDispatcher,
}

impl PipelineExecutor {
    pub fn new(executors: Arc<dyn StepExecutors>) -> Self {
        Self {
            executors,
            hooks: Arc::new(HookService::new()),
            events: Arc::new(TracingEventBus),
            step_log: SafeStepLog::disabled(),
            error_sink: Arc::new(NullRecordErrorSink),
            dispatcher: StepDispatcher::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookService>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_step_log(mut self, step_log: SafeStepLog) -> Self {
        self.step_log = step_log;
        self
    }

    pub fn with_error_sink(mut self, error_sink: Arc<dyn RecordErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    pub fn hooks(&self) -> &HookService {
        &self.hooks
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    /// Execute a fresh run of a definition
    pub async fn execute(
        &self,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
    ) -> Result<ExecutionReport> {
        self.execute_segment(definition, cx, None).await
    }

    /// Execute the remainder of a run after a gate approval
    pub async fn execute_resume(
        &self,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        resume: ResumePoint,
    ) -> Result<ExecutionReport> {
        self.execute_segment(definition, cx, Some(resume)).await
    }

    async fn execute_segment(
        &self,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        resume: Option<ResumePoint>,
    ) -> Result<ExecutionReport> {
        definition.validate()?;
        if let Some(resume) = &resume {
            if definition.step(&resume.step_key).is_none() {
                return Err(PipelineError::UnknownStep(resume.step_key.clone()));
            }
        }
        if definition.is_linear() {
            self.execute_linear(definition, cx, resume).await
        } else {
            self.execute_graph(definition, cx, resume).await
        }
    }

    /// Run one step: events, hooks, dispatch, normalization.
    ///
    /// The returned error is already wrapped as a step failure; the caller
    /// decides whether it aborts the run (sequential, FAIL_FAST) or is
    /// recorded and tolerated (BEST_EFFORT).
    pub(crate) async fn run_step(
        &self,
        definition: &PipelineDefinition,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> Result<StrategyResult> {
        publish_best_effort(
            self.events.as_ref(),
            EventEnvelope::for_step(
                EventKind::StepStarted,
                cx.run_id(),
                cx.pipeline_id(),
                &step.key,
            ),
        )
        .await;

        // Only pay for the clone when an ON_ERROR chain is registered.
        let error_records = if self.hooks.has_stage(HookStage::OnError) {
            Some(records.clone())
        } else {
            None
        };

        let scx = StrategyContext {
            definition,
            step,
            records,
            cx,
            hooks: self.hooks.as_ref(),
            step_log: &self.step_log,
            executors: self.executors.as_ref(),
            error_sink: self.error_sink.as_ref(),
        };

        match self.dispatcher.execute(scx).await {
            Ok(result) => {
                if let Some(event) = result.event.clone() {
                    publish_best_effort(self.events.as_ref(), event).await;
                }
                publish_best_effort(
                    self.events.as_ref(),
                    EventEnvelope::for_step(
                        EventKind::StepCompleted,
                        cx.run_id(),
                        cx.pipeline_id(),
                        &step.key,
                    ),
                )
                .await;
                Ok(result)
            }
            Err(source) => {
                let message = source.to_string();
                error!(step = %step.key, %message, "step failed");

                publish_best_effort(
                    self.events.as_ref(),
                    EventEnvelope::for_step(
                        EventKind::StepFailed,
                        cx.run_id(),
                        cx.pipeline_id(),
                        &step.key,
                    )
                    .with_reason(message.clone()),
                )
                .await;

                if let Some(error_records) = error_records {
                    // Observational; a failing ON_ERROR interceptor cannot
                    // mask the original step failure.
                    let _ = self
                        .hooks
                        .run(
                            definition,
                            HookStage::OnError,
                            &error_records,
                            Some(cx.run_id()),
                            Some(cx.pipeline_id()),
                        )
                        .await;
                }
                self.step_log.step_failed(&step.key, &message).await;

                Err(PipelineError::step_failed(&step.key, message))
            }
        }
    }

    /// Fold one strategy result into the segment metrics; returns the step
    /// output and whether a gate requested a pause.
    pub(crate) fn apply_result(
        metrics: &mut RunMetrics,
        result: StrategyResult,
    ) -> (StepOutput, bool) {
        let paused = result.detail.should_pause == Some(true);
        metrics.processed += result.processed;
        metrics.succeeded += result.succeeded;
        metrics.failed += result.failed;
        metrics.counters.merge(&result.counters);
        metrics.details.push(result.detail);
        for payload in result.failed_payloads {
            metrics.push_recent_failed(payload);
        }
        (result.output, paused)
    }

    /// Record a step failure into the metrics without aborting (BEST_EFFORT,
    /// and the terminal detail row of an aborting failure)
    pub(crate) fn record_step_failure(
        metrics: &mut RunMetrics,
        step: &StepDefinition,
        message: &str,
    ) {
        let mut detail = StepDetail::new(&step.key, step.step_type.as_str());
        detail.error = Some(message.to_string());
        metrics.details.push(detail);
    }

    /// Concatenate predecessor outputs in edge order, honoring branch labels
    pub(crate) fn gather_inputs(
        topology: &Topology,
        outputs: &HashMap<String, StepOutput>,
        step_key: &str,
    ) -> Vec<Record> {
        let Some(predecessors) = topology.predecessors.get(step_key) else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for edge in predecessors {
            if let Some(output) = outputs.get(&edge.from) {
                records.extend(output.records_for_branch(edge.branch.as_deref()));
            }
        }
        records
    }

    /// Publish the per-step run-progress event
    pub(crate) async fn publish_progress(
        &self,
        cx: &ExecutorContext,
        completed: u64,
        total: u64,
        metrics: &RunMetrics,
        step_key: &str,
    ) {
        let percent = if total == 0 {
            100
        } else {
            ((completed * 100) / total).min(100) as u8
        };
        let mut event = EventEnvelope::for_step(
            EventKind::PipelineRunProgress,
            cx.run_id(),
            cx.pipeline_id(),
            step_key,
        );
        event.data.percent = Some(percent);
        event.data.completed = Some(completed);
        event.data.total = Some(total);
        event.data.processed = Some(metrics.processed);
        event.data.failed = Some(metrics.failed);
        publish_best_effort(self.events.as_ref(), event).await;
    }

    /// Publish the pause event and stamp the metrics
    pub(crate) async fn mark_paused(
        &self,
        cx: &ExecutorContext,
        metrics: &mut RunMetrics,
        step_key: &str,
    ) {
        metrics.mark_paused(step_key);
        info!(step = step_key, "run paused at gate");
        publish_best_effort(
            self.events.as_ref(),
            EventEnvelope::for_step(
                EventKind::PipelinePaused,
                cx.run_id(),
                cx.pipeline_id(),
                step_key,
            ),
        )
        .await;
    }

    /// Publish the cancellation event (exactly once per segment)
    pub(crate) async fn publish_cancelled(&self, cx: &ExecutorContext) {
        info!(run_id = cx.run_id(), "run cancelled");
        publish_best_effort(
            self.events.as_ref(),
            EventEnvelope::for_run(EventKind::PipelineRunCancelled, cx.run_id(), cx.pipeline_id()),
        )
        .await;
    }

    /// Synthetic detail and gate credit for records injected at resume time
    pub(crate) fn inject_resume_metrics(metrics: &mut RunMetrics, resume: &ResumePoint) {
        let count = resume.records.len() as u64;
        metrics.counters.gated += count;
        let mut detail = StepDetail::new(&resume.step_key, "GATE");
        detail.out = Some(count);
        detail.paused = Some(false);
        detail.should_pause = Some(false);
        metrics.details.push(detail);
    }
}
