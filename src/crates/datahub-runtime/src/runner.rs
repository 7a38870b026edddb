//! The pipeline runner: run lifecycle, gate approvals, retries, consumers
//!
//! [`PipelineRunner`] is the supervisory layer above the engine. It owns the
//! run store, drives the run state machine (PENDING -> RUNNING -> ... ->
//! terminal), wires the quarantine as the engine's error sink, persists
//! checkpoints at transition points and exposes the operational command set
//! (`run_pipeline`, `cancel_run`, `approve_gate`, `reject_gate`,
//! `retry_error`, `mark_dead_letter`, `start_consumer`, `stop_consumer`).
//!
//! Commands answer with [`CommandOutcome`] so operator surfaces get
//! `{success, message?}` rather than exceptions; `run_pipeline` itself
//! returns the [`Run`] including terminal metrics.

use crate::commands::CommandOutcome;
use crate::consumer::{ConsumerRegistry, ConsumerState, MessageHandler, MessageQueue};
use crate::error::{Result, RuntimeError};
use crate::quarantine::QuarantineStore;
use datahub_checkpoint::CheckpointStore;
use datahub_core::{
    publish_best_effort, shallow_merge, CancelFlag, EventBus, EventEnvelope, EventKind,
    ExecutionReport, ExecutorContext, HookService, HookStage, PipelineDefinition,
    PipelineExecutor, Record, RecordFailure, ResumePoint, Run, RunOutcome, RunStatus,
    SafeStepLog, StepExecutors, StepKind,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Supervisory runner for pipeline executions
pub struct PipelineRunner {
    executor: PipelineExecutor,
    executors: Arc<dyn StepExecutors>,
    checkpoints: Arc<dyn CheckpointStore>,
    quarantine: Arc<QuarantineStore>,
    queue: Option<Arc<dyn MessageQueue>>,
    consumers: ConsumerRegistry,
    pipelines: RwLock<HashMap<String, PipelineDefinition>>,
    runs: RwLock<HashMap<String, Run>>,
    cancel_flags: RwLock<HashMap<String, CancelFlag>>,
}

impl PipelineRunner {
    /// Build a runner; the quarantine store is created here and wired as the
    /// engine's error sink.
    pub fn new(executors: Arc<dyn StepExecutors>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        let quarantine = Arc::new(QuarantineStore::new());
        let executor =
            PipelineExecutor::new(executors.clone()).with_error_sink(quarantine.clone());
        Self {
            executor,
            executors,
            checkpoints,
            quarantine,
            queue: None,
            consumers: ConsumerRegistry::new(),
            pipelines: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            cancel_flags: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.executor = self.executor.with_events(events);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookService>) -> Self {
        self.executor = self.executor.with_hooks(hooks);
        self
    }

    pub fn with_step_log(mut self, step_log: SafeStepLog) -> Self {
        self.executor = self.executor.with_step_log(step_log);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// The quarantine backing `retry_error` / `mark_dead_letter`
    pub fn quarantine(&self) -> &Arc<QuarantineStore> {
        &self.quarantine
    }

    /// Register (or replace) a pipeline definition under an id
    pub fn register_pipeline(&self, pipeline_id: impl Into<String>, definition: PipelineDefinition) {
        self.pipelines.write().insert(pipeline_id.into(), definition);
    }

    pub fn get_run(&self, run_id: &str) -> Option<Run> {
        self.runs.read().get(run_id).cloned()
    }

    pub fn list_runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.runs.read().values().cloned().collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }

    /// Start a run of a registered pipeline and drive it to its next resting
    /// state (terminal or paused). The returned [`Run`] carries the status
    /// and accumulated metrics.
    pub async fn run_pipeline(&self, pipeline_id: &str) -> Result<Run> {
        self.run_pipeline_as(pipeline_id, None).await
    }

    pub async fn run_pipeline_as(
        &self,
        pipeline_id: &str,
        started_by: Option<String>,
    ) -> Result<Run> {
        let definition = self
            .pipelines
            .read()
            .get(pipeline_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownPipeline(pipeline_id.to_string()))?;

        let mut run = Run::new(pipeline_id, started_by);
        run.transition(RunStatus::Running)?;
        let run_id = run.run_id.clone();
        info!(run_id = %run_id, pipeline = pipeline_id, "run starting");
        self.runs.write().insert(run_id.clone(), run);

        let cx = ExecutorContext::new(run_id.clone(), pipeline_id);
        self.cancel_flags
            .write()
            .insert(run_id.clone(), cx.cancel_flag());

        self.lifecycle(&definition, HookStage::PipelineStarted, EventKind::PipelineStarted, &cx)
            .await;

        match self.executor.execute(&definition, &cx).await {
            Ok(report) => self.settle(&run_id, &definition, &cx, report, false).await,
            Err(error) => {
                self.fail_run(&run_id, &definition, &cx, error.to_string())
                    .await
            }
        }
    }

    /// Request cooperative cancellation of a running run
    pub fn cancel_run(&self, run_id: &str) -> CommandOutcome {
        let outcome = self.with_run(run_id, |run| {
            run.transition(RunStatus::CancelRequested)
                .map_err(RuntimeError::from)
        });
        match outcome {
            Ok(()) => {
                if let Some(flag) = self.cancel_flags.read().get(run_id) {
                    flag.request();
                }
                CommandOutcome::ok()
            }
            Err(error) => CommandOutcome::failure(error.to_string()),
        }
    }

    /// Mark a running run as timed out (driven by an external watchdog)
    pub fn mark_timed_out(&self, run_id: &str) -> CommandOutcome {
        match self.with_run(run_id, |run| {
            run.transition(RunStatus::Timeout).map_err(RuntimeError::from)
        }) {
            Ok(()) => CommandOutcome::ok(),
            Err(error) => CommandOutcome::failure(error.to_string()),
        }
    }

    /// Approve a paused gate: consume the pending set and resume the run
    pub async fn approve_gate(&self, run_id: &str, step_key: &str) -> CommandOutcome {
        match self.try_approve(run_id, step_key).await {
            Ok(()) => CommandOutcome::ok(),
            Err(error) => CommandOutcome::failure(error.to_string()),
        }
    }

    /// Reject a paused gate: the run terminates as CANCELLED
    pub async fn reject_gate(&self, run_id: &str, step_key: &str) -> CommandOutcome {
        match self.try_reject(run_id, step_key).await {
            Ok(()) => CommandOutcome::ok(),
            Err(error) => CommandOutcome::failure(error.to_string()),
        }
    }

    /// Retry a quarantined record, optionally patching its payload first
    pub async fn retry_error(
        &self,
        error_id: &str,
        patch: Option<Value>,
        user_id: Option<String>,
    ) -> CommandOutcome {
        match self.try_retry(error_id, patch, user_id).await {
            Ok(message) => CommandOutcome::ok_with(message),
            Err(error) => CommandOutcome::failure(error.to_string()),
        }
    }

    /// Toggle a quarantined record's dead-letter flag
    pub async fn mark_dead_letter(&self, error_id: &str, dead_letter: bool) -> CommandOutcome {
        let Some(error) = self.quarantine.set_dead_letter(error_id, dead_letter) else {
            return CommandOutcome::failure(format!("unknown record error '{error_id}'"));
        };
        if dead_letter {
            if let Some(pipeline_id) = self.pipeline_of_run(&error.run_id) {
                if let Some(definition) = self.pipelines.read().get(&pipeline_id).cloned() {
                    let records = payload_records(&error.payload);
                    let _ = self
                        .executor
                        .hooks()
                        .run(
                            &definition,
                            HookStage::OnDeadLetter,
                            &records,
                            Some(&error.run_id),
                            Some(&pipeline_id),
                        )
                        .await;
                }
            }
        }
        CommandOutcome::ok()
    }

    /// Start the queue consumer for a trigger pipeline. Takes the shared
    /// handle because the consumer task runs pipelines through it.
    pub fn start_consumer(self: Arc<Self>, pipeline_code: &str) -> CommandOutcome {
        let Some(definition) = self.pipelines.read().get(pipeline_code).cloned() else {
            return CommandOutcome::failure(format!("unknown pipeline '{pipeline_code}'"));
        };
        let Some(queue) = self.queue.clone() else {
            return CommandOutcome::failure("no message queue configured");
        };
        let queue_name = definition
            .trigger
            .as_ref()
            .and_then(|trigger| trigger.queue.clone())
            .unwrap_or_else(|| format!("pipeline.{pipeline_code}"));

        let runner = Arc::clone(&self);
        let code = pipeline_code.to_string();
        let handler: MessageHandler = Arc::new(move |_payload| {
            let runner = runner.clone();
            let code = code.clone();
            Box::pin(async move {
                match runner.run_pipeline(&code).await {
                    Ok(run) if run.status == RunStatus::Completed => Ok(()),
                    Ok(run) => Err(format!("run finished as {}", run.status)),
                    Err(error) => Err(error.to_string()),
                }
            })
        });

        self.consumers
            .start(pipeline_code, &queue_name, queue, handler)
    }

    /// Stop the queue consumer for a pipeline
    pub fn stop_consumer(&self, pipeline_code: &str) -> CommandOutcome {
        self.consumers.stop(pipeline_code)
    }

    pub fn consumer_state(&self, pipeline_code: &str) -> Option<ConsumerState> {
        self.consumers.state(pipeline_code)
    }

    /// Wait for a stopped consumer task to exit (shutdown, tests)
    pub async fn join_consumer(&self, pipeline_code: &str) {
        self.consumers.join(pipeline_code).await;
    }

    // ---- internals ----

    async fn try_approve(&self, run_id: &str, step_key: &str) -> Result<()> {
        let pipeline_id = self.validate_paused_gate(run_id, step_key)?;
        let definition = self
            .pipelines
            .read()
            .get(&pipeline_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownPipeline(pipeline_id.clone()))?;

        let checkpoint = self
            .checkpoints
            .load(run_id)
            .await?
            .ok_or_else(|| datahub_checkpoint::CheckpointError::NotFound(run_id.to_string()))?;
        let cx = ExecutorContext::from_checkpoint(pipeline_id.clone(), checkpoint);

        let gate = cx
            .with_checkpoint(|checkpoint| {
                let gate = checkpoint.take_gate(step_key)?;
                checkpoint.take_gate_timeout(step_key)?;
                Ok::<_, datahub_checkpoint::CheckpointError>(gate)
            })?
            .ok_or_else(|| {
                RuntimeError::Pipeline(datahub_core::PipelineError::Gate(format!(
                    "no pending gate entry for step '{step_key}'"
                )))
            })?;

        self.with_run(run_id, |run| {
            run.transition(RunStatus::Running).map_err(RuntimeError::from)
        })?;
        self.cancel_flags
            .write()
            .insert(run_id.to_string(), cx.cancel_flag());

        info!(run_id, step_key, pending = gate.pending_record_count, "gate approved, resuming");
        let records: Vec<Record> = gate
            .pending_records
            .into_iter()
            .filter_map(|value| value.as_object().cloned())
            .collect();

        let report = self
            .executor
            .execute_resume(
                &definition,
                &cx,
                ResumePoint {
                    step_key: step_key.to_string(),
                    records,
                },
            )
            .await?;
        self.settle(run_id, &definition, &cx, report, true).await?;
        Ok(())
    }

    async fn try_reject(&self, run_id: &str, step_key: &str) -> Result<()> {
        let pipeline_id = self.validate_paused_gate(run_id, step_key)?;

        let mut checkpoint = self
            .checkpoints
            .load(run_id)
            .await?
            .ok_or_else(|| datahub_checkpoint::CheckpointError::NotFound(run_id.to_string()))?;
        checkpoint.take_gate(step_key)?;
        checkpoint.take_gate_timeout(step_key)?;
        self.checkpoints.persist(&mut checkpoint).await?;

        self.with_run(run_id, |run| {
            run.transition(RunStatus::Cancelled).map_err(RuntimeError::from)
        })?;

        info!(run_id, step_key, "gate rejected, run cancelled");
        publish_best_effort(
            self.executor.events().as_ref(),
            EventEnvelope::for_step(
                EventKind::PipelineRunCancelled,
                run_id,
                &pipeline_id,
                step_key,
            )
            .with_reason("gate rejected"),
        )
        .await;
        Ok(())
    }

    async fn try_retry(
        &self,
        error_id: &str,
        patch: Option<Value>,
        user_id: Option<String>,
    ) -> Result<String> {
        let error = self
            .quarantine
            .get(error_id)
            .ok_or_else(|| RuntimeError::UnknownRecordError(error_id.to_string()))?;
        if error.resolved {
            return Err(RuntimeError::Pipeline(datahub_core::PipelineError::Custom(
                format!("record error '{error_id}' is already resolved"),
            )));
        }

        let pipeline_id = self
            .pipeline_of_run(&error.run_id)
            .ok_or_else(|| RuntimeError::UnknownRun(error.run_id.clone()))?;
        let definition = self
            .pipelines
            .read()
            .get(&pipeline_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownPipeline(pipeline_id.clone()))?;
        let step = definition
            .step(&error.step_key)
            .ok_or_else(|| {
                RuntimeError::Pipeline(datahub_core::PipelineError::UnknownStep(
                    error.step_key.clone(),
                ))
            })?
            .clone();
        if step.step_type != StepKind::Load {
            return Err(RuntimeError::Pipeline(datahub_core::PipelineError::Custom(
                format!("step '{}' is not a load step; only load errors re-enter the loader", step.key),
            )));
        }

        let mut payload = error
            .payload
            .as_object()
            .cloned()
            .unwrap_or_default();
        let patch_value = patch.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        if let Some(patch_object) = patch_value.as_object() {
            shallow_merge(&mut payload, patch_object);
        }

        let _ = self
            .executor
            .hooks()
            .run(
                &definition,
                HookStage::OnRetry,
                &[payload.clone()],
                Some(&error.run_id),
                Some(&pipeline_id),
            )
            .await;

        // Re-enter the loader path with the patched payload under the
        // original run's identity.
        let cx = ExecutorContext::new(error.run_id.clone(), pipeline_id);
        let report = self
            .executors
            .load(&step, vec![payload.clone()], &cx)
            .await?;

        let resulting = Value::Object(payload);
        if report.fail == 0 {
            self.quarantine
                .record_retry(error_id, &patch_value, user_id, resulting, None);
            info!(error_id, "retry succeeded, record resolved");
            Ok("record loaded".to_string())
        } else {
            let failure: RecordFailure = report
                .failures
                .first()
                .map(|failure| failure.failure.clone())
                .unwrap_or_else(|| RecordFailure::classify("load failed", None));
            let message = failure.message.clone();
            self.quarantine
                .record_retry(error_id, &patch_value, user_id, resulting, Some(failure));
            warn!(error_id, %message, "retry failed");
            Err(RuntimeError::Pipeline(datahub_core::PipelineError::Custom(
                message,
            )))
        }
    }

    /// Validate that a run is paused at the named gate; returns the pipeline
    fn validate_paused_gate(&self, run_id: &str, step_key: &str) -> Result<String> {
        let runs = self.runs.read();
        let run = runs
            .get(run_id)
            .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()))?;
        if run.status != RunStatus::Paused {
            return Err(RuntimeError::Pipeline(datahub_core::PipelineError::Gate(
                format!("run '{run_id}' is not paused"),
            )));
        }
        if run.metrics.paused_at_step.as_deref() != Some(step_key) {
            return Err(RuntimeError::Pipeline(datahub_core::PipelineError::Gate(
                format!(
                    "run '{run_id}' is paused at '{}', not '{step_key}'",
                    run.metrics.paused_at_step.as_deref().unwrap_or("?")
                ),
            )));
        }
        Ok(run.pipeline_id.clone())
    }

    /// Fold an execution report into the run and drive the state machine
    async fn settle(
        &self,
        run_id: &str,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        report: ExecutionReport,
        resumed: bool,
    ) -> Result<Run> {
        let ExecutionReport { metrics, outcome } = report;
        self.with_run(run_id, |run| {
            if resumed {
                run.metrics.clear_paused();
                run.metrics.merge(metrics);
            } else {
                run.metrics = metrics;
            }
            Ok(())
        })?;

        // Cancellation that arrived after the final step still wins: no new
        // step began, so the run terminates CANCELLED whatever the segment
        // outcome was.
        let cancel_requested =
            self.with_run(run_id, |run| Ok(run.status == RunStatus::CancelRequested))?;
        if cancel_requested {
            self.with_run(run_id, |run| {
                run.transition(RunStatus::Cancelled).map_err(RuntimeError::from)
            })?;
            self.persist_checkpoint(cx).await?;
            return self
                .get_run(run_id)
                .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()));
        }

        match &outcome {
            RunOutcome::Completed => {
                self.with_run(run_id, |run| {
                    run.transition(RunStatus::Completed).map_err(RuntimeError::from)
                })?;
                self.lifecycle(
                    definition,
                    HookStage::PipelineCompleted,
                    EventKind::PipelineCompleted,
                    cx,
                )
                .await;
            }
            RunOutcome::Paused { .. } => {
                self.with_run(run_id, |run| {
                    run.transition(RunStatus::Paused).map_err(RuntimeError::from)
                })?;
            }
            RunOutcome::Cancelled => {
                self.with_run(run_id, |run| {
                    if run.status == RunStatus::Running {
                        run.transition(RunStatus::CancelRequested)?;
                    }
                    run.transition(RunStatus::Cancelled).map_err(RuntimeError::from)
                })?;
            }
            RunOutcome::Failed { message, .. } => {
                let message = message.clone();
                self.with_run(run_id, |run| {
                    run.error = Some(message.clone());
                    run.transition(RunStatus::Failed).map_err(RuntimeError::from)
                })?;
                self.lifecycle(
                    definition,
                    HookStage::PipelineFailed,
                    EventKind::PipelineFailed,
                    cx,
                )
                .await;
            }
        }

        // Checkpoints survive every outcome - a failed run's checkpoint is
        // forensic evidence, a paused run's carries the pending gate set.
        self.persist_checkpoint(cx).await?;
        self.get_run(run_id)
            .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()))
    }

    /// Structural failure before/inside the orchestrator: mark FAILED
    async fn fail_run(
        &self,
        run_id: &str,
        definition: &PipelineDefinition,
        cx: &ExecutorContext,
        message: String,
    ) -> Result<Run> {
        warn!(run_id, %message, "run failed");
        self.with_run(run_id, |run| {
            run.error = Some(message.clone());
            run.transition(RunStatus::Failed).map_err(RuntimeError::from)
        })?;
        self.lifecycle(definition, HookStage::PipelineFailed, EventKind::PipelineFailed, cx)
            .await;
        self.persist_checkpoint(cx).await?;
        self.get_run(run_id)
            .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()))
    }

    async fn persist_checkpoint(&self, cx: &ExecutorContext) -> Result<()> {
        let mut snapshot = cx.checkpoint_snapshot();
        if snapshot.is_dirty() {
            self.checkpoints.persist(&mut snapshot).await?;
            cx.checkpoint_persisted();
        }
        Ok(())
    }

    /// Run a lifecycle hook stage and publish the matching event. Lifecycle
    /// hook failures are logged, never fatal - there is no step to fail.
    async fn lifecycle(
        &self,
        definition: &PipelineDefinition,
        stage: HookStage,
        kind: EventKind,
        cx: &ExecutorContext,
    ) {
        if let Err(error) = self
            .executor
            .hooks()
            .run(definition, stage, &[], Some(cx.run_id()), Some(cx.pipeline_id()))
            .await
        {
            warn!(stage = %stage, %error, "lifecycle hook failed");
        }
        publish_best_effort(
            self.executor.events().as_ref(),
            EventEnvelope::for_run(kind, cx.run_id(), cx.pipeline_id()),
        )
        .await;
    }

    fn with_run<R>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut Run) -> Result<R>,
    ) -> Result<R> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()))?;
        f(run)
    }

    fn pipeline_of_run(&self, run_id: &str) -> Option<String> {
        self.runs
            .read()
            .get(run_id)
            .map(|run| run.pipeline_id.clone())
    }
}

/// Treat a stored payload as a one-record sequence for hook chains
fn payload_records(payload: &Value) -> Vec<Record> {
    payload
        .as_object()
        .cloned()
        .map(|record| vec![record])
        .unwrap_or_default()
}
