//! Per-step strategies and the dispatcher
//!
//! One strategy exists per step kind. Each implements the same skeleton:
//!
//! 1. log step start (kind, input size) to the step log sink
//! 2. run the `BEFORE_<X>` hook chain - mutating for processing kinds,
//!    observational for terminal kinds (LOAD/EXPORT/FEED/SINK)
//! 3. invoke the external executor
//! 4. compute the duration
//! 5. run the `AFTER_<X>` hook chain (same mutability rule)
//! 6. emit DEBUG samples / transform mappings when the sink opted in
//! 7. log step complete and return a [`StrategyResult`]
//!
//! The orchestrator wraps every dispatch with `StepStarted` /
//! `StepCompleted` events; the domain event a strategy returns is published
//! between the two, preserving the per-step event order.
//!
//! [`StepDispatcher`] maps a step kind to its strategy. Unknown kinds pass
//! records through untouched with an `unhandled` detail and a warning, so
//! definitions written for a newer engine degrade instead of failing.

mod extract;
mod gate_step;
mod load;
mod route;
mod terminal;
mod transform;
mod validate;

pub use extract::ExtractStrategy;
pub use gate_step::GateStrategy;
pub use load::LoadStrategy;
pub use route::RouteStrategy;
pub use terminal::{ExportStrategy, FeedStrategy, SinkStrategy};
pub use transform::{EnrichStrategy, TransformStrategy};
pub use validate::ValidateStrategy;

use crate::context::ExecutorContext;
use crate::definition::{PipelineDefinition, StepDefinition, StepKind};
use crate::error::Result;
use crate::events::EventEnvelope;
use crate::executor::{RecordErrorSink, StepExecutors};
use crate::hooks::{HookService, HookStage};
use crate::metrics::{RunCounters, StepDetail};
use crate::record::{Record, StepOutput};
use crate::steplog::SafeStepLog;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Records included in DEBUG samples handed to the step log sink
pub(crate) const DEBUG_SAMPLE_LIMIT: usize = 10;

/// Everything a strategy needs for one step invocation
pub struct StrategyContext<'a> {
    pub definition: &'a PipelineDefinition,
    pub step: &'a StepDefinition,
    /// Concatenated predecessor outputs in edge order
    pub records: Vec<Record>,
    pub cx: &'a ExecutorContext,
    pub hooks: &'a HookService,
    pub step_log: &'a SafeStepLog,
    pub executors: &'a dyn StepExecutors,
    pub error_sink: &'a dyn RecordErrorSink,
}

impl<'a> StrategyContext<'a> {
    pub fn run_id(&self) -> &str {
        self.cx.run_id()
    }

    pub fn pipeline_id(&self) -> &str {
        self.cx.pipeline_id()
    }

    /// Mutating hook chain for a stage
    pub(crate) async fn run_mutating_hooks(
        &self,
        stage: HookStage,
        records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        self.hooks
            .run_interceptors(
                self.definition,
                stage,
                records,
                Some(self.run_id()),
                Some(self.pipeline_id()),
            )
            .await
    }

    /// Observational hook chain for a stage (terminal kinds)
    pub(crate) async fn run_observational_hooks(
        &self,
        stage: HookStage,
        records: &[Record],
    ) -> Result<()> {
        self.hooks
            .run(
                self.definition,
                stage,
                records,
                Some(self.run_id()),
                Some(self.pipeline_id()),
            )
            .await
    }

    /// Start a detail row prefilled with the step's identity
    pub(crate) fn detail(&self) -> StepDetail {
        let mut detail = StepDetail::new(&self.step.key, self.step.step_type.as_str());
        detail.adapter_code = self.step.config.adapter_code().map(str::to_string);
        detail
    }
}

/// Normalized result every strategy hands back to the orchestrator
pub struct StrategyResult {
    /// Records (or branches) visible to successors
    pub output: StepOutput,
    /// Records this step introduced into the run (EXTRACT only)
    pub processed: u64,
    /// Loader successes
    pub succeeded: u64,
    /// Loader failures plus validation drops
    pub failed: u64,
    pub detail: StepDetail,
    pub counters: RunCounters,
    /// Domain event published between `StepStarted` and `StepCompleted`
    pub event: Option<EventEnvelope>,
    /// Payloads of records that failed, for the run's `recent_failed` tail
    pub failed_payloads: Vec<Value>,
}

impl StrategyResult {
    /// Result with empty output and zeroed counters
    pub fn empty(detail: StepDetail) -> Self {
        Self {
            output: StepOutput::empty(),
            processed: 0,
            succeeded: 0,
            failed: 0,
            detail,
            counters: RunCounters::default(),
            event: None,
            failed_payloads: Vec::new(),
        }
    }

    /// Passthrough result: output equals the input records
    pub fn passthrough(detail: StepDetail, records: Vec<Record>) -> Self {
        Self {
            output: StepOutput::Records(records),
            ..Self::empty(detail)
        }
    }
}

/// One step-kind strategy
#[async_trait]
pub trait StepStrategy: Send + Sync {
    async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult>;
}

/// Table mapping step kinds to strategies
#[derive(Default)]
pub struct StepDispatcher {
    extract: ExtractStrategy,
    transform: TransformStrategy,
    validate: ValidateStrategy,
    enrich: EnrichStrategy,
    route: RouteStrategy,
    load: LoadStrategy,
    export: ExportStrategy,
    feed: FeedStrategy,
    sink: SinkStrategy,
    gate: GateStrategy,
}

impl StepDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch one step invocation to its strategy
    pub async fn execute(&self, scx: StrategyContext<'_>) -> Result<StrategyResult> {
        match scx.step.step_type {
            StepKind::Extract => self.extract.execute(scx).await,
            StepKind::Transform => self.transform.execute(scx).await,
            StepKind::Validate => self.validate.execute(scx).await,
            StepKind::Enrich => self.enrich.execute(scx).await,
            StepKind::Route => self.route.execute(scx).await,
            StepKind::Load => self.load.execute(scx).await,
            StepKind::Export => self.export.execute(scx).await,
            StepKind::Feed => self.feed.execute(scx).await,
            StepKind::Sink => self.sink.execute(scx).await,
            StepKind::Gate => self.gate.execute(scx).await,
            StepKind::Trigger => Ok(Self::trigger_noop(&scx)),
            StepKind::Unknown => Ok(Self::unhandled(scx)),
        }
    }

    /// TRIGGER is wiring, not work: emit a skipped detail and move on
    fn trigger_noop(scx: &StrategyContext<'_>) -> StrategyResult {
        debug!(step = %scx.step.key, "trigger step is a no-op at run time");
        let mut detail = scx.detail();
        detail.skipped = Some(true);
        let mut result = StrategyResult::empty(detail);
        result.event = Some(EventEnvelope::for_step(
            crate::events::EventKind::StepSkipped,
            scx.run_id(),
            scx.pipeline_id(),
            &scx.step.key,
        ));
        result
    }

    /// Forward compatibility: unknown kinds pass records through untouched
    fn unhandled(scx: StrategyContext<'_>) -> StrategyResult {
        warn!(
            step = %scx.step.key,
            "step kind not handled by this engine version, passing records through"
        );
        let mut detail = scx.detail();
        detail.skipped = Some(true);
        detail.unhandled = Some(true);
        let records = scx.records;
        StrategyResult::passthrough(detail, records)
    }
}
