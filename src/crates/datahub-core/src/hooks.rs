//! Ordered interceptor chains around step boundaries
//!
//! The hook service runs registered [`Interceptor`]s at fixed
//! [`HookStage`]s: pipeline lifecycle stages, a `BEFORE_<X>`/`AFTER_<X>` pair
//! per processing kind, and the quarantine stages `ON_ERROR`, `ON_RETRY`,
//! `ON_DEAD_LETTER`.
//!
//! Two invocation modes exist:
//!
//! - [`HookService::run`] - observational. Interceptors see the records but
//!   whatever they return is discarded. Used for lifecycle stages and for
//!   the before/after chains of terminal steps (LOAD/EXPORT/FEED/SINK).
//! - [`HookService::run_interceptors`] - mutating. Each interceptor receives
//!   the current record sequence and returns the next one; subsequent
//!   interceptors see the transformation, and the final sequence feeds the
//!   step (or its successors).
//!
//! Ordering is total and deterministic: registration order per stage. An
//! interceptor error aborts the chain and surfaces as a step failure.

use crate::definition::{PipelineDefinition, StepKind};
use crate::error::{PipelineError, Result};
use crate::record::Record;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed stages at which interceptors run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    BeforeExtract,
    AfterExtract,
    BeforeTransform,
    AfterTransform,
    BeforeValidate,
    AfterValidate,
    BeforeEnrich,
    AfterEnrich,
    BeforeRoute,
    AfterRoute,
    BeforeLoad,
    AfterLoad,
    BeforeExport,
    AfterExport,
    BeforeFeed,
    AfterFeed,
    BeforeSink,
    AfterSink,
    OnError,
    OnRetry,
    OnDeadLetter,
}

impl HookStage {
    /// The before-stage for a processing kind, if it has one
    pub fn before(kind: StepKind) -> Option<HookStage> {
        match kind {
            StepKind::Extract => Some(HookStage::BeforeExtract),
            StepKind::Transform => Some(HookStage::BeforeTransform),
            StepKind::Validate => Some(HookStage::BeforeValidate),
            StepKind::Enrich => Some(HookStage::BeforeEnrich),
            StepKind::Route => Some(HookStage::BeforeRoute),
            StepKind::Load => Some(HookStage::BeforeLoad),
            StepKind::Export => Some(HookStage::BeforeExport),
            StepKind::Feed => Some(HookStage::BeforeFeed),
            StepKind::Sink => Some(HookStage::BeforeSink),
            _ => None,
        }
    }

    /// The after-stage for a processing kind, if it has one
    pub fn after(kind: StepKind) -> Option<HookStage> {
        match kind {
            StepKind::Extract => Some(HookStage::AfterExtract),
            StepKind::Transform => Some(HookStage::AfterTransform),
            StepKind::Validate => Some(HookStage::AfterValidate),
            StepKind::Enrich => Some(HookStage::AfterEnrich),
            StepKind::Route => Some(HookStage::AfterRoute),
            StepKind::Load => Some(HookStage::AfterLoad),
            StepKind::Export => Some(HookStage::AfterExport),
            StepKind::Feed => Some(HookStage::AfterFeed),
            StepKind::Sink => Some(HookStage::AfterSink),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HookStage::PipelineStarted => "PIPELINE_STARTED",
            HookStage::PipelineCompleted => "PIPELINE_COMPLETED",
            HookStage::PipelineFailed => "PIPELINE_FAILED",
            HookStage::BeforeExtract => "BEFORE_EXTRACT",
            HookStage::AfterExtract => "AFTER_EXTRACT",
            HookStage::BeforeTransform => "BEFORE_TRANSFORM",
            HookStage::AfterTransform => "AFTER_TRANSFORM",
            HookStage::BeforeValidate => "BEFORE_VALIDATE",
            HookStage::AfterValidate => "AFTER_VALIDATE",
            HookStage::BeforeEnrich => "BEFORE_ENRICH",
            HookStage::AfterEnrich => "AFTER_ENRICH",
            HookStage::BeforeRoute => "BEFORE_ROUTE",
            HookStage::AfterRoute => "AFTER_ROUTE",
            HookStage::BeforeLoad => "BEFORE_LOAD",
            HookStage::AfterLoad => "AFTER_LOAD",
            HookStage::BeforeExport => "BEFORE_EXPORT",
            HookStage::AfterExport => "AFTER_EXPORT",
            HookStage::BeforeFeed => "BEFORE_FEED",
            HookStage::AfterFeed => "AFTER_FEED",
            HookStage::BeforeSink => "BEFORE_SINK",
            HookStage::AfterSink => "AFTER_SINK",
            HookStage::OnError => "ON_ERROR",
            HookStage::OnRetry => "ON_RETRY",
            HookStage::OnDeadLetter => "ON_DEAD_LETTER",
        }
    }
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an interceptor gets to see besides the records
pub struct HookContext<'a> {
    pub definition: &'a PipelineDefinition,
    pub stage: HookStage,
    pub run_id: Option<&'a str>,
    pub pipeline_id: Option<&'a str>,
}

/// One link of a hook chain
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Identifier used in error context
    fn name(&self) -> &str;

    /// Receive the current record sequence, return the next one
    async fn intercept(&self, ctx: &HookContext<'_>, records: Vec<Record>) -> Result<Vec<Record>>;
}

/// Registry of interceptor chains keyed by stage
#[derive(Default)]
pub struct HookService {
    chains: HashMap<HookStage, Vec<Arc<dyn Interceptor>>>,
}

impl HookService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to a stage's chain (registration order is
    /// execution order)
    pub fn register(&mut self, stage: HookStage, interceptor: Arc<dyn Interceptor>) {
        self.chains.entry(stage).or_default().push(interceptor);
    }

    /// Whether any interceptor is registered for a stage
    pub fn has_stage(&self, stage: HookStage) -> bool {
        self.chains.get(&stage).is_some_and(|chain| !chain.is_empty())
    }

    /// Observational invocation: run the chain, discard returned records
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        stage: HookStage,
        records: &[Record],
        run_id: Option<&str>,
        pipeline_id: Option<&str>,
    ) -> Result<()> {
        self.run_chain(definition, stage, records.to_vec(), run_id, pipeline_id)
            .await?;
        Ok(())
    }

    /// Mutating invocation: each interceptor sees its predecessor's output,
    /// and the final sequence is returned to the caller
    pub async fn run_interceptors(
        &self,
        definition: &PipelineDefinition,
        stage: HookStage,
        records: Vec<Record>,
        run_id: Option<&str>,
        pipeline_id: Option<&str>,
    ) -> Result<Vec<Record>> {
        self.run_chain(definition, stage, records, run_id, pipeline_id)
            .await
    }

    async fn run_chain(
        &self,
        definition: &PipelineDefinition,
        stage: HookStage,
        mut records: Vec<Record>,
        run_id: Option<&str>,
        pipeline_id: Option<&str>,
    ) -> Result<Vec<Record>> {
        let Some(chain) = self.chains.get(&stage) else {
            return Ok(records);
        };
        let ctx = HookContext {
            definition,
            stage,
            run_id,
            pipeline_id,
        };
        for interceptor in chain {
            records = interceptor
                .intercept(&ctx, records)
                .await
                .map_err(|error| PipelineError::Hook {
                    stage: stage.to_string(),
                    interceptor: interceptor.name().to_string(),
                    message: error.to_string(),
                })?;
        }
        Ok(records)
    }
}
