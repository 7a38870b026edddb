//! # datahub-core - Pipeline Execution Engine
//!
//! The execution engine behind DataHub: versioned pipeline definitions are
//! directed acyclic graphs of typed steps (extract, transform, validate,
//! enrich, route, load, export, feed, sink, gate, trigger) executed with
//! bounded parallelism, durable checkpoints, gate approvals and a domain
//! event stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  PipelineExecutor                                            │
//! │                                                              │
//! │  definition ──> Topology ──> graph / linear orchestrator     │
//! │                                   │                          │
//! │                        ┌──────────┴─────────┐                │
//! │                        ▼                    ▼                │
//! │                  StepDispatcher        ExecutorContext       │
//! │                        │              (checkpoint, stats,    │
//! │          ┌─────────────┤               cancel, idempotency)  │
//! │          ▼             ▼                                     │
//! │   HookService    StepExecutors  ◄── adapters (external)      │
//! │   (interceptor   (extract/load/...)                          │
//! │    chains)             │                                     │
//! │                        ▼                                     │
//! │        EventBus + StepLogSink + RecordErrorSink              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine owns orchestration, metering, gating and quarantine intake;
//! everything that touches the outside world (parsers, the catalog backend,
//! webhooks, brokers) sits behind the collaborator traits re-exported from
//! this crate.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use datahub_core::{ExecutorContext, PipelineDefinition, PipelineExecutor};
//! use std::sync::Arc;
//!
//! let definition = PipelineDefinition::from_yaml_str(yaml)?;
//! let executor = PipelineExecutor::new(Arc::new(MyAdapters::new()));
//! let cx = ExecutorContext::new("run-1", "pipeline-1");
//! let report = executor.execute(&definition, &cx).await?;
//! println!("{:?} {:?}", report.outcome, report.metrics.counters);
//! ```

pub mod context;
pub mod definition;
pub mod error;
pub mod events;
pub mod executor;
pub mod gate;
pub mod hooks;
pub mod idempotency;
pub mod metrics;
pub mod orchestrator;
pub mod record;
pub mod run;
pub mod secret;
pub mod steplog;
pub mod strategy;
pub mod topology;
pub mod visual;

pub use context::{CancelFlag, ExecutorContext};
pub use definition::{
    Edge, ErrorPolicy, GateApprovalType, GateStepConfig, ParallelExecution, PipelineContext,
    PipelineDefinition, StepConfig, StepDefinition, StepKind, TriggerDefinition,
    DEFAULT_MAX_CONCURRENT_STEPS,
};
pub use error::{
    is_recoverable_message, PipelineError, RecordFailure, Result, DUPLICATE_CODE,
};
pub use events::{
    publish_best_effort, BroadcastEventBus, EventBus, EventData, EventEnvelope, EventKind,
    MemoryEventBus, TracingEventBus,
};
pub use executor::{
    LoadReport, NewRecordError, NullRecordErrorSink, RecordErrorSink, RecordOutcomeFailure,
    StepExecutors, TerminalReport, ValidateOutcome, ValidationDrop,
};
pub use gate::{GateController, GateOutcome, GateState};
pub use hooks::{HookContext, HookService, HookStage, Interceptor};
pub use idempotency::apply_idempotency;
pub use metrics::{RunCounters, RunMetrics, StepDetail, RECENT_FAILED_LIMIT};
pub use orchestrator::{ExecutionReport, PipelineExecutor, ResumePoint, RunOutcome};
pub use record::{record_from, shallow_merge, BranchOutput, Record, StepOutput};
pub use run::{Run, RunStatus};
pub use secret::{
    validate_secret, PlainCipher, SecretCipher, SecretDefinition, SecretProvider, SecretResolver,
};
pub use steplog::{MemoryStepLog, NullStepLog, SafeStepLog, StepLogEntry, StepLogSink};
pub use strategy::{StepDispatcher, StepStrategy, StrategyContext, StrategyResult};
pub use topology::{PredecessorEdge, Topology};
pub use visual::{to_canonical, to_visual, VisualEdge, VisualNode, VisualNodeData, VisualPipeline};
