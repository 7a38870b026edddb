//! # datahub-runtime - Supervisory Layer for Pipeline Execution
//!
//! Everything above the engine and below the operator surfaces: the
//! [`PipelineRunner`] drives run lifecycles against registered definitions,
//! the [`QuarantineStore`] keeps per-record failures with audited retries
//! and dead letters, and the [`ConsumerRegistry`] runs message-queue
//! consumers for trigger pipelines.
//!
//! ## Operational command set
//!
//! | Command | Effect |
//! |---|---|
//! | `run_pipeline(id)` | PENDING -> RUNNING -> terminal or PAUSED |
//! | `cancel_run(run_id)` | RUNNING -> CANCEL_REQUESTED -> CANCELLED |
//! | `approve_gate(run_id, step_key)` | consume the gate checkpoint, resume |
//! | `reject_gate(run_id, step_key)` | PAUSED -> CANCELLED |
//! | `retry_error(error_id, patch?)` | patched payload re-enters the loader |
//! | `mark_dead_letter(id, flag)` | toggle dead-letter visibility |
//! | `start_consumer(code)` / `stop_consumer(code)` | consumer lifecycle |
//!
//! All commands answer `{success, message?}` ([`CommandOutcome`]).
//!
//! ## Wiring
//!
//! ```rust,ignore
//! use datahub_checkpoint::InMemoryCheckpointStore;
//! use datahub_runtime::PipelineRunner;
//! use std::sync::Arc;
//!
//! let runner = Arc::new(
//!     PipelineRunner::new(Arc::new(MyAdapters::new()), Arc::new(InMemoryCheckpointStore::new()))
//!         .with_events(events)
//!         .with_queue(broker),
//! );
//! runner.register_pipeline("products-import", definition);
//! let run = runner.run_pipeline("products-import").await?;
//! ```

pub mod commands;
pub mod consumer;
pub mod error;
pub mod quarantine;
pub mod runner;

pub use commands::CommandOutcome;
pub use consumer::{
    ConsumerRegistry, ConsumerState, InMemoryQueue, MessageHandler, MessageQueue, QueueMessage,
};
pub use error::{Result, RuntimeError};
pub use quarantine::{ErrorAudit, QuarantineStore, RecordError};
pub use runner::PipelineRunner;
