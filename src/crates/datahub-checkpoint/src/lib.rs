//! # datahub-checkpoint - Durable Run State for Pipeline Execution
//!
//! **Checkpoint document, storage trait and reference implementation** for
//! persisting and restoring pipeline run state. Checkpoints are what make
//! gate pauses resumable, cancellations forensically inspectable, and failed
//! runs recoverable.
//!
//! ## Overview
//!
//! A [`RunCheckpoint`] is a keyed JSON map owned by exactly one run. Most keys
//! are arbitrary per-step scratch data written by step executors; a small set
//! of well-known keys carries engine state:
//!
//! - `__gate:<stepKey>` - pending records and approval metadata written when a
//!   gate pauses the run ([`GateCheckpoint`])
//! - `__gateTimeout:<stepKey>` - expiry written by TIMEOUT gates
//!   ([`GateTimeoutCheckpoint`])
//! - `__pipelineStats` - running success/error counts consulted by
//!   threshold gates ([`PipelineStats`])
//!
//! The document carries a **dirty bit**: mutations set it, persistence is
//! write-when-dirty via [`CheckpointStore::persist`], and the orchestrator
//! never couples its internal maps to the stored form.
//!
//! ## Storage backends
//!
//! [`CheckpointStore`] is the integration seam. This crate ships
//! [`InMemoryCheckpointStore`] for development and tests; production
//! deployments implement the trait over their database of choice. Values pass
//! through a [`SerializerProtocol`] ([`JsonSerializer`] by default,
//! [`BincodeSerializer`] for compact binary storage).
//!
//! ## Quick start
//!
//! ```rust
//! use datahub_checkpoint::{CheckpointStore, InMemoryCheckpointStore, RunCheckpoint};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> datahub_checkpoint::Result<()> {
//! let store = InMemoryCheckpointStore::new();
//!
//! let mut checkpoint = RunCheckpoint::new("run-1");
//! checkpoint.insert("my-step", serde_json::json!({"cursor": 42}));
//! store.persist(&mut checkpoint).await?;
//!
//! let restored = store.load("run-1").await?.unwrap();
//! assert_eq!(restored.get("my-step").unwrap()["cursor"], 42);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    gate_key, gate_timeout_key, GateCheckpoint, GateTimeoutCheckpoint, PipelineStats,
    RunCheckpoint, PIPELINE_STATS_KEY,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
