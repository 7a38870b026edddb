//! Extensible checkpoint storage trait for custom backend implementations
//!
//! [`CheckpointStore`] is the seam between the execution engine and durable
//! storage. The engine holds one [`RunCheckpoint`](crate::RunCheckpoint) per
//! run in memory and calls [`persist`](CheckpointStore::persist) at
//! transition points (pause, completion, failure); the store only sees a
//! serialized document keyed by run id.
//!
//! Implementations must be `Send + Sync`: runs execute concurrently and each
//! persists its own checkpoint. A store must treat `save` as an upsert - a
//! run persists repeatedly as it progresses.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use datahub_checkpoint::{CheckpointStore, RunCheckpoint, Result};
//! use async_trait::async_trait;
//!
//! struct PostgresCheckpointStore { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl CheckpointStore for PostgresCheckpointStore {
//!     async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
//!         let doc = serde_json::to_value(checkpoint)?;
//!         // INSERT ... ON CONFLICT (run_id) DO UPDATE SET doc = $2
//!         # let _ = doc;
//!         Ok(())
//!     }
//!
//!     async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
//!         // SELECT doc FROM checkpoints WHERE run_id = $1
//!         Ok(None)
//!     }
//!
//!     async fn delete(&self, run_id: &str) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

use crate::{checkpoint::RunCheckpoint, error::Result};
use async_trait::async_trait;

/// Storage backend for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Upsert the checkpoint document for its run
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()>;

    /// Load the checkpoint for a run, or `None` if it was never persisted
    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>>;

    /// Remove a run's checkpoint
    async fn delete(&self, run_id: &str) -> Result<()>;

    /// Write-when-dirty: save only if the document has unpersisted mutations,
    /// lowering the dirty bit on success.
    async fn persist(&self, checkpoint: &mut RunCheckpoint) -> Result<()> {
        if !checkpoint.is_dirty() {
            return Ok(());
        }
        self.save(checkpoint).await?;
        checkpoint.clear_dirty();
        Ok(())
    }
}
