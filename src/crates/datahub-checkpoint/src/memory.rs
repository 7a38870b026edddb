//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] keeps serialized documents in a map behind an
//! `RwLock`. Data is lost on restart - it exists so the engine, tests and
//! small single-process deployments work with zero configuration. Documents
//! pass through the configured [`SerializerProtocol`] exactly as they would
//! for a real backend, so serialization bugs surface in tests rather than in
//! production.

use crate::{
    checkpoint::RunCheckpoint,
    error::Result,
    serializer::{JsonSerializer, SerializerProtocol},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Thread-safe in-memory implementation of [`CheckpointStore`]
pub struct InMemoryCheckpointStore<S: SerializerProtocol = JsonSerializer> {
    documents: RwLock<HashMap<String, Vec<u8>>>,
    serializer: S,
}

impl InMemoryCheckpointStore<JsonSerializer> {
    /// Create a store using the default JSON serializer
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer::new())
    }
}

impl Default for InMemoryCheckpointStore<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SerializerProtocol> InMemoryCheckpointStore<S> {
    /// Create a store with a custom serializer
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            serializer,
        }
    }

    /// Number of stored checkpoints
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Drop all stored checkpoints (test isolation)
    pub fn clear(&self) {
        self.documents.write().clear();
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointStore for InMemoryCheckpointStore<S> {
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        let bytes = self.serializer.dumps(checkpoint)?;
        self.documents
            .write()
            .insert(checkpoint.run_id.clone(), bytes);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        let bytes = match self.documents.read().get(run_id) {
            Some(bytes) => bytes.clone(),
            None => return Ok(None),
        };
        Ok(Some(self.serializer.loads(&bytes)?))
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        self.documents.write().remove(run_id);
        Ok(())
    }
}
