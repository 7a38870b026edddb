//! Error types for the supervisory runtime

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by the pipeline runner and its stores
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No pipeline registered under the given id
    #[error("Unknown pipeline '{0}'")]
    UnknownPipeline(String),

    /// No run known under the given id
    #[error("Unknown run '{0}'")]
    UnknownRun(String),

    /// No quarantined error known under the given id
    #[error("Unknown record error '{0}'")]
    UnknownRecordError(String),

    /// Engine error during execution
    #[error(transparent)]
    Pipeline(#[from] datahub_core::PipelineError),

    /// Checkpoint persistence failed
    #[error(transparent)]
    Checkpoint(#[from] datahub_checkpoint::CheckpointError),

    /// Consumer lifecycle problem
    #[error("Consumer error: {0}")]
    Consumer(String),
}
