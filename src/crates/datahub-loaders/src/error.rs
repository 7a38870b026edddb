//! Error types for loader operations

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors raised by entity loaders and the catalog backend
///
/// Errors thrown while handling one record do not abort the load loop; the
/// framework converts them into per-record failures classified by message
/// (see [`datahub_core::is_recoverable_message`]).
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Backend catalog call failed
    #[error("Catalog error: {0}")]
    Backend(String),

    /// Requested entity does not exist
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Loader does not support the requested operation
    #[error("Operation {operation} not supported by the {entity} loader")]
    UnsupportedOperation { entity: String, operation: String },

    /// Step config could not be parsed into load options
    #[error("Invalid load options: {0}")]
    InvalidOptions(String),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
