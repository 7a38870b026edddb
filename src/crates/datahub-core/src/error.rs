//! Error types and the record-error taxonomy
//!
//! Three layers of failure exist in the engine, and they deliberately do not
//! mix:
//!
//! - **Per-record failures** ([`RecordFailure`]) never escape a step. They are
//!   counted, quarantined through the error sink, and the step keeps going.
//! - **Step errors** ([`PipelineError`]) abort the step and propagate to the
//!   orchestrator, which applies the run's error policy.
//! - **Publish/log failures** are swallowed with a warning at the call site
//!   and never become errors at all.
//!
//! A record failure is *recoverable* when its message looks transient -
//! the classification is a case-insensitive substring match on `timeout`,
//! `connection` or `temporarily`, matching what upstream adapters actually
//! emit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type using [`PipelineError`]
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error code attached to duplicate-entity conflicts
pub const DUPLICATE_CODE: &str = "DUPLICATE";

/// Errors raised by pipeline construction and execution
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Definition failed structural validation (duplicate keys, dangling
    /// edges, cycles)
    #[error("Pipeline definition invalid: {0}")]
    DefinitionInvalid(String),

    /// A referenced step key does not exist in the definition
    #[error("Unknown step '{0}'")]
    UnknownStep(String),

    /// A step aborted as a whole (as opposed to per-record failures)
    #[error("Step '{step}' failed: {message}")]
    StepFailed {
        /// Key of the failing step
        step: String,
        /// Underlying error message
        message: String,
    },

    /// An interceptor aborted a hook chain
    #[error("Interceptor '{interceptor}' failed at stage {stage}: {message}")]
    Hook {
        stage: String,
        interceptor: String,
        message: String,
    },

    /// External executor error surfaced by a strategy
    #[error("Executor error: {0}")]
    Executor(String),

    /// Gate protocol violation (wrong step key, no paused gate, ...)
    #[error("Gate error: {0}")]
    Gate(String),

    /// Illegal run status transition
    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Secret definition or resolution failure
    #[error("Secret error: {0}")]
    Secret(String),

    /// Checkpoint persistence failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] datahub_checkpoint::CheckpointError),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML definition parsing failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Application-defined error
    #[error("{0}")]
    Custom(String),
}

impl PipelineError {
    /// Step failure with context
    pub fn step_failed(step: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PipelineError::StepFailed {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Executor failure
    pub fn executor(message: impl std::fmt::Display) -> Self {
        PipelineError::Executor(message.to_string())
    }
}

/// Substrings that mark an error message as transient
const RECOVERABLE_MARKERS: [&str; 3] = ["timeout", "connection", "temporarily"];

/// Classify an error message as transient (retry-worthy) or not
///
/// Case-insensitive substring match; the marker set is part of the public
/// quarantine contract and is relied upon by retry tooling.
pub fn is_recoverable_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RECOVERABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Structured failure for a single record
///
/// Produced by validators, loaders and executors; carried into quarantine by
/// the error sink. `recoverable` is always derived from the message via
/// [`is_recoverable_message`] so retry semantics stay uniform across sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    /// Human-readable failure message
    pub message: String,
    /// Stable machine code (`REQUIRED`, `DUPLICATE`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Whether the failure looks transient
    pub recoverable: bool,
}

impl RecordFailure {
    /// Build a failure, deriving `recoverable` from the message
    pub fn classify(message: impl Into<String>, code: Option<String>) -> Self {
        let message = message.into();
        let recoverable = is_recoverable_message(&message);
        Self {
            message,
            code,
            recoverable,
        }
    }

    /// Duplicate-entity conflict; never recoverable
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(DUPLICATE_CODE.to_string()),
            recoverable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_markers_are_case_insensitive() {
        assert!(is_recoverable_message("Connection refused"));
        assert!(is_recoverable_message("request TIMEOUT after 30s"));
        assert!(is_recoverable_message("service temporarily unavailable"));
        assert!(!is_recoverable_message("duplicate sku"));
        assert!(!is_recoverable_message(""));
    }

    #[test]
    fn classify_derives_recoverable() {
        let transient = RecordFailure::classify("upstream connection reset", None);
        assert!(transient.recoverable);

        let fatal = RecordFailure::classify("missing required field sku", Some("REQUIRED".into()));
        assert!(!fatal.recoverable);
        assert_eq!(fatal.code.as_deref(), Some("REQUIRED"));
    }

    #[test]
    fn duplicate_is_never_recoverable() {
        // Even a message containing a transient marker stays fatal once it is
        // a duplicate conflict.
        let dup = RecordFailure::duplicate("duplicate entity found during connection sync");
        assert!(!dup.recoverable);
        assert_eq!(dup.code.as_deref(), Some(DUPLICATE_CODE));
    }
}
