//! Operational command results
//!
//! Every supervisory command (`run_pipeline`, `cancel_run`, `approve_gate`,
//! ...) answers with a [`CommandOutcome`] instead of an error type: the
//! caller is an operator surface, and "the gate key did not match" is an
//! answer, not an exception.

use serde::{Deserialize, Serialize};

/// `{success, message?}` result of one operational command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}
