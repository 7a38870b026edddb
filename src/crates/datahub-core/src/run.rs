//! Run lifecycle and status state machine
//!
//! A [`Run`] is one execution of a pipeline definition. Status transitions
//! are closed over the graph below; anything else is an
//! [`InvalidTransition`](crate::PipelineError::InvalidTransition):
//!
//! ```text
//! PENDING ──> RUNNING ──> COMPLETED
//!                │ │ │
//!                │ │ └──> FAILED | TIMEOUT
//!                │ └────> CANCEL_REQUESTED ──> CANCELLED
//!                └──────> PAUSED ──> RUNNING (approve)
//!                              └───> CANCELLED (reject)
//! ```
//!
//! COMPLETED, FAILED, CANCELLED and TIMEOUT are terminal.

use crate::error::{PipelineError, Result};
use crate::metrics::RunMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    CancelRequested,
    Cancelled,
    Completed,
    Failed,
    Timeout,
}

impl RunStatus {
    /// Whether the run can never leave this status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Timeout
        )
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition(self, to: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Paused)
                | (Running, CancelRequested)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Timeout)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (CancelRequested, Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Paused => "PAUSED",
            RunStatus::CancelRequested => "CANCEL_REQUESTED",
            RunStatus::Cancelled => "CANCELLED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// One execution of a pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub pipeline_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by_user_id: Option<String>,
    pub metrics: RunMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    /// Create a pending run for a pipeline
    pub fn new(pipeline_id: impl Into<String>, started_by: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            started_by_user_id: started_by,
            metrics: RunMetrics::new(),
            error: None,
        }
    }

    /// Apply a status transition, stamping `finished_at` on terminal states
    pub fn transition(&mut self, to: RunStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}
