//! Run metrics: aggregate counters and per-step details
//!
//! [`RunMetrics`] accumulates while a run executes and is terminal once the
//! run reaches a terminal status. `processed` counts records emitted by
//! EXTRACT steps; `succeeded`/`failed` count loader outcomes plus validation
//! drops - the two are intentionally decoupled, so `succeeded + failed` may
//! exceed or undershoot `processed`.
//!
//! Metrics merge across pause/resume segments: a resumed run's terminal
//! metrics must equal an uninterrupted run's (modulo timing fields), which is
//! why [`RunMetrics::merge`] adds counters and appends details rather than
//! replacing anything.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Cap on the `recent_failed` tail kept in metrics
pub const RECENT_FAILED_LIMIT: usize = 10;

/// Per-kind record counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    pub extracted: u64,
    pub transformed: u64,
    pub validated: u64,
    pub enriched: u64,
    pub routed: u64,
    pub loaded: u64,
    pub rejected: u64,
    pub gated: u64,
}

impl RunCounters {
    /// Add another counter set into this one
    pub fn merge(&mut self, other: &RunCounters) {
        self.extracted += other.extracted;
        self.transformed += other.transformed;
        self.validated += other.validated;
        self.enriched += other.enriched;
        self.routed += other.routed;
        self.loaded += other.loaded;
        self.rejected += other.rejected;
        self.gated += other.gated;
    }
}

/// One row in `RunMetrics::details`, appended per step completion
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDetail {
    pub step_key: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_code: Option<String>,
    /// Records that went out of a producing step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<u64>,
    /// Successful records of a terminal step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<u64>,
    /// Failed records of a terminal step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail: Option<u64>,
    pub duration_ms: u64,
    /// ROUTE only: record count per branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches: Option<BTreeMap<String, u64>>,
    /// GATE only: whether this step paused the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_pause: Option<bool>,
    /// FEED only: where the feed landed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Set when the dispatcher skipped the step (TRIGGER, unknown kinds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    /// Set when the step kind had no registered strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhandled: Option<bool>,
    /// Step-level error message (BEST_EFFORT mode keeps the run going)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepDetail {
    /// Start a detail row for a step
    pub fn new(step_key: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            step_type: step_type.into(),
            ..Self::default()
        }
    }
}

/// Aggregate counters plus per-step details for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    /// Records emitted by EXTRACT steps
    pub processed: u64,
    /// Loader successes
    pub succeeded: u64,
    /// Loader failures plus validation drops
    pub failed: u64,
    pub counters: RunCounters,
    pub details: Vec<StepDetail>,
    /// Raised when a gate paused the run
    #[serde(default)]
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at_step: Option<String>,
    /// Tail of recently failed record payloads (capped)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_failed: Vec<Value>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failed payload to the capped tail
    pub fn push_recent_failed(&mut self, payload: Value) {
        if self.recent_failed.len() >= RECENT_FAILED_LIMIT {
            self.recent_failed.remove(0);
        }
        self.recent_failed.push(payload);
    }

    /// Mark the run paused at a gate
    pub fn mark_paused(&mut self, step_key: impl Into<String>) {
        self.paused = true;
        self.paused_at_step = Some(step_key.into());
    }

    /// Clear the pause markers (resume path)
    pub fn clear_paused(&mut self) {
        self.paused = false;
        self.paused_at_step = None;
    }

    /// Fold a later execution segment into this one (gate resume)
    pub fn merge(&mut self, segment: RunMetrics) {
        self.processed += segment.processed;
        self.succeeded += segment.succeeded;
        self.failed += segment.failed;
        self.counters.merge(&segment.counters);
        self.details.extend(segment.details);
        self.paused = segment.paused;
        self.paused_at_step = segment.paused_at_step;
        for payload in segment.recent_failed {
            self.push_recent_failed(payload);
        }
    }
}
