//! The checkpoint document and its well-known keys
//!
//! A [`RunCheckpoint`] is the durable key-value snapshot associated with one
//! run. Step executors write arbitrary scratch data under their own keys; the
//! engine reserves a `__`-prefixed namespace for gate pauses and pipeline
//! statistics. Every mutation raises the dirty bit so the supervisor can
//! persist with [`CheckpointStore::persist`](crate::CheckpointStore::persist)
//! whenever the run transitions or pauses.
//!
//! # Well-known keys
//!
//! | Key | Payload | Written by |
//! |---|---|---|
//! | `__gate:<stepKey>` | [`GateCheckpoint`] | gate controller on pause |
//! | `__gateTimeout:<stepKey>` | [`GateTimeoutCheckpoint`] | TIMEOUT gates |
//! | `__pipelineStats` | [`PipelineStats`] | executor context per record outcome |
//!
//! Consuming a gate entry (resume) removes it; the pipeline stats entry lives
//! for the whole run and seeds threshold evaluation after a restore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved key carrying the running success/error counts
pub const PIPELINE_STATS_KEY: &str = "__pipelineStats";

/// Checkpoint key for a paused gate step
pub fn gate_key(step_key: &str) -> String {
    format!("__gate:{step_key}")
}

/// Checkpoint key for a TIMEOUT gate's expiry entry
pub fn gate_timeout_key(step_key: &str) -> String {
    format!("__gateTimeout:{step_key}")
}

/// Running success/error counters consulted by threshold gates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub error_count: u64,
    pub success_count: u64,
}

impl PipelineStats {
    /// Total records observed so far
    pub fn total(&self) -> u64 {
        self.error_count + self.success_count
    }

    /// Error rate in percent; `None` when nothing has been processed
    pub fn error_rate_percent(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(self.error_count as f64 * 100.0 / total as f64)
    }
}

/// Payload persisted under `__gate:<stepKey>` when a gate pauses a run
///
/// `pending_records` is the **full** pending set; previews shown to operators
/// are truncated separately. `approval_type` is stored as its wire string so
/// the checkpoint crate stays decoupled from the engine's config types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateCheckpoint {
    pub step_key: String,
    pub approval_type: String,
    pub pending_record_count: usize,
    pub pending_records: Vec<serde_json::Value>,
    pub paused_at: DateTime<Utc>,
    /// Webhook notification intent recorded at pause time; delivery is a
    /// collaborator responsibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<String>,
}

/// Payload persisted under `__gateTimeout:<stepKey>`
///
/// An external sweeper may auto-approve once `expires_at` passes; without one
/// the gate degrades to manual approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateTimeoutCheckpoint {
    pub step_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Durable key-value snapshot owned by a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Run this checkpoint belongs to
    pub run_id: String,

    /// Keyed entries: engine keys under `__`, everything else is step data
    pub entries: BTreeMap<String, serde_json::Value>,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,

    /// Raised on mutation, lowered when persisted
    #[serde(skip)]
    dirty: bool,
}

impl RunCheckpoint {
    /// Create an empty checkpoint for a run
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            entries: BTreeMap::new(),
            updated_at: Utc::now(),
            dirty: false,
        }
    }

    /// Whether unpersisted mutations exist
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Raise the dirty bit without mutating entries (idempotent)
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Lower the dirty bit after a successful persist
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Read an entry
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Write an entry and mark the checkpoint dirty
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
        self.touch();
    }

    /// Remove and return an entry, marking the checkpoint dirty on hit
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Read a typed entry
    pub fn get_as<T: for<'de> Deserialize<'de>>(&self, key: &str) -> crate::Result<Option<T>> {
        match self.entries.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Write a typed entry
    pub fn insert_as<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> crate::Result<()> {
        self.insert(key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Current pipeline stats, defaulting to zeros when absent
    pub fn pipeline_stats(&self) -> crate::Result<PipelineStats> {
        Ok(self.get_as(PIPELINE_STATS_KEY)?.unwrap_or_default())
    }

    /// `true` when a `__pipelineStats` entry has been written
    pub fn has_pipeline_stats(&self) -> bool {
        self.entries.contains_key(PIPELINE_STATS_KEY)
    }

    /// Overwrite the pipeline stats entry
    pub fn set_pipeline_stats(&mut self, stats: PipelineStats) -> crate::Result<()> {
        self.insert_as(PIPELINE_STATS_KEY, &stats)
    }

    /// Persist a gate pause entry
    pub fn write_gate(&mut self, gate: &GateCheckpoint) -> crate::Result<()> {
        self.insert_as(gate_key(&gate.step_key), gate)
    }

    /// Read a gate pause entry without consuming it
    pub fn gate(&self, step_key: &str) -> crate::Result<Option<GateCheckpoint>> {
        self.get_as(&gate_key(step_key))
    }

    /// Consume a gate pause entry (resume/reject path)
    pub fn take_gate(&mut self, step_key: &str) -> crate::Result<Option<GateCheckpoint>> {
        match self.remove(&gate_key(step_key)) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Persist a TIMEOUT gate expiry entry
    pub fn write_gate_timeout(&mut self, timeout: &GateTimeoutCheckpoint) -> crate::Result<()> {
        self.insert_as(gate_timeout_key(&timeout.step_key), timeout)
    }

    /// Consume a TIMEOUT gate expiry entry
    pub fn take_gate_timeout(
        &mut self,
        step_key: &str,
    ) -> crate::Result<Option<GateTimeoutCheckpoint>> {
        match self.remove(&gate_timeout_key(step_key)) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Step keys that currently hold a gate pause entry
    pub fn paused_gates(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|key| key.strip_prefix("__gate:"))
            .map(str::to_string)
            .collect()
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.updated_at = Utc::now();
    }
}
