//! Per-run mutable state shared between the orchestrator and strategies
//!
//! An [`ExecutorContext`] is owned by exactly one run. It carries the
//! checkpoint document (with its dirty bit), the running success/error stats
//! mirrored under `__pipelineStats`, the cancellation flag the orchestrator
//! probes between steps, and the short-lived fingerprint set backing the
//! idempotency filter.
//!
//! Concurrent access is confined by construction: step keys are unique so
//! checkpoint writes from parallel steps never collide, `mark_dirty` is
//! idempotent, and metric updates happen in the orchestrator's single awaiter.
//! A `parking_lot::Mutex` still guards the interior because parallel steps
//! may write scratch data simultaneously.

use datahub_checkpoint::{PipelineStats, RunCheckpoint};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cooperative cancellation flag
///
/// The supervisor holds one clone and raises it on `cancel_run`; the
/// orchestrator probes it before launching any step. In-flight steps always
/// run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (idempotent)
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run mutable state: checkpoint, stats, cancellation, idempotency
pub struct ExecutorContext {
    run_id: String,
    pipeline_id: String,
    checkpoint: Mutex<RunCheckpoint>,
    stats: Mutex<PipelineStats>,
    cancel: CancelFlag,
    seen_fingerprints: Mutex<HashSet<String>>,
}

impl ExecutorContext {
    /// Fresh context for a new run
    pub fn new(run_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            checkpoint: Mutex::new(RunCheckpoint::new(run_id.clone())),
            run_id,
            pipeline_id: pipeline_id.into(),
            stats: Mutex::new(PipelineStats::default()),
            cancel: CancelFlag::new(),
            seen_fingerprints: Mutex::new(HashSet::new()),
        }
    }

    /// Context restored from a persisted checkpoint (gate resume, forensics)
    pub fn from_checkpoint(pipeline_id: impl Into<String>, checkpoint: RunCheckpoint) -> Self {
        let stats = checkpoint.pipeline_stats().unwrap_or_default();
        Self {
            run_id: checkpoint.run_id.clone(),
            pipeline_id: pipeline_id.into(),
            checkpoint: Mutex::new(checkpoint),
            stats: Mutex::new(stats),
            cancel: CancelFlag::new(),
            seen_fingerprints: Mutex::new(HashSet::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Handle the supervisor keeps for cancellation
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Cooperative cancellation probe
    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    /// Run a closure against the checkpoint document
    pub fn with_checkpoint<R>(&self, f: impl FnOnce(&mut RunCheckpoint) -> R) -> R {
        f(&mut self.checkpoint.lock())
    }

    /// Write per-step scratch data (marks the checkpoint dirty)
    pub fn checkpoint_put(&self, key: impl Into<String>, value: Value) {
        self.checkpoint.lock().insert(key, value);
    }

    /// Read per-step scratch data
    pub fn checkpoint_get(&self, key: &str) -> Option<Value> {
        self.checkpoint.lock().get(key).cloned()
    }

    /// Raise the checkpoint dirty bit (idempotent)
    pub fn mark_checkpoint_dirty(&self) {
        self.checkpoint.lock().mark_dirty();
    }

    /// Snapshot the checkpoint for persistence
    pub fn checkpoint_snapshot(&self) -> RunCheckpoint {
        self.checkpoint.lock().clone()
    }

    /// Lower the dirty bit after the snapshot was persisted
    pub fn checkpoint_persisted(&self) {
        self.checkpoint.lock().clear_dirty();
    }

    /// Record one record-level outcome, mirroring the running stats into the
    /// checkpoint under `__pipelineStats` for threshold gates.
    pub fn record_outcome(&self, success: bool) {
        let stats = {
            let mut stats = self.stats.lock();
            if success {
                stats.success_count += 1;
            } else {
                stats.error_count += 1;
            }
            *stats
        };
        // Best effort: stats are plain numbers and always serialize.
        let _ = self.checkpoint.lock().set_pipeline_stats(stats);
    }

    /// Current success/error stats
    pub fn stats(&self) -> PipelineStats {
        *self.stats.lock()
    }

    /// Insert a fingerprint; returns `false` when it was already seen this
    /// run (the record is a within-batch duplicate).
    pub fn fingerprint_first_seen(&self, fingerprint: &str) -> bool {
        self.seen_fingerprints
            .lock()
            .insert(fingerprint.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cancel_flag_is_shared() {
        let cx = ExecutorContext::new("run-1", "pipeline-1");
        let handle = cx.cancel_flag();
        assert!(!cx.cancel_requested());
        handle.request();
        assert!(cx.cancel_requested());
    }

    #[test]
    fn record_outcome_mirrors_stats_into_checkpoint() {
        let cx = ExecutorContext::new("run-1", "pipeline-1");
        cx.record_outcome(true);
        cx.record_outcome(true);
        cx.record_outcome(false);

        let stats = cx.stats();
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 1);

        let snapshot = cx.checkpoint_snapshot();
        assert_eq!(snapshot.pipeline_stats().unwrap(), stats);
        assert!(snapshot.is_dirty());
    }

    #[test]
    fn restored_context_seeds_stats() {
        let mut checkpoint = RunCheckpoint::new("run-9");
        checkpoint
            .set_pipeline_stats(PipelineStats {
                error_count: 2,
                success_count: 98,
            })
            .unwrap();
        let cx = ExecutorContext::from_checkpoint("pipeline-1", checkpoint);
        assert_eq!(cx.run_id(), "run-9");
        assert_eq!(cx.stats().success_count, 98);
    }

    #[test]
    fn fingerprints_dedupe_within_run() {
        let cx = ExecutorContext::new("run-1", "pipeline-1");
        assert!(cx.fingerprint_first_seen("sku:A"));
        assert!(!cx.fingerprint_first_seen("sku:A"));
        assert!(cx.fingerprint_first_seen("sku:B"));
    }

    #[test]
    fn scratch_data_round_trip() {
        let cx = ExecutorContext::new("run-1", "pipeline-1");
        cx.checkpoint_put("extract", json!({"cursor": 3}));
        assert_eq!(cx.checkpoint_get("extract").unwrap()["cursor"], 3);
        assert!(cx.checkpoint_snapshot().is_dirty());
        cx.checkpoint_persisted();
        assert!(!cx.checkpoint_snapshot().is_dirty());
    }
}
