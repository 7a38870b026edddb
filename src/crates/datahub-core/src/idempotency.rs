//! Run-scoped idempotency filtering applied immediately before LOAD
//!
//! When a definition declares `context.idempotency_key`, the orchestrator
//! fingerprints each record by that field's value and drops within-run
//! duplicates before they reach the loader. The filter preserves order and
//! is orthogonal to the loader's own duplicate detection against the
//! catalog: this one only protects a single run's batch from feeding the
//! same record twice.
//!
//! Records missing the key field pass through unfiltered - an absent
//! fingerprint is not a duplicate of another absent fingerprint.

use crate::context::ExecutorContext;
use crate::definition::PipelineDefinition;
use crate::record::Record;
use tracing::debug;

/// Drop records whose idempotency fingerprint was already seen this run.
///
/// Returns a possibly-shortened batch preserving input order. Without a
/// configured key this is the identity.
pub fn apply_idempotency(
    definition: &PipelineDefinition,
    records: Vec<Record>,
    cx: &ExecutorContext,
) -> Vec<Record> {
    let Some(key) = definition.context.idempotency_key.as_deref() else {
        return records;
    };

    let before = records.len();
    let filtered: Vec<Record> = records
        .into_iter()
        .filter(|record| match record.get(key) {
            Some(value) => {
                let fingerprint = format!("{key}={value}");
                cx.fingerprint_first_seen(&fingerprint)
            }
            None => true,
        })
        .collect();

    if filtered.len() != before {
        debug!(
            key,
            dropped = before - filtered.len(),
            "idempotency filter removed duplicate records"
        );
    }
    filtered
}
