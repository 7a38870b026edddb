//! Record-error quarantine with audited retries
//!
//! Per-record failures reported by strategies land here as [`RecordError`]s.
//! Non-recoverable errors become dead letters immediately; recoverable ones
//! wait for a retry. Every retry shallow-merges a JSON patch into the stored
//! payload and appends an [`ErrorAudit`] carrying the previous payload, the
//! patch and the result - the audit trail is append-only provenance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datahub_core::{NewRecordError, RecordErrorSink};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Retry provenance, appended on each retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAudit {
    pub audit_id: String,
    pub error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub previous_payload: Value,
    pub patch: Value,
    pub resulting_payload: Value,
}

/// One quarantined record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub id: String,
    pub run_id: String,
    pub step_key: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub recoverable: bool,
    pub payload: Value,
    pub dead_letter: bool,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub audits: Vec<ErrorAudit>,
}

/// In-memory quarantine store; doubles as the engine's error sink
#[derive(Default)]
pub struct QuarantineStore {
    errors: RwLock<HashMap<String, RecordError>>,
}

impl QuarantineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh error; non-recoverable errors dead-letter immediately
    pub fn insert(&self, new: NewRecordError) -> String {
        let id = Uuid::new_v4().to_string();
        let error = RecordError {
            id: id.clone(),
            run_id: new.run_id,
            step_key: new.step_key,
            message: new.message,
            code: new.code,
            dead_letter: !new.recoverable,
            recoverable: new.recoverable,
            payload: new.payload,
            resolved: false,
            created_at: Utc::now(),
            audits: Vec::new(),
        };
        self.errors.write().insert(id.clone(), error);
        id
    }

    pub fn get(&self, error_id: &str) -> Option<RecordError> {
        self.errors.read().get(error_id).cloned()
    }

    pub fn list_for_run(&self, run_id: &str) -> Vec<RecordError> {
        let mut errors: Vec<RecordError> = self
            .errors
            .read()
            .values()
            .filter(|error| error.run_id == run_id)
            .cloned()
            .collect();
        errors.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        errors
    }

    pub fn list_dead_letters(&self) -> Vec<RecordError> {
        self.errors
            .read()
            .values()
            .filter(|error| error.dead_letter && !error.resolved)
            .cloned()
            .collect()
    }

    /// Flip the dead-letter flag; returns the updated error
    pub fn set_dead_letter(&self, error_id: &str, dead_letter: bool) -> Option<RecordError> {
        let mut guard = self.errors.write();
        let error = guard.get_mut(error_id)?;
        error.dead_letter = dead_letter;
        Some(error.clone())
    }

    /// Record one retry attempt: shallow-merge the patch, append the audit,
    /// update classification from the attempt's outcome.
    ///
    /// `outcome_failure` is `None` when the retry succeeded (the error is
    /// marked resolved) and the fresh failure otherwise.
    pub fn record_retry(
        &self,
        error_id: &str,
        patch: &Value,
        user_id: Option<String>,
        resulting_payload: Value,
        outcome_failure: Option<datahub_core::RecordFailure>,
    ) -> Option<RecordError> {
        let mut guard = self.errors.write();
        let error = guard.get_mut(error_id)?;

        error.audits.push(ErrorAudit {
            audit_id: Uuid::new_v4().to_string(),
            error_id: error.id.clone(),
            user_id,
            created_at: Utc::now(),
            previous_payload: error.payload.clone(),
            patch: patch.clone(),
            resulting_payload: resulting_payload.clone(),
        });
        error.payload = resulting_payload;

        match outcome_failure {
            None => {
                error.resolved = true;
                error.dead_letter = false;
            }
            Some(failure) => {
                error.message = failure.message;
                error.code = failure.code;
                error.recoverable = failure.recoverable;
                error.dead_letter = !error.recoverable;
            }
        }
        Some(error.clone())
    }

    pub fn len(&self) -> usize {
        self.errors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.read().is_empty()
    }
}

#[async_trait]
impl RecordErrorSink for QuarantineStore {
    async fn report(&self, error: NewRecordError) {
        self.insert(error);
    }
}
