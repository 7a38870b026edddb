//! The entity loader framework: one concrete loop, many loaders
//!
//! Every destination loader shares the same skeleton: preprocess the batch,
//! validate each record, resolve an existing entity through the lookup
//! helper, then create / update / skip according to the operation. The loop
//! is concrete - [`run_load`] - and parameterized by the small
//! [`EntityLoader`] interface.
//!
//! Per-record guarantees:
//!
//! - validation failures fail the record with its field errors and never
//!   reach the backend
//! - an existing entity under CREATE is a `DUPLICATE` conflict, or a skip
//!   when `skip_duplicates` is set
//! - a missing entity under UPDATE (or DELETE) is a skip, never an error
//! - `dry_run` suppresses all writes while producing accurate counts
//! - `update_only_fields` restricts which attributes are patched
//! - thrown backend errors fail only their record, classified recoverable
//!   by message ([`datahub_core::is_recoverable_message`])

use crate::error::{LoaderError, Result};
use crate::validation::{FieldIssue, ValidationResult};
use async_trait::async_trait;
use datahub_core::{LoadReport, Record, RecordFailure, RecordOutcomeFailure, StepConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Operations a loader can perform against the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadOperation {
    Create,
    Update,
    Upsert,
    Delete,
}

impl LoadOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadOperation::Create => "CREATE",
            LoadOperation::Update => "UPDATE",
            LoadOperation::Upsert => "UPSERT",
            LoadOperation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for LoadOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-declared options for one load
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadOptions {
    pub operation: LoadOperation,
    /// Skip records whose entity already exists instead of failing CREATE
    pub skip_duplicates: bool,
    /// Count and audit without writing
    pub dry_run: bool,
    /// Ordered fields the lookup helper may use
    pub lookup_fields: Vec<String>,
    /// Restrict which attributes UPDATE/UPSERT patches
    pub update_only_fields: Option<Vec<String>>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            operation: LoadOperation::Upsert,
            skip_duplicates: false,
            dry_run: false,
            lookup_fields: Vec::new(),
            update_only_fields: None,
        }
    }
}

impl LoadOptions {
    pub fn new(operation: LoadOperation) -> Self {
        Self {
            operation,
            ..Self::default()
        }
    }

    pub fn with_lookup_fields(mut self, fields: &[&str]) -> Self {
        self.lookup_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_skip_duplicates(mut self, skip: bool) -> Self {
        self.skip_duplicates = skip;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_update_only_fields(mut self, fields: &[&str]) -> Self {
        self.update_only_fields = Some(fields.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Parse options from a LOAD step's config; absent fields default
    pub fn from_step_config(config: &StepConfig) -> Result<Self> {
        if config.0.is_empty() {
            return Ok(Self::default());
        }
        let mut known = serde_json::Map::new();
        for key in [
            "operation",
            "skipDuplicates",
            "dryRun",
            "lookupFields",
            "updateOnlyFields",
        ] {
            if let Some(value) = config.get(key) {
                known.insert(key.to_string(), value.clone());
            }
        }
        serde_json::from_value(Value::Object(known))
            .map_err(|e| LoaderError::InvalidOptions(e.to_string()))
    }
}

/// An entity the lookup resolved
#[derive(Debug, Clone)]
pub struct ExistingEntity {
    pub id: String,
}

/// One record's fate in a load
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub record: Record,
    pub failure: RecordFailure,
    /// Field-level issues when validation failed
    pub field_errors: Vec<FieldIssue>,
}

/// Aggregate result of one load call
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Backend ids touched by this load
    pub affected_ids: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadOutcome {
    /// Convert into the engine's per-step load report
    pub fn into_report(self) -> LoadReport {
        LoadReport {
            ok: self.succeeded,
            fail: self.failed,
            failures: self
                .failures
                .into_iter()
                .map(|failure| RecordOutcomeFailure {
                    record: failure.record,
                    failure: failure.failure,
                })
                .collect(),
        }
    }
}

/// The small interface each destination loader implements; the loop itself
/// is [`run_load`]
#[async_trait]
pub trait EntityLoader: Send + Sync {
    /// Entity name used in messages ("product", "customer", ...)
    fn entity_name(&self) -> &str;

    /// Operations this loader supports
    fn supported_operations(&self) -> &[LoadOperation];

    /// Pre-flight validation of one record
    fn validate(&self, record: &Record, operation: LoadOperation) -> ValidationResult;

    /// Deterministic message for a CREATE duplicate conflict
    fn duplicate_message(&self, record: &Record) -> String;

    /// Normalize the batch before the loop (default: identity)
    fn preprocess(&self, records: Vec<Record>) -> Vec<Record> {
        records
    }

    /// Resolve an existing entity using the caller's lookup fields
    async fn find_existing(
        &self,
        record: &Record,
        lookup_fields: &[String],
    ) -> Result<Option<ExistingEntity>>;

    /// Insert a new entity, returning its backend id
    async fn create_entity(&self, record: &Record) -> Result<Option<String>>;

    /// Patch an existing entity
    async fn update_entity(&self, id: &str, record: &Record) -> Result<()>;

    /// Remove an existing entity; loaders that never delete keep the default
    async fn delete_entity(&self, id: &str) -> Result<()> {
        let _ = id;
        Err(LoaderError::UnsupportedOperation {
            entity: self.entity_name().to_string(),
            operation: LoadOperation::Delete.to_string(),
        })
    }
}

/// Restrict a patch to the declared update-only fields
fn restrict_patch(record: &Record, update_only_fields: &Option<Vec<String>>) -> Record {
    match update_only_fields {
        None => record.clone(),
        Some(fields) => record
            .iter()
            .filter(|(key, _)| fields.iter().any(|allowed| allowed == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    }
}

/// The shared destination loop: validate -> find existing -> create /
/// update / skip, with per-record error containment.
pub async fn run_load(
    loader: &dyn EntityLoader,
    records: Vec<Record>,
    options: &LoadOptions,
) -> Result<LoadOutcome> {
    if !loader.supported_operations().contains(&options.operation) {
        return Err(LoaderError::UnsupportedOperation {
            entity: loader.entity_name().to_string(),
            operation: options.operation.to_string(),
        });
    }

    let mut outcome = LoadOutcome::default();
    let records = loader.preprocess(records);
    debug!(
        entity = loader.entity_name(),
        operation = %options.operation,
        count = records.len(),
        dry_run = options.dry_run,
        "load starting"
    );

    for record in records {
        let validation = loader.validate(&record, options.operation);
        if !validation.valid {
            outcome.failed += 1;
            outcome.failures.push(LoadFailure {
                failure: RecordFailure {
                    message: validation.summary(),
                    code: validation.errors.first().map(|issue| issue.code.clone()),
                    recoverable: false,
                },
                field_errors: validation.errors,
                record,
            });
            continue;
        }

        match process_record(loader, record, options, &mut outcome).await {
            Ok(()) => {}
            Err((record, error)) => {
                let message = error.to_string();
                warn!(entity = loader.entity_name(), %message, "record failed");
                outcome.failed += 1;
                outcome.failures.push(LoadFailure {
                    failure: RecordFailure::classify(message, None),
                    field_errors: Vec::new(),
                    record,
                });
            }
        }
    }

    debug!(
        entity = loader.entity_name(),
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        skipped = outcome.skipped,
        "load complete"
    );
    Ok(outcome)
}

/// Handle one validated record; a returned error fails only this record
async fn process_record(
    loader: &dyn EntityLoader,
    record: Record,
    options: &LoadOptions,
    outcome: &mut LoadOutcome,
) -> std::result::Result<(), (Record, LoaderError)> {
    let existing = match loader.find_existing(&record, &options.lookup_fields).await {
        Ok(existing) => existing,
        Err(error) => return Err((record, error)),
    };

    match (existing, options.operation) {
        (Some(_), LoadOperation::Create) => {
            if options.skip_duplicates {
                outcome.skipped += 1;
                return Ok(());
            }
            let message = loader.duplicate_message(&record);
            outcome.failed += 1;
            outcome.failures.push(LoadFailure {
                failure: RecordFailure::duplicate(message),
                field_errors: Vec::new(),
                record,
            });
            Ok(())
        }
        (Some(entity), LoadOperation::Delete) => {
            if !options.dry_run {
                if let Err(error) = loader.delete_entity(&entity.id).await {
                    return Err((record, error));
                }
            }
            outcome.deleted += 1;
            outcome.affected_ids.push(entity.id);
            outcome.succeeded += 1;
            Ok(())
        }
        (Some(entity), _) => {
            if !options.dry_run {
                let patch = restrict_patch(&record, &options.update_only_fields);
                if let Err(error) = loader.update_entity(&entity.id, &patch).await {
                    return Err((record, error));
                }
            }
            outcome.updated += 1;
            outcome.affected_ids.push(entity.id);
            outcome.succeeded += 1;
            Ok(())
        }
        (None, LoadOperation::Update) | (None, LoadOperation::Delete) => {
            outcome.skipped += 1;
            Ok(())
        }
        (None, _) => {
            if options.dry_run {
                outcome.created += 1;
                outcome.succeeded += 1;
                return Ok(());
            }
            match loader.create_entity(&record).await {
                Ok(Some(id)) => {
                    outcome.created += 1;
                    outcome.affected_ids.push(id);
                    outcome.succeeded += 1;
                    Ok(())
                }
                Ok(None) => {
                    outcome.failed += 1;
                    outcome.failures.push(LoadFailure {
                        failure: RecordFailure::classify(
                            format!("{} creation returned no id", loader.entity_name()),
                            None,
                        ),
                        field_errors: Vec::new(),
                        record,
                    });
                    Ok(())
                }
                Err(error) => Err((record, error)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datahub_core::record_from;
    use serde_json::json;

    #[test]
    fn options_parse_from_step_config() {
        let config = StepConfig::new()
            .with("adapterCode", json!("productUpsert"))
            .with("operation", json!("CREATE"))
            .with("skipDuplicates", json!(true))
            .with("lookupFields", json!(["sku"]));
        let options = LoadOptions::from_step_config(&config).unwrap();
        assert_eq!(options.operation, LoadOperation::Create);
        assert!(options.skip_duplicates);
        assert_eq!(options.lookup_fields, vec!["sku".to_string()]);
        assert!(!options.dry_run);
    }

    #[test]
    fn malformed_options_are_rejected() {
        let config = StepConfig::new().with("operation", json!("MERGE"));
        assert!(LoadOptions::from_step_config(&config).is_err());
    }

    #[test]
    fn restrict_patch_filters_fields() {
        let record = record_from(&[
            ("sku", json!("A1")),
            ("name", json!("A")),
            ("price", json!(10)),
        ]);
        let patch = restrict_patch(&record, &Some(vec!["price".to_string()]));
        assert_eq!(patch.len(), 1);
        assert_eq!(patch["price"], json!(10));

        let full = restrict_patch(&record, &None);
        assert_eq!(full.len(), 3);
    }
}
