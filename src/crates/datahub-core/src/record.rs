//! The in-flight data unit and its branched variants
//!
//! A [`Record`] is a heterogeneous field map - one row, one product, one
//! customer - flowing between steps as plain JSON values. Records are owned
//! by whoever holds them: the orchestrator keeps each step's output and hands
//! logical copies to successors, so a step can never observe another step's
//! mutations.
//!
//! ROUTE steps partition their input into a [`BranchOutput`]: a named map of
//! ordered record sequences. Successors whose inbound edge carries a `branch`
//! label receive only the matching sequence; unlabeled edges receive every
//! branch concatenated in name order (deterministic - the map is a
//! `BTreeMap`).

use serde_json::Value;
use std::collections::BTreeMap;

/// One in-flight datum: field name -> JSON value
pub type Record = serde_json::Map<String, Value>;

/// Result of a ROUTE step: branch name -> ordered records
pub type BranchOutput = BTreeMap<String, Vec<Record>>;

/// What a completed step handed to its successors
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// Ordinary record sequence
    Records(Vec<Record>),
    /// ROUTE partitioning
    Branches(BranchOutput),
}

impl StepOutput {
    /// Empty record output
    pub fn empty() -> Self {
        StepOutput::Records(Vec::new())
    }

    /// Total number of records across all branches
    pub fn len(&self) -> usize {
        match self {
            StepOutput::Records(records) => records.len(),
            StepOutput::Branches(branches) => branches.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records visible over an edge with the given branch label
    ///
    /// A labeled edge out of a ROUTE step selects one branch; a missing label
    /// selects everything. Branch labels on non-route outputs are ignored.
    pub fn records_for_branch(&self, branch: Option<&str>) -> Vec<Record> {
        match self {
            StepOutput::Records(records) => records.clone(),
            StepOutput::Branches(branches) => match branch {
                Some(name) => branches.get(name).cloned().unwrap_or_default(),
                None => branches.values().flatten().cloned().collect(),
            },
        }
    }

    /// Flatten into a single ordered sequence
    pub fn into_records(self) -> Vec<Record> {
        match self {
            StepOutput::Records(records) => records,
            StepOutput::Branches(branches) => branches.into_values().flatten().collect(),
        }
    }
}

/// Build a record from field/value pairs
pub fn record_from(fields: &[(&str, Value)]) -> Record {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Shallow-merge `patch` into `record`: top-level fields overwrite, nested
/// structures are replaced wholesale.
pub fn shallow_merge(record: &mut Record, patch: &Record) {
    for (key, value) in patch {
        record.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn branch_filtering() {
        let mut branches = BranchOutput::new();
        branches.insert("eu".to_string(), vec![record_from(&[("sku", json!("A"))])]);
        branches.insert(
            "us".to_string(),
            vec![
                record_from(&[("sku", json!("B"))]),
                record_from(&[("sku", json!("C"))]),
            ],
        );
        let output = StepOutput::Branches(branches);

        assert_eq!(output.len(), 3);
        assert_eq!(output.records_for_branch(Some("us")).len(), 2);
        assert_eq!(output.records_for_branch(Some("apac")).len(), 0);
        // Unlabeled edge sees every branch, name order.
        let all = output.records_for_branch(None);
        assert_eq!(all[0]["sku"], json!("A"));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn shallow_merge_replaces_top_level() {
        let mut record = record_from(&[("slug", json!("old")), ("price", json!(10))]);
        let patch = record_from(&[("slug", json!("fixed"))]);
        shallow_merge(&mut record, &patch);
        assert_eq!(record["slug"], json!("fixed"));
        assert_eq!(record["price"], json!(10));
    }
}
