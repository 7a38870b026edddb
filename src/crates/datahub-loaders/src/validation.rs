//! Fluent validation builder for loader pre-flight checks
//!
//! A [`ValidationBuilder`] accumulates field errors and warnings and produces
//! a single [`ValidationResult`]. Error codes are stable: `REQUIRED`,
//! `INVALID_FORMAT`, `INVALID_VALUE`. Validation failures are never
//! recoverable - a record that fails pre-flight counts as failed without
//! entering the quarantine's retry path.

use crate::framework::LoadOperation;
use datahub_core::Record;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Stable field error code
pub const CODE_REQUIRED: &str = "REQUIRED";
pub const CODE_INVALID_FORMAT: &str = "INVALID_FORMAT";
pub const CODE_INVALID_VALUE: &str = "INVALID_VALUE";

/// Sub-fields every address must carry
const ADDRESS_FIELDS: [&str; 4] = ["streetLine1", "city", "postalCode", "countryCode"];

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .expect("static pattern compiles")
    })
}

/// One field-level problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// Outcome of validating one record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<FieldIssue>,
    pub warnings: Vec<FieldIssue>,
}

impl ValidationResult {
    /// Collapse all errors into one human-readable line
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Fluent accumulator of field errors and warnings
pub struct ValidationBuilder<'a> {
    record: &'a Record,
    errors: Vec<FieldIssue>,
    warnings: Vec<FieldIssue>,
}

impl<'a> ValidationBuilder<'a> {
    pub fn new(record: &'a Record) -> Self {
        Self {
            record,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn present(&self, field: &str) -> bool {
        match self.record.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Field must be present and non-empty
    pub fn require(mut self, field: &str) -> Self {
        if !self.present(field) {
            self.errors.push(FieldIssue {
                field: field.to_string(),
                code: CODE_REQUIRED.to_string(),
                message: format!("missing required field {field}"),
            });
        }
        self
    }

    /// Field must be present when creating; updates may omit it
    pub fn require_for_create(self, field: &str, operation: LoadOperation) -> Self {
        if operation == LoadOperation::Update {
            return self;
        }
        self.require(field)
    }

    /// Field, when present, must look like an email address
    pub fn email(mut self, field: &str) -> Self {
        if let Some(Value::String(value)) = self.record.get(field) {
            if !email_pattern().is_match(value) {
                self.errors.push(FieldIssue {
                    field: field.to_string(),
                    code: CODE_INVALID_FORMAT.to_string(),
                    message: format!("field {field} is not a valid email address"),
                });
            }
        }
        self
    }

    /// Field, when present, must parse as a non-negative number
    pub fn non_negative_number(mut self, field: &str) -> Self {
        if let Some(value) = self.record.get(field) {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                Value::Null => return self,
                _ => None,
            };
            match number {
                Some(n) if n >= 0.0 => {}
                _ => self.errors.push(FieldIssue {
                    field: field.to_string(),
                    code: CODE_INVALID_VALUE.to_string(),
                    message: format!("field {field} must be a non-negative number"),
                }),
            }
        }
        self
    }

    /// Field, when present, must be one of the allowed values
    pub fn one_of(mut self, field: &str, allowed: &[&str]) -> Self {
        if let Some(Value::String(value)) = self.record.get(field) {
            if !allowed.contains(&value.as_str()) {
                self.errors.push(FieldIssue {
                    field: field.to_string(),
                    code: CODE_INVALID_VALUE.to_string(),
                    message: format!("field {field} must be one of {allowed:?}"),
                });
            }
        }
        self
    }

    /// Field, when present, must be an address object carrying
    /// `streetLine1`, `city`, `postalCode` and `countryCode`
    pub fn address(mut self, field: &str) -> Self {
        let Some(value) = self.record.get(field) else {
            return self;
        };
        let Some(address) = value.as_object() else {
            self.errors.push(FieldIssue {
                field: field.to_string(),
                code: CODE_INVALID_VALUE.to_string(),
                message: format!("field {field} must be an address object"),
            });
            return self;
        };
        for sub in ADDRESS_FIELDS {
            let present = matches!(address.get(sub), Some(Value::String(s)) if !s.trim().is_empty());
            if !present {
                self.errors.push(FieldIssue {
                    field: format!("{field}.{sub}"),
                    code: CODE_REQUIRED.to_string(),
                    message: format!("missing required field {field}.{sub}"),
                });
            }
        }
        self
    }

    /// Record a non-fatal warning
    pub fn warn(mut self, field: &str, message: impl Into<String>) -> Self {
        self.warnings.push(FieldIssue {
            field: field.to_string(),
            code: CODE_INVALID_VALUE.to_string(),
            message: message.into(),
        });
        self
    }

    pub fn build(self) -> ValidationResult {
        ValidationResult {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datahub_core::record_from;
    use serde_json::json;

    #[test]
    fn require_flags_missing_null_and_empty() {
        let record = record_from(&[("empty", json!("  ")), ("null", json!(null))]);
        let result = ValidationBuilder::new(&record)
            .require("missing")
            .require("empty")
            .require("null")
            .build();
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().all(|e| e.code == CODE_REQUIRED));
    }

    #[test]
    fn require_for_create_short_circuits_on_update() {
        let record = Record::new();
        let create = ValidationBuilder::new(&record)
            .require_for_create("sku", LoadOperation::Create)
            .build();
        assert!(!create.valid);

        let update = ValidationBuilder::new(&record)
            .require_for_create("sku", LoadOperation::Update)
            .build();
        assert!(update.valid);

        // Upsert may create, so the field stays required.
        let upsert = ValidationBuilder::new(&record)
            .require_for_create("sku", LoadOperation::Upsert)
            .build();
        assert!(!upsert.valid);
    }

    #[test]
    fn email_format() {
        let ok = record_from(&[("emailAddress", json!("jo.doe+test@shop.example.com"))]);
        assert!(ValidationBuilder::new(&ok).email("emailAddress").build().valid);

        for bad in ["not-an-email", "a@b", "a@b.c", "@shop.com", "a b@shop.com"] {
            let record = record_from(&[("emailAddress", json!(bad))]);
            let result = ValidationBuilder::new(&record).email("emailAddress").build();
            assert!(!result.valid, "{bad} should be invalid");
            assert_eq!(result.errors[0].code, CODE_INVALID_FORMAT);
        }
    }

    #[test]
    fn address_requires_the_four_subfields() {
        let record = record_from(&[(
            "address",
            json!({"streetLine1": "1 Main St", "city": "Springfield"}),
        )]);
        let result = ValidationBuilder::new(&record).address("address").build();
        assert!(!result.valid);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["address.postalCode", "address.countryCode"]);
    }

    #[test]
    fn numbers_accept_numeric_strings() {
        let record = record_from(&[("price", json!("10.5"))]);
        assert!(ValidationBuilder::new(&record)
            .non_negative_number("price")
            .build()
            .valid);

        let record = record_from(&[("price", json!("-3"))]);
        assert!(!ValidationBuilder::new(&record)
            .non_negative_number("price")
            .build()
            .valid);
    }

    #[test]
    fn warnings_do_not_invalidate() {
        let record = record_from(&[("slug", json!("Already-Exists"))]);
        let result = ValidationBuilder::new(&record)
            .warn("slug", "slug will be normalized to lowercase")
            .build();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
