//! Product loader

use crate::catalog::{CatalogService, EntityKind};
use crate::error::Result;
use crate::framework::{EntityLoader, ExistingEntity, LoadOperation};
use crate::lookup::{LookupHelper, LookupSource};
use crate::validation::{ValidationBuilder, ValidationResult};
use async_trait::async_trait;
use datahub_core::Record;
use serde_json::Value;
use std::sync::Arc;

const OPERATIONS: [LoadOperation; 4] = [
    LoadOperation::Create,
    LoadOperation::Update,
    LoadOperation::Upsert,
    LoadOperation::Delete,
];

/// Loads products into the catalog, keyed by SKU or slug
pub struct ProductLoader {
    catalog: Arc<dyn CatalogService>,
    lookup: LookupHelper,
}

impl ProductLoader {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        let lookup = LookupHelper::new(
            EntityKind::Product,
            vec![
                LookupSource::Field("sku".to_string()),
                LookupSource::Field("slug".to_string()),
                LookupSource::Id,
            ],
        );
        Self { catalog, lookup }
    }

    fn slugify(name: &str) -> String {
        name.trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[async_trait]
impl EntityLoader for ProductLoader {
    fn entity_name(&self) -> &str {
        "product"
    }

    fn supported_operations(&self) -> &[LoadOperation] {
        &OPERATIONS
    }

    fn validate(&self, record: &Record, operation: LoadOperation) -> ValidationResult {
        ValidationBuilder::new(record)
            .require_for_create("name", operation)
            .require_for_create("sku", operation)
            .non_negative_number("price")
            .build()
    }

    fn duplicate_message(&self, record: &Record) -> String {
        let sku = record.get("sku").and_then(Value::as_str).unwrap_or("?");
        format!("product with sku '{sku}' already exists")
    }

    /// Derives a slug from the name when none was mapped upstream
    fn preprocess(&self, records: Vec<Record>) -> Vec<Record> {
        records
            .into_iter()
            .map(|mut record| {
                if !record.contains_key("slug") {
                    if let Some(name) = record.get("name").and_then(Value::as_str) {
                        record.insert("slug".to_string(), Value::String(Self::slugify(name)));
                    }
                }
                record
            })
            .collect()
    }

    async fn find_existing(
        &self,
        record: &Record,
        lookup_fields: &[String],
    ) -> Result<Option<ExistingEntity>> {
        Ok(self
            .lookup
            .resolve(self.catalog.as_ref(), record, lookup_fields)
            .await?
            .map(|entity| ExistingEntity { id: entity.id }))
    }

    async fn create_entity(&self, record: &Record) -> Result<Option<String>> {
        let id = self
            .catalog
            .create(EntityKind::Product, record.clone())
            .await?;
        Ok(Some(id))
    }

    async fn update_entity(&self, id: &str, record: &Record) -> Result<()> {
        self.catalog
            .update(EntityKind::Product, id, record.clone())
            .await
    }

    async fn delete_entity(&self, id: &str) -> Result<()> {
        self.catalog.delete(EntityKind::Product, id).await
    }
}
