//! Inventory loader: stock levels keyed by SKU

use crate::catalog::{CatalogService, EntityKind};
use crate::error::Result;
use crate::framework::{EntityLoader, ExistingEntity, LoadOperation};
use crate::lookup::{LookupHelper, LookupSource};
use crate::validation::{ValidationBuilder, ValidationResult};
use async_trait::async_trait;
use datahub_core::Record;
use serde_json::Value;
use std::sync::Arc;

// Stock rows are upserted against existing variants; creating inventory for
// an unknown SKU is a data error, not a create.
const OPERATIONS: [LoadOperation; 2] = [LoadOperation::Update, LoadOperation::Upsert];

pub struct InventoryLoader {
    catalog: Arc<dyn CatalogService>,
    lookup: LookupHelper,
}

impl InventoryLoader {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        let lookup = LookupHelper::new(
            EntityKind::Inventory,
            vec![LookupSource::Field("sku".to_string())],
        );
        Self { catalog, lookup }
    }
}

#[async_trait]
impl EntityLoader for InventoryLoader {
    fn entity_name(&self) -> &str {
        "inventory"
    }

    fn supported_operations(&self) -> &[LoadOperation] {
        &OPERATIONS
    }

    fn validate(&self, record: &Record, _operation: LoadOperation) -> ValidationResult {
        ValidationBuilder::new(record)
            .require("sku")
            .require("stockOnHand")
            .non_negative_number("stockOnHand")
            .build()
    }

    fn duplicate_message(&self, record: &Record) -> String {
        let sku = record.get("sku").and_then(Value::as_str).unwrap_or("?");
        format!("inventory row for sku '{sku}' already exists")
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
        // UPSERT of an unseen SKU lands here; inventory rows are created so
        // a later variant sync can claim them.
        let id = self
            .catalog
            .create(EntityKind::Inventory, record.clone())
            .await?;
        Ok(Some(id))
    }

    async fn update_entity(&self, id: &str, record: &Record) -> Result<()> {
        self.catalog
            .update(EntityKind::Inventory, id, record.clone())
            .await
    }
}
