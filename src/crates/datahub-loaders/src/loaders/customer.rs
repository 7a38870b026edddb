//! Customer and customer-group loaders

use crate::catalog::{CatalogService, EntityKind};
use crate::error::Result;
use crate::framework::{EntityLoader, ExistingEntity, LoadOperation};
use crate::lookup::{LookupHelper, LookupSource};
use crate::validation::{ValidationBuilder, ValidationResult};
use async_trait::async_trait;
use datahub_core::Record;
use serde_json::Value;
use std::sync::Arc;

const CUSTOMER_OPERATIONS: [LoadOperation; 3] = [
    LoadOperation::Create,
    LoadOperation::Update,
    LoadOperation::Upsert,
];

/// Loads customers, keyed by email address
pub struct CustomerLoader {
    catalog: Arc<dyn CatalogService>,
    lookup: LookupHelper,
}

impl CustomerLoader {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        let lookup = LookupHelper::new(
            EntityKind::Customer,
            vec![
                LookupSource::Field("emailAddress".to_string()),
                LookupSource::Id,
            ],
        );
        Self { catalog, lookup }
    }
}

#[async_trait]
impl EntityLoader for CustomerLoader {
    fn entity_name(&self) -> &str {
        "customer"
    }

    fn supported_operations(&self) -> &[LoadOperation] {
        &CUSTOMER_OPERATIONS
    }

    fn validate(&self, record: &Record, operation: LoadOperation) -> ValidationResult {
        ValidationBuilder::new(record)
            .require_for_create("emailAddress", operation)
            .email("emailAddress")
            .require_for_create("lastName", operation)
            .address("address")
            .build()
    }

    fn duplicate_message(&self, record: &Record) -> String {
        let email = record
            .get("emailAddress")
            .and_then(Value::as_str)
            .unwrap_or("?");
        format!("customer with email '{email}' already exists")
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
            .create(EntityKind::Customer, record.clone())
            .await?;
        Ok(Some(id))
    }

    async fn update_entity(&self, id: &str, record: &Record) -> Result<()> {
        self.catalog
            .update(EntityKind::Customer, id, record.clone())
            .await
    }
}

const GROUP_OPERATIONS: [LoadOperation; 2] = [LoadOperation::Create, LoadOperation::Upsert];

/// Loads customer groups, keyed by name
pub struct CustomerGroupLoader {
    catalog: Arc<dyn CatalogService>,
    lookup: LookupHelper,
}

impl CustomerGroupLoader {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        let lookup = LookupHelper::new(
            EntityKind::CustomerGroup,
            vec![LookupSource::Field("name".to_string()), LookupSource::Id],
        );
        Self { catalog, lookup }
    }
}

#[async_trait]
impl EntityLoader for CustomerGroupLoader {
    fn entity_name(&self) -> &str {
        "customer group"
    }

    fn supported_operations(&self) -> &[LoadOperation] {
        &GROUP_OPERATIONS
    }

    fn validate(&self, record: &Record, operation: LoadOperation) -> ValidationResult {
        ValidationBuilder::new(record)
            .require_for_create("name", operation)
            .build()
    }

    fn duplicate_message(&self, record: &Record) -> String {
        let name = record.get("name").and_then(Value::as_str).unwrap_or("?");
        format!("customer group '{name}' already exists")
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
            .create(EntityKind::CustomerGroup, record.clone())
            .await?;
        Ok(Some(id))
    }

    async fn update_entity(&self, id: &str, record: &Record) -> Result<()> {
        self.catalog
            .update(EntityKind::CustomerGroup, id, record.clone())
            .await
    }
}
