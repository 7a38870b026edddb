//! The catalog backend interface and an in-memory test double
//!
//! The real e-commerce backend (products, customers, orders, collections,
//! facets, ...) is an external collaborator. Loaders reach it through
//! [`CatalogService`]: paged field queries, id lookups and the CRUD calls the
//! base loop needs. [`InMemoryCatalog`] backs tests and local development,
//! including failure injection for exercising the recoverable-error
//! classification.

use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use datahub_core::Record;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Entity collections of the catalog backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Product,
    ProductVariant,
    Customer,
    CustomerGroup,
    Order,
    Inventory,
    Collection,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::ProductVariant => "productVariant",
            EntityKind::Customer => "customer",
            EntityKind::CustomerGroup => "customerGroup",
            EntityKind::Order => "order",
            EntityKind::Inventory => "inventory",
            EntityKind::Collection => "collection",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored entity: backend id plus its field map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntity {
    pub id: String,
    pub fields: Record,
}

/// A page of a field query; `total_items` counts all matches, not just the
/// returned page
#[derive(Debug, Clone, Default)]
pub struct PagedList {
    pub items: Vec<CatalogEntity>,
    pub total_items: usize,
}

/// Backend catalog operations the loader framework depends on
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Paged equality query on one field
    async fn find_by_field(
        &self,
        kind: EntityKind,
        field: &str,
        value: &Value,
    ) -> Result<PagedList>;

    /// Fetch by backend id
    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<CatalogEntity>>;

    /// Full scan (predicate lookups); backends may cap this
    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>>;

    /// Insert a new entity, returning its id
    async fn create(&self, kind: EntityKind, fields: Record) -> Result<String>;

    /// Patch an existing entity (shallow field merge)
    async fn update(&self, kind: EntityKind, id: &str, fields: Record) -> Result<()>;

    /// Remove an entity
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;
}

/// Thread-safe in-memory catalog for tests and local development
#[derive(Default)]
pub struct InMemoryCatalog {
    entities: RwLock<HashMap<EntityKind, Vec<CatalogEntity>>>,
    /// Message for the next write call to fail with (failure injection)
    fail_next_write: Mutex<Option<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity directly, returning its id
    pub fn seed(&self, kind: EntityKind, fields: Record) -> String {
        let id = Uuid::new_v4().to_string();
        self.entities
            .write()
            .entry(kind)
            .or_default()
            .push(CatalogEntity {
                id: id.clone(),
                fields,
            });
        id
    }

    /// Make the next create/update/delete fail with the given message
    pub fn fail_next_write(&self, message: impl Into<String>) {
        *self.fail_next_write.lock() = Some(message.into());
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities
            .read()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Fetch a stored entity by id (test assertions)
    pub fn entity(&self, kind: EntityKind, id: &str) -> Option<CatalogEntity> {
        self.entities
            .read()
            .get(&kind)
            .and_then(|list| list.iter().find(|entity| entity.id == id).cloned())
    }

    fn take_injected_failure(&self) -> Option<String> {
        self.fail_next_write.lock().take()
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalog {
    async fn find_by_field(
        &self,
        kind: EntityKind,
        field: &str,
        value: &Value,
    ) -> Result<PagedList> {
        let guard = self.entities.read();
        let matches: Vec<CatalogEntity> = guard
            .get(&kind)
            .map(|list| {
                list.iter()
                    .filter(|entity| entity.fields.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(PagedList {
            total_items: matches.len(),
            items: matches,
        })
    }

    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<CatalogEntity>> {
        Ok(self.entity(kind, id))
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>> {
        Ok(self.entities.read().get(&kind).cloned().unwrap_or_default())
    }

    async fn create(&self, kind: EntityKind, fields: Record) -> Result<String> {
        if let Some(message) = self.take_injected_failure() {
            return Err(LoaderError::Backend(message));
        }
        Ok(self.seed(kind, fields))
    }

    async fn update(&self, kind: EntityKind, id: &str, fields: Record) -> Result<()> {
        if let Some(message) = self.take_injected_failure() {
            return Err(LoaderError::Backend(message));
        }
        let mut guard = self.entities.write();
        let entity = guard
            .get_mut(&kind)
            .and_then(|list| list.iter_mut().find(|entity| entity.id == id))
            .ok_or_else(|| LoaderError::NotFound(format!("{kind} {id}")))?;
        for (key, value) in fields {
            entity.fields.insert(key, value);
        }
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        if let Some(message) = self.take_injected_failure() {
            return Err(LoaderError::Backend(message));
        }
        let mut guard = self.entities.write();
        if let Some(list) = guard.get_mut(&kind) {
            list.retain(|entity| entity.id != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datahub_core::record_from;
    use serde_json::json;

    #[tokio::test]
    async fn field_queries_count_all_matches() {
        let catalog = InMemoryCatalog::new();
        catalog.seed(EntityKind::Product, record_from(&[("sku", json!("A1"))]));
        catalog.seed(EntityKind::Product, record_from(&[("sku", json!("A1"))]));
        catalog.seed(EntityKind::Product, record_from(&[("sku", json!("B1"))]));

        let page = catalog
            .find_by_field(EntityKind::Product, "sku", &json!("A1"))
            .await
            .unwrap();
        assert_eq!(page.total_items, 2);
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn update_merges_shallowly() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.seed(
            EntityKind::Product,
            record_from(&[("sku", json!("A1")), ("name", json!("Old"))]),
        );
        catalog
            .update(
                EntityKind::Product,
                &id,
                record_from(&[("name", json!("New"))]),
            )
            .await
            .unwrap();
        let entity = catalog.entity(EntityKind::Product, &id).unwrap();
        assert_eq!(entity.fields["name"], json!("New"));
        assert_eq!(entity.fields["sku"], json!("A1"));
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let catalog = InMemoryCatalog::new();
        catalog.fail_next_write("connection refused");
        let err = catalog
            .create(EntityKind::Customer, Record::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(catalog
            .create(EntityKind::Customer, Record::new())
            .await
            .is_ok());
    }
}
