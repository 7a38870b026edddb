//! Pluggable lookup strategies for resolving existing entities
//!
//! A loader declares how its entities can be found (by natural key fields,
//! by backend id, by custom predicate); the **caller** declares which of
//! those to use per load via `lookup_fields`. The helper tries strategies in
//! declared order and returns the first match:
//!
//! - a field strategy queries the catalog and wins on `total_items > 0`
//! - a null/absent value in the record skips the strategy
//! - a field missing from `lookup_fields` skips the strategy even if the
//!   record carries a value

use crate::catalog::{CatalogEntity, CatalogService, EntityKind};
use crate::error::Result;
use datahub_core::Record;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Predicate matching a candidate entity against the record's field value
pub type LookupPredicate = Arc<dyn Fn(&CatalogEntity, &Value) -> bool + Send + Sync>;

/// One way of resolving an existing entity
#[derive(Clone)]
pub enum LookupSource {
    /// Equality query on a natural key field (`sku`, `emailAddress`, ...)
    Field(String),
    /// Direct id lookup; keyed by the record's `id` field
    Id,
    /// Scan with a custom predicate, keyed by a record field
    Predicate { field: String, matcher: LookupPredicate },
}

impl LookupSource {
    /// The record field this strategy keys on
    pub fn field_name(&self) -> &str {
        match self {
            LookupSource::Field(name) => name,
            LookupSource::Id => "id",
            LookupSource::Predicate { field, .. } => field,
        }
    }
}

/// Ordered lookup strategies for one entity kind
pub struct LookupHelper {
    kind: EntityKind,
    sources: Vec<LookupSource>,
}

impl LookupHelper {
    pub fn new(kind: EntityKind, sources: Vec<LookupSource>) -> Self {
        Self { kind, sources }
    }

    /// Try each declared strategy in order; first match wins.
    pub async fn resolve(
        &self,
        catalog: &dyn CatalogService,
        record: &Record,
        lookup_fields: &[String],
    ) -> Result<Option<CatalogEntity>> {
        for source in &self.sources {
            let field = source.field_name();
            if !lookup_fields.iter().any(|candidate| candidate == field) {
                continue;
            }
            let Some(value) = record.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            let found = match source {
                LookupSource::Field(name) => {
                    let page = catalog.find_by_field(self.kind, name, value).await?;
                    if page.total_items > 0 {
                        page.items.into_iter().next()
                    } else {
                        None
                    }
                }
                LookupSource::Id => match value.as_str() {
                    Some(id) => catalog.get_by_id(self.kind, id).await?,
                    None => None,
                },
                LookupSource::Predicate { matcher, .. } => catalog
                    .list(self.kind)
                    .await?
                    .into_iter()
                    .find(|entity| matcher(entity, value)),
            };

            if let Some(entity) = found {
                debug!(kind = %self.kind, field, "lookup resolved existing entity");
                return Ok(Some(entity));
            }
        }
        Ok(None)
    }
}
