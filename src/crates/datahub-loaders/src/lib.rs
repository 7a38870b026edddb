//! # datahub-loaders - Entity Loader Framework
//!
//! Destination loaders standardize CREATE / UPDATE / UPSERT / DELETE against
//! the e-commerce catalog backend. The loop is implemented **once**
//! ([`run_load`]) and parameterized by the small [`EntityLoader`] interface;
//! concrete loaders only contribute validation rules, natural keys and
//! messages.
//!
//! ## Pieces
//!
//! - [`framework`] - the base loop, [`LoadOptions`] (operation, dry run,
//!   duplicate handling, lookup fields, update-only fields) and
//!   [`LoadOutcome`]
//! - [`validation`] - the fluent [`ValidationBuilder`] with stable
//!   `REQUIRED` / `INVALID_FORMAT` / `INVALID_VALUE` codes
//! - [`lookup`] - ordered lookup strategies (field query, id, predicate)
//! - [`catalog`] - the [`CatalogService`] backend seam plus
//!   [`InMemoryCatalog`] for tests
//! - [`loaders`] - product, customer, customer group and inventory loaders
//!
//! ## Wiring a LOAD step
//!
//! ```rust,ignore
//! use datahub_loaders::{run_load, LoadOptions, ProductLoader};
//!
//! let options = LoadOptions::from_step_config(&step.config)?;
//! let outcome = run_load(&loader, records, &options).await?;
//! let report = outcome.into_report(); // feeds the LOAD strategy
//! ```

pub mod catalog;
pub mod error;
pub mod framework;
pub mod loaders;
pub mod lookup;
pub mod validation;

pub use catalog::{CatalogEntity, CatalogService, EntityKind, InMemoryCatalog, PagedList};
pub use error::{LoaderError, Result};
pub use framework::{
    run_load, EntityLoader, ExistingEntity, LoadFailure, LoadOperation, LoadOptions, LoadOutcome,
};
pub use loaders::{CustomerGroupLoader, CustomerLoader, InventoryLoader, ProductLoader};
pub use lookup::{LookupHelper, LookupPredicate, LookupSource};
pub use validation::{
    FieldIssue, ValidationBuilder, ValidationResult, CODE_INVALID_FORMAT, CODE_INVALID_VALUE,
    CODE_REQUIRED,
};
