//! Catalog persistence boundary.
//!
//! The engine talks to storage only through [`CatalogStore`] and the unit of
//! work it hands out ([`CatalogTx`]). Two backends exist: an in-memory store
//! for tests/dev and a Postgres store for production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryCatalogStore, InMemoryCatalogTx};
pub use postgres::{PostgresCatalogStore, PostgresCatalogTx};
pub use r#trait::{CatalogStore, CatalogStoreError, CatalogTx};
