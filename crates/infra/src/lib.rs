//! Infrastructure layer: catalog persistence, the variant matrix engine, config.

pub mod catalog_store;
pub mod config;
pub mod variant_matrix;


pub use catalog_store::{
    CatalogStore, CatalogStoreError, CatalogTx, InMemoryCatalogStore, PostgresCatalogStore,
};
pub use config::{DatabaseConfig, InfraConfig, MatrixConfig};
pub use variant_matrix::{CatalogError, CatalogResult, VariantMatrixEngine};
