use std::sync::Arc;

use thiserror::Error;

use bazaar_catalog::{
    Assignment, Attribute, AttributeOption, ProductMatrix, VariantWithAssignments,
};
use bazaar_core::{AttributeId, OptionId, ProductId, VariantId};

/// Catalog store operation error.
///
/// These are **infrastructure errors** (constraints, connectivity, misuse of a
/// unit of work) as opposed to domain errors (validation, invariants). They are
/// propagated unchanged by the engine.
#[derive(Debug, Clone, Error)]
pub enum CatalogStoreError {
    /// A unique or check constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A write referenced a row that does not exist.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// A write was attempted without holding the lock of the product it touches.
    #[error("product not locked: {0}")]
    NotLocked(String),
}

/// Entry point to catalog persistence.
///
/// Reads on the store itself see committed state only and take no lock.
/// Every mutation goes through a [`CatalogTx`] obtained from [`CatalogStore::begin`].
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    type Tx: CatalogTx;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Self::Tx, CatalogStoreError>;

    /// Committed snapshot of a product, `None` if the product is unknown.
    async fn load_matrix(
        &self,
        product_id: ProductId,
    ) -> Result<Option<ProductMatrix>, CatalogStoreError>;

    /// Committed variant with its assignments, `None` if unknown.
    async fn find_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<VariantWithAssignments>, CatalogStoreError>;
}

/// One atomic unit of work over the catalog.
///
/// A unit of work serializes against other writers of the same product through
/// [`CatalogTx::lock_product`]; every write must target the locked product.
/// Dropping a unit of work without calling [`CatalogTx::commit`] rolls it back.
#[async_trait::async_trait]
pub trait CatalogTx: Send {
    /// Take the exclusive per-product lock for the rest of the unit of work.
    ///
    /// Returns `false` (and takes no lock) when the product does not exist.
    async fn lock_product(&mut self, product_id: ProductId) -> Result<bool, CatalogStoreError>;

    /// Product owning `attribute_id`.
    async fn attribute_product(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<Option<ProductId>, CatalogStoreError>;

    /// Attribute and product owning `option_id`.
    async fn option_owner(
        &mut self,
        option_id: OptionId,
    ) -> Result<Option<(AttributeId, ProductId)>, CatalogStoreError>;

    /// Product owning `variant_id`.
    async fn variant_product(
        &mut self,
        variant_id: VariantId,
    ) -> Result<Option<ProductId>, CatalogStoreError>;

    /// Snapshot of the locked product as seen by this unit of work.
    async fn load_matrix(&mut self, product_id: ProductId) -> Result<ProductMatrix, CatalogStoreError>;

    async fn insert_attribute(
        &mut self,
        product_id: ProductId,
        label: &str,
    ) -> Result<Attribute, CatalogStoreError>;

    async fn rename_attribute(
        &mut self,
        attribute_id: AttributeId,
        label: &str,
    ) -> Result<(), CatalogStoreError>;

    async fn insert_option(
        &mut self,
        attribute_id: AttributeId,
        value: &str,
    ) -> Result<AttributeOption, CatalogStoreError>;

    async fn rename_option(&mut self, option_id: OptionId, value: &str) -> Result<(), CatalogStoreError>;

    /// Insert a variant with no assignments.
    async fn insert_variant(
        &mut self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<VariantId, CatalogStoreError>;

    async fn set_variant_quantity(
        &mut self,
        variant_id: VariantId,
        quantity: i64,
    ) -> Result<(), CatalogStoreError>;

    /// Insert assignment rows; `(variant, attribute)` must be unique.
    async fn insert_assignments(&mut self, rows: &[Assignment]) -> Result<(), CatalogStoreError>;

    /// Returns the number of rows deleted.
    async fn delete_assignments_by_attribute(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<u64, CatalogStoreError>;

    /// Returns the variants whose assignment was deleted, ascending.
    async fn delete_assignments_by_option(
        &mut self,
        option_id: OptionId,
    ) -> Result<Vec<VariantId>, CatalogStoreError>;

    async fn delete_options_by_attribute(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<u64, CatalogStoreError>;

    async fn delete_option(&mut self, option_id: OptionId) -> Result<(), CatalogStoreError>;

    async fn delete_attribute(&mut self, attribute_id: AttributeId) -> Result<(), CatalogStoreError>;

    /// Delete variants together with their assignments.
    async fn delete_variants(&mut self, variant_ids: &[VariantId]) -> Result<u64, CatalogStoreError>;

    /// Bump the product's `updated_at`.
    async fn touch_product(&mut self, product_id: ProductId) -> Result<(), CatalogStoreError>;

    async fn commit(self) -> Result<(), CatalogStoreError>;

    async fn rollback(self) -> Result<(), CatalogStoreError>;
}

#[async_trait::async_trait]
impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, CatalogStoreError> {
        (**self).begin().await
    }

    async fn load_matrix(
        &self,
        product_id: ProductId,
    ) -> Result<Option<ProductMatrix>, CatalogStoreError> {
        (**self).load_matrix(product_id).await
    }

    async fn find_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<VariantWithAssignments>, CatalogStoreError> {
        (**self).find_variant(variant_id).await
    }
}
