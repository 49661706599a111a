//! Variant matrix engine (application-level orchestration).
//!
//! Every mutating operation runs the same pipeline inside one unit of work:
//!
//! ```text
//! resolve owning product
//!   ↓
//! lock product (exclusive, until commit/rollback)
//!   ↓
//! load ProductMatrix snapshot
//!   ↓
//! plan the delta (pure, bazaar-catalog)
//!   ↓
//! write delta, bump product updated_at
//!   ↓
//! optionally re-check invariants, then commit
//! ```
//!
//! Any error rolls the whole unit of work back, so callers observe either the
//! full effect of an operation or none of it. Reads take no lock and see only
//! committed state.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use bazaar_catalog::{
    plan_deduplication, plan_option_insertion, plan_option_removal, plan_seed, AttributeWithOptions,
    InsertionPlan, OptionRemoval, VariantWithAssignments,
};
use bazaar_core::{AttributeId, DomainError, OptionId, ProductId, VariantId};

use crate::catalog_store::{CatalogStore, CatalogStoreError, CatalogTx};
use crate::config::MatrixConfig;

/// Error returned by [`VariantMatrixEngine`] operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] CatalogStoreError),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::Domain(e) if e.is_not_found())
    }

    /// The domain error, if this is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            CatalogError::Domain(e) => Some(e),
            CatalogError::Store(_) => None,
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Keeps each product's variants consistent with its attributes and options.
///
/// Generic over the store so the same engine runs against Postgres in
/// production and [`crate::catalog_store::InMemoryCatalogStore`] in tests.
#[derive(Debug, Clone)]
pub struct VariantMatrixEngine<S> {
    store: S,
    config: MatrixConfig,
}

impl<S> VariantMatrixEngine<S>
where
    S: CatalogStore,
{
    pub fn new(store: S, config: MatrixConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> MatrixConfig {
        self.config
    }

    /// Create an attribute with no options. No variant is affected.
    #[instrument(skip(self, label), fields(product_id = product_id.get()), err)]
    pub async fn create_attribute(&self, product_id: ProductId, label: &str) -> CatalogResult<AttributeId> {
        let label = required("label", label)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            lock_known_product(&mut tx, product_id).await?;
            let attribute = tx.insert_attribute(product_id, label).await?;
            tx.touch_product(product_id).await?;
            Ok::<_, CatalogError>(attribute.id)
        }
        .await;
        finish(tx, result).await
    }

    /// Create an attribute and add each of `values` as an option, in order,
    /// within the same unit of work.
    #[instrument(skip(self, label, values), fields(product_id = product_id.get(), option_count = values.len()), err)]
    pub async fn create_attribute_with_options(
        &self,
        product_id: ProductId,
        label: &str,
        values: &[&str],
    ) -> CatalogResult<(AttributeId, Vec<OptionId>)> {
        let label = required("label", label)?;
        let values = values
            .iter()
            .map(|v| required("value", v))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.store.begin().await?;
        let result = async {
            lock_known_product(&mut tx, product_id).await?;
            let attribute = tx.insert_attribute(product_id, label).await?;
            let mut option_ids = Vec::with_capacity(values.len());
            for value in values {
                let option = tx.insert_option(attribute.id, value).await?;
                self.place_option(&mut tx, product_id, attribute.id, option.id)
                    .await?;
                option_ids.push(option.id);
            }
            self.seal(&mut tx, product_id).await?;
            Ok::<_, CatalogError>((attribute.id, option_ids))
        }
        .await;
        finish(tx, result).await
    }

    /// Add an option to an attribute, backfilling or proliferating variants.
    #[instrument(skip(self, value), fields(attribute_id = attribute_id.get()), err)]
    pub async fn add_option(&self, attribute_id: AttributeId, value: &str) -> CatalogResult<OptionId> {
        let value = required("value", value)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let product_id = lock_attribute_product(&mut tx, attribute_id).await?;
            let option = tx.insert_option(attribute_id, value).await?;
            self.place_option(&mut tx, product_id, attribute_id, option.id)
                .await?;
            self.seal(&mut tx, product_id).await?;
            Ok::<_, CatalogError>(option.id)
        }
        .await;
        finish(tx, result).await
    }

    /// Delete an attribute with its options and assignments, then collapse
    /// variants that became identical.
    #[instrument(skip(self), fields(attribute_id = attribute_id.get()), err)]
    pub async fn delete_attribute(&self, attribute_id: AttributeId) -> CatalogResult<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let product_id = lock_attribute_product(&mut tx, attribute_id).await?;

            let unassigned = tx.delete_assignments_by_attribute(attribute_id).await?;
            let options = tx.delete_options_by_attribute(attribute_id).await?;
            tx.delete_attribute(attribute_id).await?;
            debug!(unassigned, options, "attribute rows removed");

            self.deduplicate(&mut tx, product_id).await?;
            self.seal(&mut tx, product_id).await
        }
        .await;
        finish(tx, result).await
    }

    /// Delete an option.
    ///
    /// If the attribute keeps other options, variants that used this one are
    /// deleted. If it was the last option the variants survive and the
    /// dimension collapses in place (deduplicated when
    /// [`MatrixConfig::dedupe_on_option_collapse`] is set).
    #[instrument(skip(self), fields(option_id = option_id.get()), err)]
    pub async fn delete_option(&self, option_id: OptionId) -> CatalogResult<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let (_, product_id) = lock_option_owner(&mut tx, option_id).await?;

            let matrix = tx.load_matrix(product_id).await?;
            let removal = plan_option_removal(&matrix, option_id)?;

            let affected = tx.delete_assignments_by_option(option_id).await?;
            match removal {
                OptionRemoval::DropVariants => {
                    let deleted = tx.delete_variants(&affected).await?;
                    info!(deleted, "variants using the option deleted");
                }
                OptionRemoval::Collapse => {
                    info!(variants = affected.len(), "last option removed, dimension collapsed");
                }
            }
            tx.delete_option(option_id).await?;

            if removal == OptionRemoval::Collapse && self.config.dedupe_on_option_collapse {
                self.deduplicate(&mut tx, product_id).await?;
            }
            self.seal(&mut tx, product_id).await
        }
        .await;
        finish(tx, result).await
    }

    /// Give a product with no variants one variant per combination of its
    /// options, each stocked with `quantity`.
    #[instrument(skip(self), fields(product_id = product_id.get()), err)]
    pub async fn seed_variants(&self, product_id: ProductId, quantity: i64) -> CatalogResult<Vec<VariantId>> {
        non_negative(quantity)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            lock_known_product(&mut tx, product_id).await?;
            let matrix = tx.load_matrix(product_id).await?;
            let combinations = plan_seed(&matrix)?;

            let mut created = Vec::with_capacity(combinations.len());
            for combination in &combinations {
                let variant_id = tx.insert_variant(product_id, quantity).await?;
                tx.insert_assignments(&combination.assignments_for(variant_id))
                    .await?;
                created.push(variant_id);
            }
            info!(created = created.len(), "variants seeded");

            self.seal(&mut tx, product_id).await?;
            Ok::<_, CatalogError>(created)
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self, label), fields(attribute_id = attribute_id.get()), err)]
    pub async fn rename_attribute(&self, attribute_id: AttributeId, label: &str) -> CatalogResult<()> {
        let label = required("label", label)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let product_id = lock_attribute_product(&mut tx, attribute_id).await?;
            tx.rename_attribute(attribute_id, label).await?;
            tx.touch_product(product_id).await?;
            Ok::<_, CatalogError>(())
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self, value), fields(option_id = option_id.get()), err)]
    pub async fn rename_option(&self, option_id: OptionId, value: &str) -> CatalogResult<()> {
        let value = required("value", value)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let (_, product_id) = lock_option_owner(&mut tx, option_id).await?;
            tx.rename_option(option_id, value).await?;
            tx.touch_product(product_id).await?;
            Ok::<_, CatalogError>(())
        }
        .await;
        finish(tx, result).await
    }

    /// Set a variant's stock. Assignments are never touched.
    #[instrument(skip(self), fields(variant_id = variant_id.get()), err)]
    pub async fn set_variant_quantity(&self, variant_id: VariantId, quantity: i64) -> CatalogResult<()> {
        non_negative(quantity)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let product_id = tx
                .variant_product(variant_id)
                .await?
                .ok_or_else(|| DomainError::not_found(variant_id))?;
            lock_known_product(&mut tx, product_id).await?;
            if tx.variant_product(variant_id).await? != Some(product_id) {
                return Err(DomainError::not_found(variant_id).into());
            }
            tx.set_variant_quantity(variant_id, quantity).await?;
            tx.touch_product(product_id).await?;
            Ok::<_, CatalogError>(())
        }
        .await;
        finish(tx, result).await
    }

    /// Live variants of a product ordered by id, each with its assignments
    /// ordered by attribute id.
    #[instrument(skip(self), fields(product_id = product_id.get()), err)]
    pub async fn list_variants(&self, product_id: ProductId) -> CatalogResult<Vec<VariantWithAssignments>> {
        let matrix = self
            .store
            .load_matrix(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(product_id))?;
        Ok(matrix.into_variant_listing())
    }

    /// Attributes of a product ordered by id, options ordered by id.
    #[instrument(skip(self), fields(product_id = product_id.get()), err)]
    pub async fn list_attributes(&self, product_id: ProductId) -> CatalogResult<Vec<AttributeWithOptions>> {
        let matrix = self
            .store
            .load_matrix(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(product_id))?;
        Ok(matrix.attributes)
    }

    #[instrument(skip(self), fields(variant_id = variant_id.get()), err)]
    pub async fn get_variant(&self, variant_id: VariantId) -> CatalogResult<VariantWithAssignments> {
        self.store
            .find_variant(variant_id)
            .await?
            .ok_or_else(|| DomainError::not_found(variant_id).into())
    }

    /// Write the rows for a freshly inserted option.
    async fn place_option(
        &self,
        tx: &mut S::Tx,
        product_id: ProductId,
        attribute_id: AttributeId,
        option_id: OptionId,
    ) -> CatalogResult<()> {
        let matrix = tx.load_matrix(product_id).await?;

        match plan_option_insertion(&matrix, attribute_id, option_id)? {
            InsertionPlan::Backfill { assignments } => {
                debug!(variants = assignments.len(), "backfilling option");
                tx.insert_assignments(&assignments).await?;
            }
            InsertionPlan::Proliferate { combinations } => {
                info!(new_variants = combinations.len(), "proliferating variants");
                for combination in &combinations {
                    let variant_id = tx.insert_variant(product_id, 0).await?;
                    tx.insert_assignments(&combination.assignments_for(variant_id))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Delete every variant whose signature repeats a lower-id variant's.
    async fn deduplicate(&self, tx: &mut S::Tx, product_id: ProductId) -> CatalogResult<()> {
        let matrix = tx.load_matrix(product_id).await?;
        let duplicates = plan_deduplication(&matrix);
        if !duplicates.is_empty() {
            let deleted = tx.delete_variants(&duplicates).await?;
            info!(deleted, "duplicate variants collapsed");
        }
        Ok(())
    }

    /// Bump the product and, when configured, verify the written state.
    async fn seal(&self, tx: &mut S::Tx, product_id: ProductId) -> CatalogResult<()> {
        tx.touch_product(product_id).await?;
        if self.config.verify_invariants {
            tx.load_matrix(product_id).await?.check_invariants()?;
        }
        Ok(())
    }
}

/// Commit on success, roll back on failure. A failed rollback is logged and
/// the original error is returned.
async fn finish<T, R>(tx: T, result: CatalogResult<R>) -> CatalogResult<R>
where
    T: CatalogTx,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn lock_known_product<T: CatalogTx>(tx: &mut T, product_id: ProductId) -> CatalogResult<()> {
    if tx.lock_product(product_id).await? {
        Ok(())
    } else {
        Err(DomainError::not_found(product_id).into())
    }
}

/// Resolve and lock the attribute's product, re-checking ownership under the
/// lock since a concurrent writer may have deleted the attribute meanwhile.
async fn lock_attribute_product<T: CatalogTx>(tx: &mut T, attribute_id: AttributeId) -> CatalogResult<ProductId> {
    let product_id = tx
        .attribute_product(attribute_id)
        .await?
        .ok_or_else(|| DomainError::not_found(attribute_id))?;
    lock_known_product(tx, product_id).await?;
    if tx.attribute_product(attribute_id).await? != Some(product_id) {
        return Err(DomainError::not_found(attribute_id).into());
    }
    Ok(product_id)
}

async fn lock_option_owner<T: CatalogTx>(tx: &mut T, option_id: OptionId) -> CatalogResult<(AttributeId, ProductId)> {
    let (attribute_id, product_id) = tx
        .option_owner(option_id)
        .await?
        .ok_or_else(|| DomainError::not_found(option_id))?;
    lock_known_product(tx, product_id).await?;
    match tx.option_owner(option_id).await? {
        Some(owner) if owner == (attribute_id, product_id) => Ok(owner),
        _ => Err(DomainError::not_found(option_id).into()),
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed)
}

fn non_negative(quantity: i64) -> Result<(), DomainError> {
    if quantity < 0 {
        return Err(DomainError::validation(format!(
            "quantity must be >= 0, got {quantity}"
        )));
    }
    Ok(())
}
