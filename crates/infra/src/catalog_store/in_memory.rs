use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use bazaar_catalog::{
    Assignment, Attribute, AttributeOption, AttributeWithOptions, ProductMatrix, Variant,
    VariantWithAssignments,
};
use bazaar_core::{AttributeId, OptionId, ProductId, VariantId};

use super::r#trait::{CatalogStore, CatalogStoreError, CatalogTx};

/// Committed rows of one product.
#[derive(Debug, Clone)]
struct ProductRows {
    updated_at: DateTime<Utc>,
    attributes: BTreeMap<AttributeId, Attribute>,
    options: BTreeMap<OptionId, AttributeOption>,
    variants: BTreeMap<VariantId, Variant>,
    assignments: BTreeMap<(VariantId, AttributeId), OptionId>,
}

impl ProductRows {
    fn new() -> Self {
        Self {
            updated_at: Utc::now(),
            attributes: BTreeMap::new(),
            options: BTreeMap::new(),
            variants: BTreeMap::new(),
            assignments: BTreeMap::new(),
        }
    }

    fn to_matrix(&self, product_id: ProductId) -> ProductMatrix {
        let attributes = self
            .attributes
            .values()
            .map(|attribute| AttributeWithOptions {
                attribute: attribute.clone(),
                options: self
                    .options
                    .values()
                    .filter(|o| o.attribute_id == attribute.id)
                    .cloned()
                    .collect(),
            })
            .collect();

        ProductMatrix::new(
            product_id,
            attributes,
            self.variants.values().cloned().collect(),
            self.assignment_rows().collect(),
        )
    }

    fn assignment_rows(&self) -> impl Iterator<Item = Assignment> + '_ {
        self.assignments
            .iter()
            .map(|((v, a), o)| Assignment::new(*v, *a, *o))
    }

    fn variant_with_assignments(&self, variant_id: VariantId) -> Option<VariantWithAssignments> {
        let variant = self.variants.get(&variant_id)?.clone();
        let assignments = self
            .assignments
            .range((variant_id, AttributeId::new(i64::MIN))..=(variant_id, AttributeId::new(i64::MAX)))
            .map(|((v, a), o)| Assignment::new(*v, *a, *o))
            .collect();
        Some(VariantWithAssignments {
            variant,
            assignments,
        })
    }
}

#[derive(Debug, Default)]
struct Shared {
    products: RwLock<BTreeMap<ProductId, ProductRows>>,
    locks: Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>,
    attribute_seq: AtomicI64,
    option_seq: AtomicI64,
    variant_seq: AtomicI64,
}

impl Shared {
    fn product_lock(&self, product_id: ProductId) -> Result<Arc<tokio::sync::Mutex<()>>, CatalogStoreError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(product_id).or_default().clone())
    }

    fn committed<T>(&self, f: impl Fn(ProductId, &ProductRows) -> Option<T>) -> Result<Option<T>, CatalogStoreError> {
        let products = self.products.read().map_err(|_| poisoned())?;
        Ok(products.iter().find_map(|(id, rows)| f(*id, rows)))
    }
}

fn poisoned() -> CatalogStoreError {
    CatalogStoreError::Storage("lock poisoned".to_string())
}

fn next(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

/// In-memory catalog store.
///
/// Intended for tests/dev. Mirrors the schema's constraints: unique
/// `(variant, attribute)` assignments, foreign keys and cascading deletes.
/// Products are external to the catalog and must be registered first.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogStore {
    shared: Arc<Shared>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `product_id` known to the catalog. Idempotent.
    pub fn register_product(&self, product_id: ProductId) -> Result<(), CatalogStoreError> {
        let mut products = self.shared.products.write().map_err(|_| poisoned())?;
        products.entry(product_id).or_insert_with(ProductRows::new);
        Ok(())
    }

    pub fn product_updated_at(&self, product_id: ProductId) -> Result<Option<DateTime<Utc>>, CatalogStoreError> {
        let products = self.shared.products.read().map_err(|_| poisoned())?;
        Ok(products.get(&product_id).map(|rows| rows.updated_at))
    }
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryCatalogStore {
    type Tx = InMemoryCatalogTx;

    async fn begin(&self) -> Result<InMemoryCatalogTx, CatalogStoreError> {
        Ok(InMemoryCatalogTx {
            shared: self.shared.clone(),
            held: None,
        })
    }

    async fn load_matrix(&self, product_id: ProductId) -> Result<Option<ProductMatrix>, CatalogStoreError> {
        let products = self.shared.products.read().map_err(|_| poisoned())?;
        Ok(products.get(&product_id).map(|rows| rows.to_matrix(product_id)))
    }

    async fn find_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<VariantWithAssignments>, CatalogStoreError> {
        self.shared
            .committed(|_, rows| rows.variant_with_assignments(variant_id))
    }
}

#[derive(Debug)]
struct Held {
    product_id: ProductId,
    rows: ProductRows,
    _guard: OwnedMutexGuard<()>,
}

/// Unit of work over [`InMemoryCatalogStore`].
///
/// Locking a product copies its committed rows into a private working copy;
/// commit writes the copy back, drop discards it.
#[derive(Debug)]
pub struct InMemoryCatalogTx {
    shared: Arc<Shared>,
    held: Option<Held>,
}

impl InMemoryCatalogTx {
    /// Lookup against the working copy first, then committed state.
    fn lookup<T>(&self, f: impl Fn(ProductId, &ProductRows) -> Option<T>) -> Result<Option<T>, CatalogStoreError> {
        if let Some(held) = &self.held {
            if let Some(found) = f(held.product_id, &held.rows) {
                return Ok(Some(found));
            }
            let locked = held.product_id;
            return self
                .shared
                .committed(|id, rows| if id == locked { None } else { f(id, rows) });
        }
        self.shared.committed(f)
    }

    fn rows(&mut self, product_id: ProductId) -> Result<&mut ProductRows, CatalogStoreError> {
        match &mut self.held {
            Some(held) if held.product_id == product_id => Ok(&mut held.rows),
            _ => Err(CatalogStoreError::NotLocked(product_id.to_string())),
        }
    }

    fn locked_rows(&mut self) -> Result<&mut ProductRows, CatalogStoreError> {
        self.held
            .as_mut()
            .map(|held| &mut held.rows)
            .ok_or_else(|| CatalogStoreError::NotLocked("no product locked".to_string()))
    }
}

#[async_trait::async_trait]
impl CatalogTx for InMemoryCatalogTx {
    async fn lock_product(&mut self, product_id: ProductId) -> Result<bool, CatalogStoreError> {
        if let Some(held) = &self.held {
            if held.product_id == product_id {
                return Ok(true);
            }
            return Err(CatalogStoreError::Storage(format!(
                "unit of work already holds {}",
                held.product_id
            )));
        }

        let exists = {
            let products = self.shared.products.read().map_err(|_| poisoned())?;
            products.contains_key(&product_id)
        };
        if !exists {
            return Ok(false);
        }

        let guard = self.shared.product_lock(product_id)?.lock_owned().await;

        let rows = {
            let products = self.shared.products.read().map_err(|_| poisoned())?;
            products.get(&product_id).cloned().unwrap_or_else(ProductRows::new)
        };

        self.held = Some(Held {
            product_id,
            rows,
            _guard: guard,
        });
        Ok(true)
    }

    async fn attribute_product(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<Option<ProductId>, CatalogStoreError> {
        self.lookup(|_, rows| rows.attributes.get(&attribute_id).map(|a| a.product_id))
    }

    async fn option_owner(
        &mut self,
        option_id: OptionId,
    ) -> Result<Option<(AttributeId, ProductId)>, CatalogStoreError> {
        self.lookup(|product_id, rows| {
            rows.options
                .get(&option_id)
                .map(|o| (o.attribute_id, product_id))
        })
    }

    async fn variant_product(
        &mut self,
        variant_id: VariantId,
    ) -> Result<Option<ProductId>, CatalogStoreError> {
        self.lookup(|_, rows| rows.variants.get(&variant_id).map(|v| v.product_id))
    }

    async fn load_matrix(&mut self, product_id: ProductId) -> Result<ProductMatrix, CatalogStoreError> {
        let rows = self.rows(product_id)?;
        Ok(rows.to_matrix(product_id))
    }

    async fn insert_attribute(
        &mut self,
        product_id: ProductId,
        label: &str,
    ) -> Result<Attribute, CatalogStoreError> {
        let id = AttributeId::new(next(&self.shared.attribute_seq));
        let rows = self.rows(product_id)?;
        let attribute = Attribute {
            id,
            product_id,
            label: label.to_string(),
        };
        rows.attributes.insert(id, attribute.clone());
        Ok(attribute)
    }

    async fn rename_attribute(
        &mut self,
        attribute_id: AttributeId,
        label: &str,
    ) -> Result<(), CatalogStoreError> {
        let rows = self.locked_rows()?;
        if let Some(attribute) = rows.attributes.get_mut(&attribute_id) {
            attribute.label = label.to_string();
        }
        Ok(())
    }

    async fn insert_option(
        &mut self,
        attribute_id: AttributeId,
        value: &str,
    ) -> Result<AttributeOption, CatalogStoreError> {
        let id = OptionId::new(next(&self.shared.option_seq));
        let rows = self.locked_rows()?;
        if !rows.attributes.contains_key(&attribute_id) {
            return Err(CatalogStoreError::ForeignKey(format!(
                "option references missing {attribute_id}"
            )));
        }
        let option = AttributeOption {
            id,
            attribute_id,
            value: value.to_string(),
        };
        rows.options.insert(id, option.clone());
        Ok(option)
    }

    async fn rename_option(&mut self, option_id: OptionId, value: &str) -> Result<(), CatalogStoreError> {
        let rows = self.locked_rows()?;
        if let Some(option) = rows.options.get_mut(&option_id) {
            option.value = value.to_string();
        }
        Ok(())
    }

    async fn insert_variant(
        &mut self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<VariantId, CatalogStoreError> {
        if quantity < 0 {
            return Err(CatalogStoreError::Constraint(format!(
                "variant quantity must be >= 0, got {quantity}"
            )));
        }
        let id = VariantId::new(next(&self.shared.variant_seq));
        let rows = self.rows(product_id)?;
        rows.variants.insert(
            id,
            Variant {
                id,
                product_id,
                quantity,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn set_variant_quantity(
        &mut self,
        variant_id: VariantId,
        quantity: i64,
    ) -> Result<(), CatalogStoreError> {
        if quantity < 0 {
            return Err(CatalogStoreError::Constraint(format!(
                "variant quantity must be >= 0, got {quantity}"
            )));
        }
        let rows = self.locked_rows()?;
        if let Some(variant) = rows.variants.get_mut(&variant_id) {
            variant.quantity = quantity;
        }
        Ok(())
    }

    async fn insert_assignments(&mut self, assignments: &[Assignment]) -> Result<(), CatalogStoreError> {
        let rows = self.locked_rows()?;
        for a in assignments {
            if !rows.variants.contains_key(&a.variant_id) {
                return Err(CatalogStoreError::ForeignKey(format!(
                    "assignment references missing {}",
                    a.variant_id
                )));
            }
            match rows.options.get(&a.option_id) {
                Some(option) if option.attribute_id == a.attribute_id => {}
                _ => {
                    return Err(CatalogStoreError::ForeignKey(format!(
                        "assignment references {} which is not an option of {}",
                        a.option_id, a.attribute_id
                    )));
                }
            }
            let key = (a.variant_id, a.attribute_id);
            if rows.assignments.contains_key(&key) {
                return Err(CatalogStoreError::Constraint(format!(
                    "{} already has an assignment for {}",
                    a.variant_id, a.attribute_id
                )));
            }
            rows.assignments.insert(key, a.option_id);
        }
        Ok(())
    }

    async fn delete_assignments_by_attribute(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<u64, CatalogStoreError> {
        let rows = self.locked_rows()?;
        let before = rows.assignments.len();
        rows.assignments.retain(|(_, a), _| *a != attribute_id);
        Ok((before - rows.assignments.len()) as u64)
    }

    async fn delete_assignments_by_option(
        &mut self,
        option_id: OptionId,
    ) -> Result<Vec<VariantId>, CatalogStoreError> {
        let rows = self.locked_rows()?;
        let mut affected = Vec::new();
        rows.assignments.retain(|(v, _), o| {
            if *o == option_id {
                affected.push(*v);
                false
            } else {
                true
            }
        });
        affected.sort_unstable();
        Ok(affected)
    }

    async fn delete_options_by_attribute(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<u64, CatalogStoreError> {
        let rows = self.locked_rows()?;
        let doomed: Vec<OptionId> = rows
            .options
            .values()
            .filter(|o| o.attribute_id == attribute_id)
            .map(|o| o.id)
            .collect();
        for id in &doomed {
            rows.options.remove(id);
        }
        rows.assignments.retain(|_, o| !doomed.contains(o));
        Ok(doomed.len() as u64)
    }

    async fn delete_option(&mut self, option_id: OptionId) -> Result<(), CatalogStoreError> {
        let rows = self.locked_rows()?;
        rows.options.remove(&option_id);
        rows.assignments.retain(|_, o| *o != option_id);
        Ok(())
    }

    async fn delete_attribute(&mut self, attribute_id: AttributeId) -> Result<(), CatalogStoreError> {
        let rows = self.locked_rows()?;
        rows.attributes.remove(&attribute_id);
        rows.options.retain(|_, o| o.attribute_id != attribute_id);
        rows.assignments.retain(|(_, a), _| *a != attribute_id);
        Ok(())
    }

    async fn delete_variants(&mut self, variant_ids: &[VariantId]) -> Result<u64, CatalogStoreError> {
        let rows = self.locked_rows()?;
        let mut deleted = 0;
        for id in variant_ids {
            if rows.variants.remove(id).is_some() {
                deleted += 1;
            }
        }
        rows.assignments.retain(|(v, _), _| !variant_ids.contains(v));
        Ok(deleted)
    }

    async fn touch_product(&mut self, product_id: ProductId) -> Result<(), CatalogStoreError> {
        let rows = self.rows(product_id)?;
        rows.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(self) -> Result<(), CatalogStoreError> {
        if let Some(held) = self.held {
            let mut products = self.shared.products.write().map_err(|_| poisoned())?;
            products.insert(held.product_id, held.rows);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), CatalogStoreError> {
        Ok(())
    }
}
