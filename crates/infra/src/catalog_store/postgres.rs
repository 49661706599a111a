//! Postgres-backed catalog store.
//!
//! Every unit of work is one database transaction. Writers of the same product
//! serialize on a transaction-scoped advisory lock keyed by the product id,
//! which Postgres releases at commit or rollback. Committed reads run in a
//! read-only repeatable-read transaction so a listing never mixes rows from
//! before and after a concurrent commit.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | CatalogStoreError |
//! |------------|----------------------|-------------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `ForeignKey` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / RowNotFound / Other | N/A | `Storage` |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use tracing::{instrument, Span};

use bazaar_catalog::{
    Assignment, Attribute, AttributeOption, AttributeWithOptions, ProductMatrix, Variant,
    VariantWithAssignments,
};
use bazaar_core::{AttributeId, OptionId, ProductId, VariantId};

use super::r#trait::{CatalogStore, CatalogStoreError, CatalogTx};
use crate::config::DatabaseConfig;

/// Pins every statement of a committed read to one snapshot.
const SNAPSHOT_READ: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY";

/// The product id is the whole advisory key (the single-`bigint` key space).
const LOCK_PRODUCT: &str = "SELECT pg_advisory_xact_lock($1)";

/// Postgres catalog store. Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with `config` and bring the schema up to date.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CatalogStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply pending migrations from `crates/infra/migrations`.
    pub async fn migrate(&self) -> Result<(), CatalogStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CatalogStoreError::Storage(format!("migration failed: {e}")))?;
        tracing::info!("catalog migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn snapshot(&self) -> Result<Transaction<'static, Postgres>, CatalogStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_snapshot", e))?;
        sqlx::query(SNAPSHOT_READ)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin_snapshot", e))?;
        Ok(tx)
    }
}

#[async_trait::async_trait]
impl CatalogStore for PostgresCatalogStore {
    type Tx = PostgresCatalogTx;

    async fn begin(&self) -> Result<PostgresCatalogTx, CatalogStoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresCatalogTx { tx, locked: None })
    }

    #[instrument(skip(self), fields(product_id = product_id.get(), operation), err)]
    async fn load_matrix(&self, product_id: ProductId) -> Result<Option<ProductMatrix>, CatalogStoreError> {
        Span::current().record("operation", "load_matrix");

        let mut tx = self.snapshot().await?;
        let matrix = if product_exists(&mut tx, product_id).await? {
            Some(select_matrix(&mut tx, product_id).await?)
        } else {
            None
        };
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_snapshot", e))?;
        Ok(matrix)
    }

    #[instrument(skip(self), fields(variant_id = variant_id.get(), operation), err)]
    async fn find_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<VariantWithAssignments>, CatalogStoreError> {
        Span::current().record("operation", "find_variant");

        let mut tx = self.snapshot().await?;

        let variant = sqlx::query_as::<_, VariantRow>(
            r#"
            SELECT id, product_id, quantity, created_at
            FROM product_variants
            WHERE id = $1
            "#,
        )
        .bind(variant_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("find_variant", e))?;

        let Some(variant) = variant else {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_snapshot", e))?;
            return Ok(None);
        };

        let assignments = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT variant_id, attribute_id, option_id
            FROM product_variant_assignments
            WHERE variant_id = $1
            ORDER BY attribute_id ASC
            "#,
        )
        .bind(variant_id.get())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("find_variant_assignments", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_snapshot", e))?;

        Ok(Some(VariantWithAssignments {
            variant: variant.into(),
            assignments: assignments.into_iter().map(Into::into).collect(),
        }))
    }
}

/// Unit of work backed by one Postgres transaction.
///
/// Dropping it without commit rolls the transaction back (sqlx semantics).
pub struct PostgresCatalogTx {
    tx: Transaction<'static, Postgres>,
    locked: Option<ProductId>,
}

impl PostgresCatalogTx {
    fn ensure_locked(&self, product_id: ProductId) -> Result<(), CatalogStoreError> {
        match self.locked {
            Some(locked) if locked == product_id => Ok(()),
            _ => Err(CatalogStoreError::NotLocked(product_id.to_string())),
        }
    }

    fn ensure_any_lock(&self) -> Result<(), CatalogStoreError> {
        self.locked
            .map(|_| ())
            .ok_or_else(|| CatalogStoreError::NotLocked("no product locked".to_string()))
    }
}

#[async_trait::async_trait]
impl CatalogTx for PostgresCatalogTx {
    #[instrument(skip(self), fields(product_id = product_id.get(), operation), err)]
    async fn lock_product(&mut self, product_id: ProductId) -> Result<bool, CatalogStoreError> {
        Span::current().record("operation", "lock_product");

        if let Some(held) = self.locked {
            if held == product_id {
                return Ok(true);
            }
            return Err(CatalogStoreError::Storage(format!(
                "unit of work already holds {held}"
            )));
        }

        if !product_exists(&mut self.tx, product_id).await? {
            return Ok(false);
        }

        sqlx::query(LOCK_PRODUCT)
            .bind(product_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product", e))?;

        self.locked = Some(product_id);
        Ok(true)
    }

    async fn attribute_product(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<Option<ProductId>, CatalogStoreError> {
        let product: Option<i64> =
            sqlx::query_scalar("SELECT product_id FROM product_attributes WHERE id = $1")
                .bind(attribute_id.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("attribute_product", e))?;
        Ok(product.map(ProductId::new))
    }

    async fn option_owner(
        &mut self,
        option_id: OptionId,
    ) -> Result<Option<(AttributeId, ProductId)>, CatalogStoreError> {
        let owner: Option<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT o.attribute_id, a.product_id
            FROM product_attribute_options o
            JOIN product_attributes a ON a.id = o.attribute_id
            WHERE o.id = $1
            "#,
        )
        .bind(option_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("option_owner", e))?;
        Ok(owner.map(|(a, p)| (AttributeId::new(a), ProductId::new(p))))
    }

    async fn variant_product(
        &mut self,
        variant_id: VariantId,
    ) -> Result<Option<ProductId>, CatalogStoreError> {
        let product: Option<i64> =
            sqlx::query_scalar("SELECT product_id FROM product_variants WHERE id = $1")
                .bind(variant_id.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("variant_product", e))?;
        Ok(product.map(ProductId::new))
    }

    #[instrument(skip(self), fields(product_id = product_id.get(), operation), err)]
    async fn load_matrix(&mut self, product_id: ProductId) -> Result<ProductMatrix, CatalogStoreError> {
        Span::current().record("operation", "load_matrix_locked");
        self.ensure_locked(product_id)?;
        select_matrix(&mut self.tx, product_id).await
    }

    async fn insert_attribute(
        &mut self,
        product_id: ProductId,
        label: &str,
    ) -> Result<Attribute, CatalogStoreError> {
        self.ensure_locked(product_id)?;
        let row = sqlx::query_as::<_, AttributeRow>(
            r#"
            INSERT INTO product_attributes (product_id, label)
            VALUES ($1, $2)
            RETURNING id, product_id, label
            "#,
        )
        .bind(product_id.get())
        .bind(label)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_attribute", e))?;
        Ok(row.into())
    }

    async fn rename_attribute(
        &mut self,
        attribute_id: AttributeId,
        label: &str,
    ) -> Result<(), CatalogStoreError> {
        self.ensure_any_lock()?;
        sqlx::query("UPDATE product_attributes SET label = $2 WHERE id = $1")
            .bind(attribute_id.get())
            .bind(label)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("rename_attribute", e))?;
        Ok(())
    }

    async fn insert_option(
        &mut self,
        attribute_id: AttributeId,
        value: &str,
    ) -> Result<AttributeOption, CatalogStoreError> {
        self.ensure_any_lock()?;
        let row = sqlx::query_as::<_, OptionRow>(
            r#"
            INSERT INTO product_attribute_options (attribute_id, value)
            VALUES ($1, $2)
            RETURNING id, attribute_id, value
            "#,
        )
        .bind(attribute_id.get())
        .bind(value)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_option", e))?;
        Ok(row.into())
    }

    async fn rename_option(&mut self, option_id: OptionId, value: &str) -> Result<(), CatalogStoreError> {
        self.ensure_any_lock()?;
        sqlx::query("UPDATE product_attribute_options SET value = $2 WHERE id = $1")
            .bind(option_id.get())
            .bind(value)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("rename_option", e))?;
        Ok(())
    }

    async fn insert_variant(
        &mut self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<VariantId, CatalogStoreError> {
        self.ensure_locked(product_id)?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO product_variants (product_id, quantity) VALUES ($1, $2) RETURNING id",
        )
        .bind(product_id.get())
        .bind(quantity)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_variant", e))?;
        Ok(VariantId::new(id))
    }

    async fn set_variant_quantity(
        &mut self,
        variant_id: VariantId,
        quantity: i64,
    ) -> Result<(), CatalogStoreError> {
        self.ensure_any_lock()?;
        sqlx::query("UPDATE product_variants SET quantity = $2 WHERE id = $1")
            .bind(variant_id.get())
            .bind(quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_variant_quantity", e))?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(row_count = rows.len(), operation), err)]
    async fn insert_assignments(&mut self, rows: &[Assignment]) -> Result<(), CatalogStoreError> {
        Span::current().record("operation", "insert_assignments");
        self.ensure_any_lock()?;
        if rows.is_empty() {
            return Ok(());
        }

        let variants: Vec<i64> = rows.iter().map(|r| r.variant_id.get()).collect();
        let attributes: Vec<i64> = rows.iter().map(|r| r.attribute_id.get()).collect();
        let options: Vec<i64> = rows.iter().map(|r| r.option_id.get()).collect();

        sqlx::query(
            r#"
            INSERT INTO product_variant_assignments (variant_id, attribute_id, option_id)
            SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::BIGINT[])
            "#,
        )
        .bind(&variants)
        .bind(&attributes)
        .bind(&options)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_assignments", e))?;
        Ok(())
    }

    async fn delete_assignments_by_attribute(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<u64, CatalogStoreError> {
        self.ensure_any_lock()?;
        let result = sqlx::query("DELETE FROM product_variant_assignments WHERE attribute_id = $1")
            .bind(attribute_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_assignments_by_attribute", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_assignments_by_option(
        &mut self,
        option_id: OptionId,
    ) -> Result<Vec<VariantId>, CatalogStoreError> {
        self.ensure_any_lock()?;
        let mut affected: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM product_variant_assignments WHERE option_id = $1 RETURNING variant_id",
        )
        .bind(option_id.get())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_assignments_by_option", e))?;
        affected.sort_unstable();
        Ok(affected.into_iter().map(VariantId::new).collect())
    }

    async fn delete_options_by_attribute(
        &mut self,
        attribute_id: AttributeId,
    ) -> Result<u64, CatalogStoreError> {
        self.ensure_any_lock()?;
        let result = sqlx::query("DELETE FROM product_attribute_options WHERE attribute_id = $1")
            .bind(attribute_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_options_by_attribute", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_option(&mut self, option_id: OptionId) -> Result<(), CatalogStoreError> {
        self.ensure_any_lock()?;
        sqlx::query("DELETE FROM product_attribute_options WHERE id = $1")
            .bind(option_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_option", e))?;
        Ok(())
    }

    async fn delete_attribute(&mut self, attribute_id: AttributeId) -> Result<(), CatalogStoreError> {
        self.ensure_any_lock()?;
        sqlx::query("DELETE FROM product_attributes WHERE id = $1")
            .bind(attribute_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_attribute", e))?;
        Ok(())
    }

    async fn delete_variants(&mut self, variant_ids: &[VariantId]) -> Result<u64, CatalogStoreError> {
        self.ensure_any_lock()?;
        if variant_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = variant_ids.iter().map(|v| v.get()).collect();
        let result = sqlx::query("DELETE FROM product_variants WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_variants", e))?;
        Ok(result.rows_affected())
    }

    async fn touch_product(&mut self, product_id: ProductId) -> Result<(), CatalogStoreError> {
        self.ensure_locked(product_id)?;
        sqlx::query("UPDATE products SET updated_at = NOW() WHERE id = $1")
            .bind(product_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("touch_product", e))?;
        Ok(())
    }

    async fn commit(self) -> Result<(), CatalogStoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), CatalogStoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[derive(Debug, FromRow)]
struct AttributeRow {
    id: i64,
    product_id: i64,
    label: String,
}

impl From<AttributeRow> for Attribute {
    fn from(row: AttributeRow) -> Self {
        Self {
            id: AttributeId::new(row.id),
            product_id: ProductId::new(row.product_id),
            label: row.label,
        }
    }
}

#[derive(Debug, FromRow)]
struct OptionRow {
    id: i64,
    attribute_id: i64,
    value: String,
}

impl From<OptionRow> for AttributeOption {
    fn from(row: OptionRow) -> Self {
        Self {
            id: OptionId::new(row.id),
            attribute_id: AttributeId::new(row.attribute_id),
            value: row.value,
        }
    }
}

#[derive(Debug, FromRow)]
struct VariantRow {
    id: i64,
    product_id: i64,
    quantity: i64,
    created_at: DateTime<Utc>,
}

impl From<VariantRow> for Variant {
    fn from(row: VariantRow) -> Self {
        Self {
            id: VariantId::new(row.id),
            product_id: ProductId::new(row.product_id),
            quantity: row.quantity,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    variant_id: i64,
    attribute_id: i64,
    option_id: i64,
}

impl From<AssignmentRow> for Assignment {
    fn from(row: AssignmentRow) -> Self {
        Assignment::new(
            VariantId::new(row.variant_id),
            AttributeId::new(row.attribute_id),
            OptionId::new(row.option_id),
        )
    }
}

async fn product_exists(conn: &mut PgConnection, product_id: ProductId) -> Result<bool, CatalogStoreError> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
        .bind(product_id.get())
        .fetch_one(conn)
        .await
        .map_err(|e| map_sqlx_error("product_exists", e))
}

/// Read every catalog row of a product.
async fn select_matrix(conn: &mut PgConnection, product_id: ProductId) -> Result<ProductMatrix, CatalogStoreError> {
    let attributes = sqlx::query_as::<_, AttributeRow>(
        r#"
        SELECT id, product_id, label
        FROM product_attributes
        WHERE product_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(product_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("select_attributes", e))?;

    let options = sqlx::query_as::<_, OptionRow>(
        r#"
        SELECT o.id, o.attribute_id, o.value
        FROM product_attribute_options o
        JOIN product_attributes a ON a.id = o.attribute_id
        WHERE a.product_id = $1
        ORDER BY o.id ASC
        "#,
    )
    .bind(product_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("select_options", e))?;

    let variants = sqlx::query_as::<_, VariantRow>(
        r#"
        SELECT id, product_id, quantity, created_at
        FROM product_variants
        WHERE product_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(product_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("select_variants", e))?;

    let assignments = sqlx::query_as::<_, AssignmentRow>(
        r#"
        SELECT s.variant_id, s.attribute_id, s.option_id
        FROM product_variant_assignments s
        JOIN product_variants v ON v.id = s.variant_id
        WHERE v.product_id = $1
        "#,
    )
    .bind(product_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("select_assignments", e))?;

    let mut options_by_attribute: BTreeMap<i64, Vec<AttributeOption>> = BTreeMap::new();
    for row in options {
        options_by_attribute
            .entry(row.attribute_id)
            .or_default()
            .push(row.into());
    }

    let attributes = attributes
        .into_iter()
        .map(|row| {
            let options = options_by_attribute.remove(&row.id).unwrap_or_default();
            AttributeWithOptions {
                attribute: row.into(),
                options,
            }
        })
        .collect();

    Ok(ProductMatrix::new(
        product_id,
        attributes,
        variants.into_iter().map(Into::into).collect(),
        assignments.into_iter().map(Into::into).collect(),
    ))
}

/// Map SQLx errors to CatalogStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CatalogStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => CatalogStoreError::Constraint(msg),
                Some("23503") => CatalogStoreError::ForeignKey(msg),
                _ => CatalogStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            CatalogStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            CatalogStoreError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => CatalogStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_reads_pin_one_read_only_snapshot() {
        assert!(SNAPSHOT_READ.contains("REPEATABLE READ"));
        assert!(SNAPSHOT_READ.contains("READ ONLY"));
    }

    #[test]
    fn product_lock_is_keyed_by_the_id_alone() {
        assert_eq!(LOCK_PRODUCT, "SELECT pg_advisory_xact_lock($1)");
    }

    #[test]
    fn non_database_errors_map_to_storage() {
        match map_sqlx_error("load_matrix", sqlx::Error::PoolClosed) {
            CatalogStoreError::Storage(msg) => assert!(msg.contains("load_matrix")),
            other => panic!("Expected Storage, got {other:?}"),
        }
        match map_sqlx_error("find_variant", sqlx::Error::RowNotFound) {
            CatalogStoreError::Storage(msg) => assert!(msg.contains("find_variant")),
            other => panic!("Expected Storage, got {other:?}"),
        }
    }
}
