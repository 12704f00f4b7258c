//! # Product Repository
//!
//! Catalog rows and the stock aggregate (`products.stock_quantity`).
//!
//! ## Key Operations
//! - Catalog: insert, lookups by id and code
//! - `current()`: point-in-time stock snapshot
//! - Engine only: `lock_row()` and `set_stock()` inside a transaction
//!
//! ## Row Locking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN (deferred)                                                       │
//! │    UPDATE products SET version = version + 1 WHERE id = ?              │
//! │       │  first statement of the transaction: takes SQLite's write      │
//! │       │  lock now, so any other writer waits on busy_timeout           │
//! │       ▼                                                                 │
//! │    SELECT ... FROM products WHERE id = ?   (balance read under lock)   │
//! │    ... ledger append ...                                               │
//! │    UPDATE products SET stock_quantity = new WHERE stock_quantity = old │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use stockbook_core::validation::{
    validate_identifier, validate_initial_stock, validate_product_code, validate_product_name,
};
use stockbook_core::{CoreError, NewProduct, Product, ValidationError};

const PRODUCT_COLUMNS: &str = r#"
    id,
    name,
    code,
    stock_quantity,
    initial_stock,
    min_stock,
    is_active,
    version,
    created_at,
    updated_at
"#;

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
///
/// let product = repo.get_by_code("COKE-330").await?;
/// let stock = repo.current("p-1").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a catalog product. `stock_quantity` starts at `initial_stock`.
    ///
    /// ## Errors
    /// - `Validation` for malformed fields
    /// - `UniqueViolation` if the id or code is taken
    pub async fn insert(&self, new: &NewProduct) -> DbResult<Product> {
        validate_identifier("id", &new.id)?;
        validate_product_code(&new.code)?;
        validate_product_name(&new.name)?;
        validate_initial_stock(new.initial_stock)?;

        if new.min_stock < 0 {
            return Err(ValidationError::OutOfRange {
                field: "min_stock".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        let now = Utc::now();
        let code = new.code.trim();

        debug!(id = %new.id, code = %code, initial_stock = new.initial_stock, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, code,
                stock_quantity, initial_stock, min_stock,
                is_active, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?4, ?5, 1, 0, ?6, ?6)
            "#,
        )
        .bind(&new.id)
        .bind(new.name.trim())
        .bind(code)
        .bind(new.initial_stock)
        .bind(new.min_stock)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } if field.contains("products.code") => {
                DbError::duplicate("code", code)
            }
            DbError::UniqueViolation { field, .. } if field.contains("products.id") => {
                DbError::duplicate("id", &new.id)
            }
            other => other,
        })?;

        self.get_by_id(&new.id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", &new.id))
    }

    /// Gets a product by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Product not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Gets a product by its business code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Lists all products ordered by code.
    pub async fn list(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY code");
        let products = sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Lists every product id, ascending.
    pub async fn list_ids(&self) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    /// Current stock of a product.
    ///
    /// A snapshot: it may be stale by the time the caller acts on it. Only
    /// the engine's locked read is authoritative for a write.
    pub async fn current(&self, product_id: &str) -> DbResult<i64> {
        let stock: Option<i64> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = ?1")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?;

        stock.ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()).into())
    }

    // =========================================================================
    // Engine-only (transactional)
    // =========================================================================

    /// Touches the product row and returns it as seen under the write lock.
    pub(crate) async fn lock_row(conn: &mut SqliteConnection, product_id: &str) -> DbResult<Product> {
        let touched = sqlx::query("UPDATE products SET version = version + 1 WHERE id = ?1")
            .bind(product_id)
            .execute(&mut *conn)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(CoreError::ProductNotFound(product_id.to_string()).into());
        }

        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(product_id)
            .fetch_one(&mut *conn)
            .await?;

        debug!(product_id = %product_id, stock = product.stock_quantity, version = product.version, "Product row locked");
        Ok(product)
    }

    /// Moves the aggregate from `previous` to `new_stock`.
    ///
    /// Compare-and-set on the previous value: if the row no longer holds
    /// `previous` something wrote it outside the engine, and the
    /// transaction must abort.
    pub(crate) async fn set_stock(
        conn: &mut SqliteConnection,
        product_id: &str,
        previous: i64,
        new_stock: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE products SET
                stock_quantity = ?3,
                updated_at = ?4
            WHERE id = ?1 AND stock_quantity = ?2
            "#,
        )
        .bind(product_id)
        .bind(previous)
        .bind(new_stock)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::TransactionFailed(format!(
                "stock of product {} is no longer {}",
                product_id, previous
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
