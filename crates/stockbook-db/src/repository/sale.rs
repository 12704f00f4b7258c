//! # Sale Repository
//!
//! Sale headers and line items as far as stock is concerned.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. (OPTIONAL) REGISTER                                                │
//! │     └── create() → Sale { status: Pending }                            │
//! │                                                                         │
//! │  2. PROCESS (StockEngine::process_sale, one transaction)               │
//! │     └── record_sale()   header + line items, checked on replay         │
//! │     └── ledger debits                                                  │
//! │     └── mark_completed() → Sale { status: Completed }                  │
//! │                                                                         │
//! │  3. (OPTIONAL) VOID (StockEngine::void_sale, one transaction)          │
//! │     └── ledger reversals                                               │
//! │     └── mark_void() → Sale { status: Void }                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use stockbook_core::validation::validate_identifier;
use stockbook_core::{Sale, SaleLineItem, SaleStatus, ValidationError};

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Registers a pending sale before it is processed.
    ///
    /// Returns the existing sale unchanged if the id is already known.
    pub async fn create(&self, sale_id: &str) -> DbResult<Sale> {
        validate_identifier("sale_id", sale_id)?;

        let mut conn = self.pool.acquire().await?;
        Self::ensure_sale(&mut conn, sale_id).await
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_sale(&mut conn, id).await
    }

    /// Gets the line items of a sale, in submission order.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleLineItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_items(&mut conn, sale_id).await
    }

    // =========================================================================
    // Connection-scoped (usable inside a transaction)
    // =========================================================================

    pub(crate) async fn fetch_sale(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(
            r#"
            SELECT id, status, created_at, updated_at, completed_at
            FROM sales
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }

    pub(crate) async fn fetch_items(
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<SaleLineItem>> {
        let items = sqlx::query_as::<_, SaleLineItem>(
            r#"
            SELECT id, sale_id, product_id, quantity, unit_price_cents
            FROM sale_line_items
            WHERE sale_id = ?1
            ORDER BY position
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(items)
    }

    /// Inserts a pending header unless the sale already exists.
    async fn ensure_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Sale> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sales (id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(sale_id)
        .bind(SaleStatus::Pending)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::fetch_sale(conn, sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))
    }

    /// Records a sale and its line items.
    ///
    /// The first run stores the line items. A replay must submit exactly the
    /// line items that were stored; anything else is rejected rather than
    /// merged into a sale that already moved stock.
    pub(crate) async fn record_sale(
        conn: &mut SqliteConnection,
        sale_id: &str,
        line_items: &[SaleLineItem],
    ) -> DbResult<Sale> {
        let sale = Self::ensure_sale(conn, sale_id).await?;
        let stored = Self::fetch_items(conn, sale_id).await?;

        if !stored.is_empty() {
            let mut submitted = line_items.to_vec();
            let mut recorded = stored;
            submitted.sort_by(|a, b| a.id.cmp(&b.id));
            recorded.sort_by(|a, b| a.id.cmp(&b.id));

            if submitted != recorded {
                return Err(ValidationError::NotPermitted {
                    field: "line_items".to_string(),
                    reason: format!("sale {} was already recorded with different line items", sale_id),
                }
                .into());
            }

            debug!(sale_id = %sale_id, "Sale line items already recorded");
            return Ok(sale);
        }

        let now = Utc::now();
        for (position, item) in line_items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_line_items (
                    id, sale_id, product_id, position,
                    quantity, unit_price_cents, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&item.id)
            .bind(&item.sale_id)
            .bind(&item.product_id)
            .bind(position as i64)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { .. } => DbError::duplicate("line_item_id", &item.id),
                other => other,
            })?;
        }

        debug!(sale_id = %sale_id, items = line_items.len(), "Sale line items recorded");
        Ok(sale)
    }

    pub(crate) async fn mark_completed(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                status = 'completed',
                completed_at = COALESCE(completed_at, ?2),
                updated_at = ?2
            WHERE id = ?1 AND status IN ('pending', 'completed')
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale (open)", sale_id));
        }

        Ok(())
    }

    pub(crate) async fn mark_void(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                status = 'void',
                updated_at = ?2
            WHERE id = ?1 AND status != 'void'
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale (not void)", sale_id));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Database;
    use stockbook_core::{ErrorKind, NewProduct};

    async fn seeded() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.products()
            .insert(&NewProduct {
                id: "p-1".into(),
                name: "Bread".into(),
                code: "BREAD".into(),
                initial_stock: 10,
                min_stock: 0,
            })
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let db = seeded().await;
        let first = db.sales().create("sale-1").await.unwrap();
        let second = db.sales().create("sale-1").await.unwrap();

        assert_eq!(first.status, SaleStatus::Pending);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_record_sale_keeps_order_and_checks_replays() {
        let db = seeded().await;
        let items = vec![
            SaleLineItem::new("li-b", "sale-1", "p-1", 1, 100),
            SaleLineItem::new("li-a", "sale-1", "p-1", 2, 100),
        ];

        let mut tx = db.pool().begin().await.unwrap();
        SaleRepository::record_sale(&mut tx, "sale-1", &items).await.unwrap();
        SaleRepository::record_sale(&mut tx, "sale-1", &items).await.unwrap();

        let changed = vec![SaleLineItem::new("li-b", "sale-1", "p-1", 5, 100)];
        let err = SaleRepository::record_sale(&mut tx, "sale-1", &changed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        tx.commit().await.unwrap();

        let stored = db.sales().get_items("sale-1").await.unwrap();
        assert_eq!(stored, items);
    }

    #[tokio::test]
    async fn test_line_item_id_cannot_move_between_sales() {
        let db = seeded().await;
        let mut tx = db.pool().begin().await.unwrap();

        SaleRepository::record_sale(
            &mut tx,
            "sale-1",
            &[SaleLineItem::new("li-1", "sale-1", "p-1", 1, 100)],
        )
        .await
        .unwrap();

        let err = SaleRepository::record_sale(
            &mut tx,
            "sale-2",
            &[SaleLineItem::new("li-1", "sale-2", "p-1", 1, 100)],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DbError::UniqueViolation { ref field, .. } if field == "line_item_id"));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let db = seeded().await;
        db.sales().create("sale-1").await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        SaleRepository::mark_completed(&mut tx, "sale-1").await.unwrap();
        SaleRepository::mark_void(&mut tx, "sale-1").await.unwrap();
        assert!(SaleRepository::mark_completed(&mut tx, "sale-1").await.is_err());
        assert!(SaleRepository::mark_void(&mut tx, "sale-1").await.is_err());
        tx.commit().await.unwrap();

        let sale = db.sales().get_by_id("sale-1").await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Void);
        assert!(sale.completed_at.is_some());
    }
}
