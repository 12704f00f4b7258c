//! # Movement Repository
//!
//! The append-only stock ledger (`stock_movements`).
//!
//! ## Guarantees
//! - Entries are only ever inserted; triggers reject UPDATE and DELETE
//! - At most one entry per `(reference_type, reference_id, product_id)`
//! - Per product, ascending `seq` is the order movements were applied
//!
//! ## History Cursor
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  list_by_product("p-1", range)  →  MovementHistory { after_seq: 0 }    │
//! │                                                                         │
//! │  next_page()  →  seq 1..=100    position() = 100                       │
//! │  next_page()  →  seq 101..=200  position() = 200                       │
//! │  next_page()  →  seq 201..=230  (short page: exhausted)                │
//! │  next_page()  →  []                                                    │
//! │                                                                         │
//! │  resume("p-1", range, 200) picks up at seq 201                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Pages are keyset queries on `seq`, so entries appended while a cursor is
//! open show up on a later page instead of shifting earlier ones.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{is_ledger_reference_violation, DbError, DbResult};
use stockbook_core::{HistoryRange, PlannedMovement, Reference, StockMovement};

const MOVEMENT_COLUMNS: &str = r#"
    m.id,
    m.seq,
    m.product_id,
    m.movement_type,
    m.delta,
    m.previous_stock,
    m.new_stock,
    m.reference_type,
    m.reference_id,
    m.reversal_of,
    m.reason,
    m.actor_id,
    m.created_at
"#;

/// Repository for the stock ledger.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    /// Creates a new MovementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// Gets a movement by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_by_id(&mut conn, id).await
    }

    /// Finds the entry a reference produced for a product, if any.
    pub async fn find_by_reference(
        &self,
        reference: &Reference,
        product_id: &str,
    ) -> DbResult<Option<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_by_reference(&mut conn, reference, product_id).await
    }

    /// Sale debits of a sale, in line item order.
    pub async fn find_for_sale(&self, sale_id: &str) -> DbResult<Vec<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_for_sale(&mut conn, sale_id).await
    }

    /// Σ delta over a product's ledger. Zero for a product with no entries.
    pub async fn sum_delta(&self, product_id: &str) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM stock_movements WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    /// Number of ledger entries of a product.
    pub async fn count_by_product(&self, product_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE product_id = ?1")
                .bind(product_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Opens a history cursor over a product's ledger. Nothing is read until
    /// the first `next_page()`.
    pub fn list_by_product(&self, product_id: &str, range: HistoryRange) -> MovementHistory {
        self.resume(product_id, range, 0)
    }

    /// Reopens a history cursor after the entry with sequence `after_seq`.
    pub fn resume(&self, product_id: &str, range: HistoryRange, after_seq: i64) -> MovementHistory {
        MovementHistory {
            pool: self.pool.clone(),
            product_id: product_id.to_string(),
            from: range.from,
            to: range.to,
            page_size: range.page_size.max(1),
            after_seq,
            exhausted: false,
        }
    }

    // =========================================================================
    // Connection-scoped (usable inside a transaction)
    // =========================================================================

    /// Appends a planned movement.
    ///
    /// ## Errors
    /// - `DuplicateOperation` if the reference already has an entry for
    ///   this product. The statement fails, the transaction stays usable.
    pub(crate) async fn append(
        conn: &mut SqliteConnection,
        planned: &PlannedMovement,
    ) -> DbResult<StockMovement> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(
            id = %id,
            product_id = %planned.product_id,
            delta = planned.delta,
            reference = %planned.reference,
            "Appending stock movement"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_id, movement_type,
                delta, previous_stock, new_stock,
                reference_type, reference_id, reversal_of,
                reason, actor_id, created_at
            ) VALUES (
                ?1, ?2, ?3,
                ?4, ?5, ?6,
                ?7, ?8, ?9,
                ?10, ?11, ?12
            )
            "#,
        )
        .bind(&id)
        .bind(&planned.product_id)
        .bind(planned.movement_type)
        .bind(planned.delta)
        .bind(planned.previous_stock)
        .bind(planned.new_stock)
        .bind(planned.reference.reference_type)
        .bind(&planned.reference.reference_id)
        .bind(&planned.reversal_of)
        .bind(&planned.reason)
        .bind(&planned.actor_id)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_ledger_reference_violation(&e) {
                DbError::DuplicateOperation {
                    reference: planned.reference.clone(),
                    product_id: planned.product_id.clone(),
                }
            } else {
                DbError::from(e)
            }
        })?;

        Ok(StockMovement {
            id,
            seq: result.last_insert_rowid(),
            product_id: planned.product_id.clone(),
            movement_type: planned.movement_type,
            delta: planned.delta,
            previous_stock: planned.previous_stock,
            new_stock: planned.new_stock,
            reference_type: planned.reference.reference_type,
            reference_id: planned.reference.reference_id.clone(),
            reversal_of: planned.reversal_of.clone(),
            reason: planned.reason.clone(),
            actor_id: planned.actor_id.clone(),
            created_at: now,
        })
    }

    pub(crate) async fn fetch_by_id(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<StockMovement>> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements m WHERE m.id = ?1");
        let movement = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(movement)
    }

    pub(crate) async fn fetch_by_reference(
        conn: &mut SqliteConnection,
        reference: &Reference,
        product_id: &str,
    ) -> DbResult<Option<StockMovement>> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements m
            WHERE m.reference_type = ?1
              AND m.reference_id = ?2
              AND m.product_id = ?3
            "#
        );
        let movement = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(reference.reference_type)
            .bind(&reference.reference_id)
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(movement)
    }

    pub(crate) async fn fetch_for_sale(
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements m
            INNER JOIN sale_line_items li
                ON li.id = m.reference_id
               AND li.product_id = m.product_id
            WHERE m.reference_type = 'sale_line_item'
              AND li.sale_id = ?1
            ORDER BY li.position
            "#
        );
        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(sale_id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(movements)
    }
}

// =============================================================================
// History Cursor
// =============================================================================

/// Lazy, finite, restartable cursor over one product's ledger.
#[derive(Debug, Clone)]
pub struct MovementHistory {
    pool: SqlitePool,
    product_id: String,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    page_size: u32,
    after_seq: i64,
    exhausted: bool,
}

impl MovementHistory {
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// Sequence number of the last entry returned. Pass it to
    /// `MovementRepository::resume` to continue from here later.
    pub fn position(&self) -> i64 {
        self.after_seq
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches the next page. An empty page means the history is exhausted.
    pub async fn next_page(&mut self) -> DbResult<Vec<StockMovement>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements m
            WHERE m.product_id = ?1
              AND m.seq > ?2
              AND (?3 IS NULL OR m.created_at >= ?3)
              AND (?4 IS NULL OR m.created_at <= ?4)
            ORDER BY m.seq
            LIMIT ?5
            "#
        );

        let page = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(&self.product_id)
            .bind(self.after_seq)
            .bind(self.from)
            .bind(self.to)
            .bind(self.page_size as i64)
            .fetch_all(&self.pool)
            .await?;

        debug!(
            product_id = %self.product_id,
            after_seq = self.after_seq,
            count = page.len(),
            "Fetched history page"
        );

        if let Some(last) = page.last() {
            self.after_seq = last.seq;
        }
        if page.len() < self.page_size as usize {
            self.exhausted = true;
        }

        Ok(page)
    }

    /// Drains the cursor.
    pub async fn collect_all(mut self) -> DbResult<Vec<StockMovement>> {
        let mut all = Vec::new();
        loop {
            let page = self.next_page().await?;
            if page.is_empty() {
                break;
            }
            all.extend(page);
        }
        Ok(all)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Database;
    use crate::repository::ProductRepository;
    use stockbook_core::{MovementType, NewProduct};

    async fn seeded() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.products()
            .insert(&NewProduct {
                id: "p-1".into(),
                name: "Water 500ml".into(),
                code: "WATER-500".into(),
                initial_stock: 100,
                min_stock: 0,
            })
            .await
            .unwrap();
        db
    }

    fn inbound(reference_id: &str, previous: i64, qty: i64) -> PlannedMovement {
        PlannedMovement {
            product_id: "p-1".into(),
            movement_type: MovementType::Inbound,
            delta: qty,
            previous_stock: previous,
            new_stock: previous + qty,
            reference: Reference::adjustment(reference_id),
            reversal_of: None,
            reason: Some("delivery".into()),
            actor_id: None,
        }
    }

    async fn append_committed(db: &Database, planned: &PlannedMovement) -> StockMovement {
        let mut tx = db.pool().begin().await.unwrap();
        ProductRepository::lock_row(&mut tx, &planned.product_id)
            .await
            .unwrap();
        let movement = MovementRepository::append(&mut tx, planned).await.unwrap();
        ProductRepository::set_stock(
            &mut tx,
            &planned.product_id,
            planned.previous_stock,
            planned.new_stock,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        movement
    }

    #[tokio::test]
    async fn test_append_and_lookup() {
        let db = seeded().await;
        let movement = append_committed(&db, &inbound("k-1", 100, 5)).await;

        let repo = db.movements();
        let fetched = repo.get_by_id(&movement.id).await.unwrap().unwrap();
        assert_eq!(fetched, movement);

        let by_ref = repo
            .find_by_reference(&Reference::adjustment("k-1"), "p-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.id, movement.id);

        assert_eq!(repo.sum_delta("p-1").await.unwrap(), 5);
        assert_eq!(repo.count_by_product("p-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_reference_is_duplicate_operation() {
        let db = seeded().await;
        append_committed(&db, &inbound("k-1", 100, 5)).await;

        let mut tx = db.pool().begin().await.unwrap();
        let err = MovementRepository::append(&mut tx, &inbound("k-1", 105, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateOperation { ref product_id, .. } if product_id == "p-1"));

        // The failed statement does not poison the transaction
        let next = MovementRepository::append(&mut tx, &inbound("k-2", 100, 1)).await;
        assert!(next.is_ok());
        tx.rollback().await.unwrap();

        assert_eq!(db.movements().count_by_product("p-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ledger_rejects_update_and_delete() {
        let db = seeded().await;
        let movement = append_committed(&db, &inbound("k-1", 100, 5)).await;

        let update = sqlx::query("UPDATE stock_movements SET delta = 50 WHERE id = ?1")
            .bind(&movement.id)
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM stock_movements WHERE id = ?1")
            .bind(&movement.id)
            .execute(db.pool())
            .await;
        assert!(delete.is_err());
    }

    #[tokio::test]
    async fn test_history_pages_and_resumes() {
        let db = seeded().await;
        let mut stock = 100;
        for i in 0..5 {
            append_committed(&db, &inbound(&format!("k-{i}"), stock, 1)).await;
            stock += 1;
        }

        let repo = db.movements();
        let mut history = repo.list_by_product("p-1", HistoryRange::all(2));

        let first = history.next_page().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].previous_stock, 100);
        let position = history.position();

        let second = history.next_page().await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].seq > first[1].seq);

        let third = history.next_page().await.unwrap();
        assert_eq!(third.len(), 1);
        assert!(history.is_exhausted());
        assert!(history.next_page().await.unwrap().is_empty());

        let resumed = repo
            .resume("p-1", HistoryRange::all(10), position)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(resumed.len(), 3);
        assert_eq!(resumed[0].id, second[0].id);
    }

    #[tokio::test]
    async fn test_history_time_window() {
        let db = seeded().await;
        append_committed(&db, &inbound("k-1", 100, 1)).await;

        let future = Utc::now() + chrono::Duration::hours(1);
        let empty = db
            .movements()
            .list_by_product(
                "p-1",
                HistoryRange::between(future, future + chrono::Duration::hours(1), 10),
            )
            .collect_all()
            .await
            .unwrap();
        assert!(empty.is_empty());

        let past = Utc::now() - chrono::Duration::hours(1);
        let all = db
            .movements()
            .list_by_product("p-1", HistoryRange::between(past, future, 10))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }
}
