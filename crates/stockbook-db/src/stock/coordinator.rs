//! # Decrement Coordinator
//!
//! Applies finalized sales to stock, all line items or none.
//!
//! ## Sale State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Begin ──► LockProducts ──► ValidateAvailability ──► DebitAndRecord    │
//! │    │            │                    │                     │            │
//! │    │            │ LockTimeout        │ InsufficientStock   │            │
//! │    ▼            ▼                    ▼                     ▼            │
//! │  Abort ◄────────┴────────────────────┴──────────────── Commit          │
//! │  (nothing written)                              (ledger + aggregate +  │
//! │                                                  sale completed)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotency
//! Each line item owns the ledger reference `("sale_line_item", id)`. A line
//! item that already has its entry is answered from the ledger and not
//! debited again, so a checkout that retries after a lost response gets the
//! same movements back.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;
use stockbook_core::ledger::{plan_reversal, plan_sale};
use stockbook_core::validation::{validate_identifier, validate_sale_request};
use stockbook_core::{CoreError, Reference, SaleLineItem, SaleOutcome, SaleStatus, StockMovement};
use tracing::{debug, info, instrument};

use super::{apply_planned, finish_tx, lock_balances, StockEngine};
use crate::error::{DbError, DbResult};
use crate::repository::{MovementRepository, SaleRepository};

/// Attempts before giving up on a sale whose product set keeps changing.
const MAX_VOID_ATTEMPTS: usize = 3;

enum VoidStep {
    Done(Vec<StockMovement>),
    ProductsChanged,
}

impl StockEngine {
    /// Debits stock for every line item of a finalized sale.
    ///
    /// ## Errors
    /// - `Validation` for malformed requests or a sale replayed with
    ///   different line items
    /// - `InvalidSaleStatus` if the sale is void
    /// - `NotFound` if a product does not exist
    /// - `InsufficientStock` naming the first short product
    /// - `LockTimeout` if a product stays locked past `lock_timeout`
    ///
    /// On any error nothing is written.
    #[instrument(skip_all, fields(sale_id = %sale_id, lines = line_items.len()))]
    pub async fn process_sale(
        &self,
        sale_id: &str,
        line_items: &[SaleLineItem],
    ) -> DbResult<SaleOutcome> {
        validate_sale_request(sale_id, line_items)?;

        let product_ids: BTreeSet<String> = line_items
            .iter()
            .map(|item| item.product_id.clone())
            .collect();

        let _locks = self
            .locks
            .acquire(&product_ids, self.config.lock_timeout)
            .await?;

        let outcome = match self.apply_sale(sale_id, line_items, &product_ids).await {
            Err(DbError::DuplicateOperation {
                reference,
                product_id,
            }) => {
                // Someone else recorded the entry first; the replay path
                // picks it up from the ledger.
                debug!(reference = %reference, product_id = %product_id, "Replaying sale after duplicate entry");
                self.apply_sale(sale_id, line_items, &product_ids).await?
            }
            other => other?,
        };

        if outcome.is_full_replay() {
            info!(sale_id = %sale_id, "Sale already applied, returning recorded movements");
        } else {
            info!(
                sale_id = %sale_id,
                applied = outcome.movements.len() - outcome.replayed,
                replayed = outcome.replayed,
                "Sale committed"
            );
        }

        Ok(outcome)
    }

    async fn apply_sale(
        &self,
        sale_id: &str,
        line_items: &[SaleLineItem],
        product_ids: &BTreeSet<String>,
    ) -> DbResult<SaleOutcome> {
        let mut tx = self.db.pool().begin().await?;
        let result = sale_steps(&mut tx, sale_id, line_items, product_ids).await;
        finish_tx(tx, result).await
    }

    /// Voids a sale, reversing every stock movement it produced.
    ///
    /// - Completed sale: each debit gets its reversal, sale becomes void
    /// - Pending sale: marked void, no stock moves
    /// - Void sale: no-op, returns the reversals written when it was voided
    ///
    /// Debits already reversed one by one through `reverse_movement` are
    /// not reversed again.
    #[instrument(skip_all, fields(sale_id = %sale_id))]
    pub async fn void_sale(
        &self,
        sale_id: &str,
        actor_id: Option<&str>,
    ) -> DbResult<Vec<StockMovement>> {
        validate_identifier("sale_id", sale_id)?;

        let sales = self.db.sales();
        if sales.get_by_id(sale_id).await?.is_none() {
            return Err(CoreError::SaleNotFound(sale_id.to_string()).into());
        }

        for attempt in 1..=MAX_VOID_ATTEMPTS {
            let product_ids: BTreeSet<String> = sales
                .get_items(sale_id)
                .await?
                .into_iter()
                .map(|item| item.product_id)
                .collect();

            let _locks = self
                .locks
                .acquire(&product_ids, self.config.lock_timeout)
                .await?;

            let mut tx = self.db.pool().begin().await?;
            let result = void_steps(&mut tx, sale_id, &product_ids, actor_id).await;

            match result {
                Ok(VoidStep::ProductsChanged) => {
                    tx.rollback().await?;
                    debug!(sale_id = %sale_id, attempt, "Sale line items changed before lock, retrying void");
                }
                Ok(VoidStep::Done(reversals)) => {
                    let reversals = finish_tx(tx, Ok(reversals)).await?;
                    info!(sale_id = %sale_id, reversals = reversals.len(), "Sale voided");
                    return Ok(reversals);
                }
                Err(err) => return finish_tx(tx, Err(err)).await,
            }
        }

        Err(DbError::TransactionFailed(format!(
            "sale {} kept changing while being voided",
            sale_id
        )))
    }
}

// =============================================================================
// Transaction bodies
// =============================================================================

async fn sale_steps(
    conn: &mut SqliteConnection,
    sale_id: &str,
    line_items: &[SaleLineItem],
    product_ids: &BTreeSet<String>,
) -> DbResult<SaleOutcome> {
    let balances = lock_balances(conn, product_ids).await?;

    if let Some(sale) = SaleRepository::fetch_sale(conn, sale_id).await? {
        if sale.status == SaleStatus::Void {
            return Err(CoreError::InvalidSaleStatus {
                sale_id: sale_id.to_string(),
                current_status: sale.status.to_string(),
            }
            .into());
        }
    }

    SaleRepository::record_sale(conn, sale_id, line_items).await?;

    let mut recorded: Vec<Option<StockMovement>> = Vec::with_capacity(line_items.len());
    let mut pending: Vec<SaleLineItem> = Vec::new();

    for item in line_items {
        let existing =
            MovementRepository::fetch_by_reference(conn, &item.reference(), &item.product_id)
                .await?;
        if existing.is_none() {
            pending.push(item.clone());
        }
        recorded.push(existing);
    }

    let replayed = line_items.len() - pending.len();
    let planned = plan_sale(&pending, &balances)?;
    let mut written = apply_planned(conn, &balances, &planned).await?.into_iter();

    let movements = recorded
        .into_iter()
        .map(|slot| match slot {
            Some(existing) => Ok(existing),
            None => written
                .next()
                .ok_or_else(|| DbError::Internal("planned fewer movements than line items".into())),
        })
        .collect::<DbResult<Vec<_>>>()?;

    SaleRepository::mark_completed(conn, sale_id).await?;

    Ok(SaleOutcome {
        sale_id: sale_id.to_string(),
        movements,
        replayed,
    })
}

async fn void_steps(
    conn: &mut SqliteConnection,
    sale_id: &str,
    product_ids: &BTreeSet<String>,
    actor_id: Option<&str>,
) -> DbResult<VoidStep> {
    let balances = lock_balances(conn, product_ids).await?;

    let sale = SaleRepository::fetch_sale(conn, sale_id)
        .await?
        .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;

    let current_products: BTreeSet<String> = SaleRepository::fetch_items(conn, sale_id)
        .await?
        .into_iter()
        .map(|item| item.product_id)
        .collect();

    if &current_products != product_ids {
        return Ok(VoidStep::ProductsChanged);
    }

    let debits = MovementRepository::fetch_for_sale(conn, sale_id).await?;

    match sale.status {
        SaleStatus::Pending => {
            SaleRepository::mark_void(conn, sale_id).await?;
            Ok(VoidStep::Done(Vec::new()))
        }
        SaleStatus::Void => {
            let mut reversals = Vec::with_capacity(debits.len());
            for debit in &debits {
                let reference = Reference::reversal(&debit.id);
                if let Some(reversal) =
                    MovementRepository::fetch_by_reference(conn, &reference, &debit.product_id).await?
                {
                    reversals.push(reversal);
                }
            }
            debug!(sale_id = %sale_id, "Sale already void");
            Ok(VoidStep::Done(reversals))
        }
        SaleStatus::Completed => {
            let mut running = balances.clone();
            let mut recorded: Vec<Option<StockMovement>> = Vec::with_capacity(debits.len());
            let mut planned = Vec::new();
            let reason = format!("void sale {}", sale_id);

            for debit in &debits {
                let reference = Reference::reversal(&debit.id);
                let existing =
                    MovementRepository::fetch_by_reference(conn, &reference, &debit.product_id)
                        .await?;

                if existing.is_none() {
                    let balance = running
                        .get_mut(&debit.product_id)
                        .ok_or_else(|| CoreError::ProductNotFound(debit.product_id.clone()))?;
                    let reversal = plan_reversal(
                        debit,
                        *balance,
                        actor_id.map(str::to_string),
                        Some(reason.clone()),
                    )?;
                    *balance = reversal.new_stock;
                    planned.push(reversal);
                }
                recorded.push(existing);
            }

            let mut written = apply_planned(conn, &balances, &planned).await?.into_iter();
            let reversals = recorded
                .into_iter()
                .map(|slot| match slot {
                    Some(existing) => Ok(existing),
                    None => written
                        .next()
                        .ok_or_else(|| DbError::Internal("planned fewer reversals than debits".into())),
                })
                .collect::<DbResult<Vec<_>>>()?;

            SaleRepository::mark_void(conn, sale_id).await?;
            Ok(VoidStep::Done(reversals))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Database;
    use crate::stock::EngineConfig;
    use stockbook_core::{ErrorKind, MovementType, NewProduct};

    async fn engine_with(products: &[(&str, i64)]) -> StockEngine {
        let db = Database::in_memory().await.unwrap();
        for (id, stock) in products {
            db.products()
                .insert(&NewProduct {
                    id: id.to_string(),
                    name: format!("Product {}", id),
                    code: id.to_uppercase(),
                    initial_stock: *stock,
                    min_stock: 0,
                })
                .await
                .unwrap();
        }
        db.engine(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_multi_line_sale_is_all_or_nothing() {
        let engine = engine_with(&[("p-1", 5), ("p-2", 1)]).await;
        let items = vec![
            SaleLineItem::new("li-1", "sale-1", "p-1", 2, 100),
            SaleLineItem::new("li-2", "sale-1", "p-2", 2, 100),
        ];

        let err = engine.process_sale("sale-1", &items).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        assert_eq!(engine.current_stock("p-1").await.unwrap(), 5);
        assert_eq!(engine.current_stock("p-2").await.unwrap(), 1);
        assert_eq!(engine.database().movements().count_by_product("p-1").await.unwrap(), 0);
        assert!(engine.database().sales().get_by_id("sale-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_product_rejects_sale() {
        let engine = engine_with(&[("p-1", 5)]).await;
        let items = vec![
            SaleLineItem::new("li-1", "sale-1", "p-1", 1, 100),
            SaleLineItem::new("li-2", "sale-1", "ghost", 1, 100),
        ];

        let err = engine.process_sale("sale-1", &items).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(engine.current_stock("p-1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_void_completed_sale_restores_stock() {
        let engine = engine_with(&[("p-1", 10), ("p-2", 4)]).await;
        let items = vec![
            SaleLineItem::new("li-1", "sale-1", "p-1", 3, 100),
            SaleLineItem::new("li-2", "sale-1", "p-2", 4, 100),
            SaleLineItem::new("li-3", "sale-1", "p-1", 1, 100),
        ];
        engine.process_sale("sale-1", &items).await.unwrap();
        assert_eq!(engine.current_stock("p-1").await.unwrap(), 6);

        let reversals = engine.void_sale("sale-1", Some("manager-1")).await.unwrap();
        assert_eq!(reversals.len(), 3);
        assert!(reversals.iter().all(|m| m.movement_type == MovementType::Inbound));
        assert_eq!(reversals[0].actor_id.as_deref(), Some("manager-1"));

        assert_eq!(engine.current_stock("p-1").await.unwrap(), 10);
        assert_eq!(engine.current_stock("p-2").await.unwrap(), 4);

        let sale = engine.database().sales().get_by_id("sale-1").await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Void);

        // voiding again writes nothing and returns the same reversals
        let again = engine.void_sale("sale-1", None).await.unwrap();
        assert_eq!(
            again.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
            reversals.iter().map(|m| m.id.clone()).collect::<Vec<_>>()
        );
        assert_eq!(engine.current_stock("p-1").await.unwrap(), 10);

        // a void sale cannot be processed again
        let err = engine.process_sale("sale-1", &items).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidSaleStatus { .. })));
    }

    #[tokio::test]
    async fn test_void_skips_debits_already_reversed() {
        let engine = engine_with(&[("p-1", 10)]).await;
        let outcome = engine
            .process_sale("sale-1", &[SaleLineItem::new("li-1", "sale-1", "p-1", 3, 100)])
            .await
            .unwrap();

        let manual = engine
            .reverse_movement(&outcome.movements[0].id, None)
            .await
            .unwrap();
        let reversals = engine.void_sale("sale-1", None).await.unwrap();

        assert_eq!(reversals.len(), 1);
        assert_eq!(reversals[0].id, manual.id);
        assert_eq!(engine.current_stock("p-1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_void_pending_and_unknown_sales() {
        let engine = engine_with(&[("p-1", 10)]).await;
        engine.database().sales().create("sale-9").await.unwrap();

        assert!(engine.void_sale("sale-9", None).await.unwrap().is_empty());
        let sale = engine.database().sales().get_by_id("sale-9").await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Void);

        let err = engine.void_sale("nope", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_pending_sale_can_be_processed() {
        let engine = engine_with(&[("p-1", 10)]).await;
        engine.database().sales().create("sale-1").await.unwrap();

        let outcome = engine
            .process_sale("sale-1", &[SaleLineItem::new("li-1", "sale-1", "p-1", 2, 100)])
            .await
            .unwrap();
        assert_eq!(outcome.replayed, 0);

        let sale = engine.database().sales().get_by_id("sale-1").await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
        assert!(sale.completed_at.is_some());
    }
}
