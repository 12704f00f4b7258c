//! # Stock Engine
//!
//! The only writer of `products.stock_quantity` and `stock_movements`.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         StockEngine write path                          │
//! │                                                                         │
//! │  request ──► validate (stockbook-core, no locks)                       │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │          ProductLocks::acquire(sorted ids, lock_timeout)               │
//! │                 │              (no pool connection held yet)            │
//! │                 ▼                                                       │
//! │          pool.begin()                                                   │
//! │          ├── lock_row(p) for each product   ← SQLite write lock        │
//! │          ├── idempotency lookups            ← replay short-circuit     │
//! │          ├── ledger::plan_*()               ← pure arithmetic          │
//! │          ├── MovementRepository::append()                              │
//! │          └── ProductRepository::set_stock() (compare-and-set)          │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │          commit ──► drop locks                                          │
//! │                                                                         │
//! │  Any error before commit drops the transaction: nothing is written.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//! - [`coordinator`] - Sales: `process_sale`, `void_sale`
//! - [`adjustment`] - Manual corrections and reversals
//! - [`consistency`] - Ledger vs aggregate checks

pub mod adjustment;
pub mod consistency;
pub mod coordinator;

pub use consistency::ConsistencyReport;

use std::collections::BTreeMap;
use std::time::Duration;

use sqlx::{Sqlite, SqliteConnection, Transaction};
use stockbook_core::{HistoryRange, PlannedMovement, StockMovement, StockPolicy, DEFAULT_HISTORY_PAGE_SIZE};
use tracing::{instrument, warn};

use crate::error::{DbError, DbResult};
use crate::locks::ProductLocks;
use crate::pool::Database;
use crate::repository::{MovementHistory, MovementRepository, ProductRepository};

/// Engine settings.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Bounded wait for all product locks of one request.
    pub lock_timeout: Duration,

    /// Negative stock override rules.
    pub policy: StockPolicy,

    /// Page size used when a history request leaves it at zero.
    pub history_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            lock_timeout: Duration::from_secs(5),
            policy: StockPolicy::default(),
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }
}

/// Stock engine handle.
///
/// Clones share the database pool and the product lock registry, so one
/// engine per process serializes writers per product while unrelated
/// products proceed in parallel.
#[derive(Debug, Clone)]
pub struct StockEngine {
    db: Database,
    locks: ProductLocks,
    config: EngineConfig,
}

impl StockEngine {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        StockEngine {
            db,
            locks: ProductLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The engine's product lock registry.
    ///
    /// Holding a lock set from outside pauses every writer of those
    /// products, e.g. while shelves are being counted.
    pub fn locks(&self) -> &ProductLocks {
        &self.locks
    }

    /// Current stock of a product (snapshot).
    pub async fn current_stock(&self, product_id: &str) -> DbResult<i64> {
        self.db.products().current(product_id).await
    }

    /// Opens a history cursor over a product's ledger.
    ///
    /// ## Errors
    /// - `NotFound` if the product does not exist
    #[instrument(skip_all, fields(product_id = %product_id))]
    pub async fn stock_history(
        &self,
        product_id: &str,
        mut range: HistoryRange,
    ) -> DbResult<MovementHistory> {
        // existence check; the cursor itself is lazy
        self.db.products().current(product_id).await?;

        if range.page_size == 0 {
            range.page_size = self.config.history_page_size;
        }

        Ok(self.db.movements().list_by_product(product_id, range))
    }
}

// =============================================================================
// Shared transaction steps
// =============================================================================

/// Commits on success, rolls back on error.
pub(crate) async fn finish_tx<T>(tx: Transaction<'_, Sqlite>, result: DbResult<T>) -> DbResult<T> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Locks the rows of `product_ids` inside the transaction and returns their
/// balances. Must run before any other statement of the transaction.
pub(crate) async fn lock_balances<'a, I>(
    conn: &mut SqliteConnection,
    product_ids: I,
) -> DbResult<BTreeMap<String, i64>>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut balances = BTreeMap::new();
    for product_id in product_ids {
        let product = ProductRepository::lock_row(conn, product_id).await?;
        balances.insert(product.id, product.stock_quantity);
    }
    Ok(balances)
}

/// Appends planned movements and writes the resulting aggregates.
///
/// `balances` holds the balances read under lock; each product's aggregate
/// is moved from that value to its last planned `new_stock`.
pub(crate) async fn apply_planned(
    conn: &mut SqliteConnection,
    balances: &BTreeMap<String, i64>,
    planned: &[PlannedMovement],
) -> DbResult<Vec<StockMovement>> {
    let mut written = Vec::with_capacity(planned.len());
    let mut finals: BTreeMap<&str, i64> = BTreeMap::new();

    for movement in planned {
        written.push(MovementRepository::append(conn, movement).await?);
        finals.insert(movement.product_id.as_str(), movement.new_stock);
    }

    for (product_id, new_stock) in finals {
        let previous = *balances.get(product_id).ok_or_else(|| {
            DbError::Internal(format!("product {} was planned but not locked", product_id))
        })?;
        ProductRepository::set_stock(conn, product_id, previous, new_stock).await?;
    }

    Ok(written)
}
