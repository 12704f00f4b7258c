//! # Consistency Checker
//!
//! Recomputes `initial_stock + Σ delta` per product and compares it with
//! the stored aggregate. Read-only: divergences are reported and logged,
//! never corrected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockbook_core::ledger::reconcile;
use stockbook_core::{CoreError, CoreResult, Divergence};
use tracing::{info, instrument, warn};

use super::StockEngine;
use crate::error::DbResult;

/// Result of a consistency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Number of products checked.
    pub checked: usize,
    pub divergences: Vec<Divergence>,
    pub checked_at: DateTime<Utc>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.divergences.is_empty()
    }

    /// Fails with the first divergence, if any.
    pub fn ensure_consistent(&self) -> CoreResult<()> {
        match self.divergences.first() {
            Some(divergence) => Err(CoreError::from(divergence.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerBalance {
    id: String,
    initial_stock: i64,
    stock_quantity: i64,
    ledger_sum: i64,
}

impl StockEngine {
    /// Checks one product, or every product when `product_id` is `None`.
    ///
    /// ## Errors
    /// - `NotFound` if `product_id` names an unknown product
    #[instrument(skip_all, fields(product_id = ?product_id))]
    pub async fn check_consistency(&self, product_id: Option<&str>) -> DbResult<ConsistencyReport> {
        // One statement, so each row is read from a single snapshot.
        let rows = sqlx::query_as::<_, LedgerBalance>(
            r#"
            SELECT
                p.id,
                p.initial_stock,
                p.stock_quantity,
                COALESCE(
                    (SELECT SUM(m.delta) FROM stock_movements m WHERE m.product_id = p.id),
                    0
                ) AS ledger_sum
            FROM products p
            WHERE ?1 IS NULL OR p.id = ?1
            ORDER BY p.id
            "#,
        )
        .bind(product_id)
        .fetch_all(self.db.pool())
        .await?;

        if let Some(id) = product_id {
            if rows.is_empty() {
                return Err(CoreError::ProductNotFound(id.to_string()).into());
            }
        }

        let divergences: Vec<Divergence> = rows
            .iter()
            .filter_map(|row| {
                reconcile(&row.id, row.initial_stock, row.ledger_sum, row.stock_quantity)
            })
            .collect();

        for divergence in &divergences {
            warn!(
                product_id = %divergence.product_id,
                expected = divergence.expected,
                actual = divergence.actual,
                drift = divergence.drift(),
                "Stock aggregate diverges from ledger"
            );
        }

        let report = ConsistencyReport {
            checked: rows.len(),
            divergences,
            checked_at: Utc::now(),
        };

        info!(
            checked = report.checked,
            divergent = report.divergences.len(),
            "Consistency check finished"
        );

        Ok(report)
    }
}
