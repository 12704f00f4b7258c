//! # Adjustments and Reversals
//!
//! Manual stock corrections from the inventory UI, and compensating entries
//! for earlier movements. Both write through the same locked path as sales.
//!
//! ## Deltas
//! ```text
//! inbound     +quantity
//! outbound    -quantity                (non-negative unless overridden)
//! adjustment  quantity - current       (quantity is the counted value)
//! reversal    -original.delta          (type follows the sign)
//! ```

use std::iter;

use sqlx::SqliteConnection;
use stockbook_core::ledger::{plan_adjustment, plan_reversal};
use stockbook_core::validation::{validate_adjustment, validate_identifier};
use stockbook_core::{AdjustStock, CoreError, Reference, StockMovement, StockPolicy};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{apply_planned, finish_tx, lock_balances, StockEngine};
use crate::error::{DbError, DbResult};
use crate::repository::MovementRepository;

impl StockEngine {
    /// Applies a manual adjustment.
    ///
    /// The ledger reference is `("adjustment", idempotency_key)`, or a fresh
    /// UUID when the request carries no key. Resubmitting a key returns the
    /// movement it first produced.
    #[instrument(
        skip_all,
        fields(
            product_id = %req.product_id,
            movement_type = %req.movement_type,
            quantity = req.quantity
        )
    )]
    pub async fn adjust_stock(&self, req: &AdjustStock) -> DbResult<StockMovement> {
        validate_adjustment(req, self.config.policy)?;

        let reference = Reference::adjustment(
            req.idempotency_key
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        );

        let _locks = self
            .locks
            .acquire(iter::once(&req.product_id), self.config.lock_timeout)
            .await?;

        let mut tx = self.db.pool().begin().await?;
        let result = adjust_steps(&mut tx, req, &reference, self.config.policy).await;

        let (movement, replayed) = match finish_tx(tx, result).await {
            Err(DbError::DuplicateOperation { .. }) => {
                (self.recorded(&reference, &req.product_id).await?, true)
            }
            other => other?,
        };

        if replayed {
            debug!(reference = %reference, "Adjustment already applied");
        } else {
            info!(
                movement_id = %movement.id,
                delta = movement.delta,
                new_stock = movement.new_stock,
                "Stock adjusted"
            );
        }

        Ok(movement)
    }

    /// Writes the compensating entry for a movement.
    ///
    /// ## Errors
    /// - `NotFound` if the movement does not exist
    /// - `ReversalChain` if the movement is itself a reversal
    /// - `InsufficientStock` if undoing a receipt would go below zero
    #[instrument(skip_all, fields(movement_id = %movement_id))]
    pub async fn reverse_movement(
        &self,
        movement_id: &str,
        actor_id: Option<&str>,
    ) -> DbResult<StockMovement> {
        validate_identifier("movement_id", movement_id)?;

        let original = self
            .db
            .movements()
            .get_by_id(movement_id)
            .await?
            .ok_or_else(|| CoreError::MovementNotFound(movement_id.to_string()))?;

        if original.is_reversal() {
            return Err(CoreError::ReversalChain {
                movement_id: original.id,
            }
            .into());
        }

        let reference = Reference::reversal(&original.id);

        let _locks = self
            .locks
            .acquire(iter::once(&original.product_id), self.config.lock_timeout)
            .await?;

        let mut tx = self.db.pool().begin().await?;
        let result = reverse_steps(&mut tx, &original, &reference, actor_id).await;

        let (movement, replayed) = match finish_tx(tx, result).await {
            Err(DbError::DuplicateOperation { .. }) => {
                (self.recorded(&reference, &original.product_id).await?, true)
            }
            other => other?,
        };

        if replayed {
            debug!(movement_id = %movement_id, "Movement already reversed");
        } else {
            info!(
                reversal_id = %movement.id,
                delta = movement.delta,
                new_stock = movement.new_stock,
                "Movement reversed"
            );
        }

        Ok(movement)
    }

    /// Entry a duplicate reference points at, read after the failed attempt
    /// was rolled back.
    async fn recorded(&self, reference: &Reference, product_id: &str) -> DbResult<StockMovement> {
        self.db
            .movements()
            .find_by_reference(reference, product_id)
            .await?
            .ok_or_else(|| {
                DbError::Internal(format!(
                    "duplicate reported for {} on {} but no entry found",
                    reference, product_id
                ))
            })
    }
}

// =============================================================================
// Transaction bodies
// =============================================================================

/// Returns the movement and whether it was already recorded.
async fn adjust_steps(
    conn: &mut SqliteConnection,
    req: &AdjustStock,
    reference: &Reference,
    policy: StockPolicy,
) -> DbResult<(StockMovement, bool)> {
    let balances = lock_balances(conn, iter::once(&req.product_id)).await?;

    if let Some(existing) =
        MovementRepository::fetch_by_reference(conn, reference, &req.product_id).await?
    {
        return Ok((existing, true));
    }

    let current = balances
        .get(&req.product_id)
        .copied()
        .ok_or_else(|| CoreError::ProductNotFound(req.product_id.clone()))?;

    let planned = plan_adjustment(req, reference.clone(), current, policy)?;
    let movement = apply_planned(conn, &balances, std::slice::from_ref(&planned))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DbError::Internal("adjustment produced no movement".into()))?;

    Ok((movement, false))
}

async fn reverse_steps(
    conn: &mut SqliteConnection,
    original: &StockMovement,
    reference: &Reference,
    actor_id: Option<&str>,
) -> DbResult<(StockMovement, bool)> {
    let balances = lock_balances(conn, iter::once(&original.product_id)).await?;

    if let Some(existing) =
        MovementRepository::fetch_by_reference(conn, reference, &original.product_id).await?
    {
        return Ok((existing, true));
    }

    let current = balances
        .get(&original.product_id)
        .copied()
        .ok_or_else(|| CoreError::ProductNotFound(original.product_id.clone()))?;

    let planned = plan_reversal(original, current, actor_id.map(str::to_string), None)?;
    let movement = apply_planned(conn, &balances, std::slice::from_ref(&planned))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DbError::Internal("reversal produced no movement".into()))?;

    Ok((movement, false))
}
