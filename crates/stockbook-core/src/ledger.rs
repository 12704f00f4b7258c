//! # Ledger Arithmetic
//!
//! Pure planning of stock movements. The database layer locks rows, reads
//! the current balances, asks this module what to write, and writes exactly
//! that.
//!
//! ## Planning Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Sale (locked balances)          Adjustment / Reversal (locked balance) │
//! │        │                                   │                            │
//! │        ▼                                   ▼                            │
//! │  plan_sale()                       plan_adjustment() / plan_reversal()  │
//! │  ├── total requested per product   ├── delta from type / original       │
//! │  ├── all-or-nothing availability   ├── non-negative rule                │
//! │  └── running previous/new stock    └── reversal lineage rule            │
//! │        │                                   │                            │
//! │        └──────────────► PlannedMovement ◄──┘                            │
//! │                               │                                         │
//! │                               ▼                                         │
//! │                 stockbook-db appends + applies it                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{AdjustStock, MovementType, Reference, SaleLineItem, StockMovement, StockPolicy};

// =============================================================================
// Planned Movement
// =============================================================================

/// A ledger entry that has been computed but not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMovement {
    pub product_id: String,
    pub movement_type: MovementType,
    pub delta: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reference: Reference,
    pub reversal_of: Option<String>,
    pub reason: Option<String>,
    pub actor_id: Option<String>,
}

fn checked_balance(product_id: &str, current: i64, delta: i64) -> CoreResult<i64> {
    current.checked_add(delta).ok_or_else(|| {
        CoreError::Validation(ValidationError::OutOfRange {
            field: format!("stock of {}", product_id),
            min: i64::MIN,
            max: i64::MAX,
        })
    })
}

// =============================================================================
// Sales
// =============================================================================

/// Plans the outbound movements of a sale.
///
/// `stock` holds the locked balance of every product the line items touch.
/// Availability is checked per product against the sum of its line items,
/// so a sale listing the same product twice cannot overdraw it. Any shortfall
/// fails the whole sale.
pub fn plan_sale(
    line_items: &[SaleLineItem],
    stock: &BTreeMap<String, i64>,
) -> CoreResult<Vec<PlannedMovement>> {
    let mut requested: BTreeMap<&str, i64> = BTreeMap::new();
    for item in line_items {
        *requested.entry(item.product_id.as_str()).or_insert(0) += item.quantity;
    }

    for (product_id, total) in &requested {
        let available = *stock
            .get(*product_id)
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

        if *total > available {
            return Err(CoreError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: *total,
                available,
            });
        }
    }

    let mut running = stock.clone();
    let mut planned = Vec::with_capacity(line_items.len());

    for item in line_items {
        let balance = running
            .get_mut(&item.product_id)
            .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;

        let previous_stock = *balance;
        let new_stock = checked_balance(&item.product_id, previous_stock, -item.quantity)?;
        *balance = new_stock;

        planned.push(PlannedMovement {
            product_id: item.product_id.clone(),
            movement_type: MovementType::Outbound,
            delta: -item.quantity,
            previous_stock,
            new_stock,
            reference: item.reference(),
            reversal_of: None,
            reason: None,
            actor_id: None,
        });
    }

    Ok(planned)
}

// =============================================================================
// Adjustments
// =============================================================================

/// Plans a manual adjustment against the locked balance `current`.
///
/// ## Deltas
/// - `Inbound`:    `+quantity`
/// - `Outbound`:   `-quantity`
/// - `Adjustment`: `quantity - current` (quantity is the counted value)
pub fn plan_adjustment(
    req: &AdjustStock,
    reference: Reference,
    current: i64,
    policy: StockPolicy,
) -> CoreResult<PlannedMovement> {
    let delta = match req.movement_type {
        MovementType::Inbound => req.quantity,
        MovementType::Outbound => -req.quantity,
        MovementType::Adjustment => checked_balance(&req.product_id, req.quantity, -current)?,
    };

    let new_stock = checked_balance(&req.product_id, current, delta)?;
    let negative_authorized = req.allow_negative && policy.allow_negative_overrides;

    if new_stock < 0 && !negative_authorized {
        return Err(CoreError::InsufficientStock {
            product_id: req.product_id.clone(),
            requested: -delta,
            available: current,
        });
    }

    Ok(PlannedMovement {
        product_id: req.product_id.clone(),
        movement_type: req.movement_type,
        delta,
        previous_stock: current,
        new_stock,
        reference,
        reversal_of: None,
        reason: Some(req.reason.trim().to_string()),
        actor_id: req.actor_id.clone(),
    })
}

// =============================================================================
// Reversals
// =============================================================================

/// Plans the compensating entry for `original`.
///
/// The reversal carries `-original.delta`, so its type follows the sign:
/// reversing a sale debit is inbound, reversing a receipt is outbound.
/// Reversals themselves cannot be reversed.
pub fn plan_reversal(
    original: &StockMovement,
    current: i64,
    actor_id: Option<String>,
    reason: Option<String>,
) -> CoreResult<PlannedMovement> {
    if original.is_reversal() {
        return Err(CoreError::ReversalChain {
            movement_id: original.id.clone(),
        });
    }

    let delta = -original.delta;
    let new_stock = checked_balance(&original.product_id, current, delta)?;

    if new_stock < 0 {
        return Err(CoreError::InsufficientStock {
            product_id: original.product_id.clone(),
            requested: -delta,
            available: current,
        });
    }

    Ok(PlannedMovement {
        product_id: original.product_id.clone(),
        movement_type: MovementType::for_delta(delta),
        delta,
        previous_stock: current,
        new_stock,
        reference: Reference::reversal(&original.id),
        reversal_of: Some(original.id.clone()),
        reason,
        actor_id,
    })
}

// =============================================================================
// Consistency
// =============================================================================

/// Mismatch between a product's aggregate and its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Divergence {
    pub product_id: String,
    /// `initial_stock + Σ delta`.
    pub expected: i64,
    /// `stock_quantity` as stored.
    pub actual: i64,
}

impl Divergence {
    /// How far the aggregate has drifted from the ledger. A sale debited
    /// four times instead of once shows up as a negative drift of three
    /// times the sold quantity.
    pub fn drift(&self) -> i64 {
        self.actual - self.expected
    }
}

impl From<Divergence> for CoreError {
    fn from(d: Divergence) -> Self {
        CoreError::Divergence {
            product_id: d.product_id,
            expected: d.expected,
            actual: d.actual,
        }
    }
}

/// Compares a stored balance against its ledger. Returns `None` when they
/// agree.
pub fn reconcile(
    product_id: &str,
    initial_stock: i64,
    ledger_sum: i64,
    actual: i64,
) -> Option<Divergence> {
    let expected = initial_stock.saturating_add(ledger_sum);
    if expected == actual {
        return None;
    }

    Some(Divergence {
        product_id: product_id.to_string(),
        expected,
        actual,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReferenceType;
    use chrono::Utc;

    fn stock(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries
            .iter()
            .map(|(id, qty)| (id.to_string(), *qty))
            .collect()
    }

    fn line(id: &str, product: &str, qty: i64) -> SaleLineItem {
        SaleLineItem::new(id, "sale-1", product, qty, 100)
    }

    fn movement(id: &str, delta: i64, reversal_of: Option<&str>) -> StockMovement {
        StockMovement {
            id: id.to_string(),
            seq: 1,
            product_id: "p-1".to_string(),
            movement_type: MovementType::for_delta(delta),
            delta,
            previous_stock: 100,
            new_stock: 100 + delta,
            reference_type: if reversal_of.is_some() {
                ReferenceType::Reversal
            } else {
                ReferenceType::SaleLineItem
            },
            reference_id: reversal_of.unwrap_or("li-1").to_string(),
            reversal_of: reversal_of.map(str::to_string),
            reason: None,
            actor_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_plan_sale_single_line() {
        let planned = plan_sale(&[line("li-1", "p-1", 3)], &stock(&[("p-1", 100)])).unwrap();

        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].movement_type, MovementType::Outbound);
        assert_eq!(planned[0].delta, -3);
        assert_eq!(planned[0].previous_stock, 100);
        assert_eq!(planned[0].new_stock, 97);
        assert_eq!(planned[0].reference, Reference::sale_line_item("li-1"));
    }

    #[test]
    fn test_plan_sale_debits_exactly_the_quantity_sold() {
        let planned = plan_sale(&[line("li-1", "p-1", 4)], &stock(&[("p-1", 16)])).unwrap();
        assert_eq!(planned[0].new_stock, 12);
    }

    #[test]
    fn test_plan_sale_runs_balances_for_repeated_product() {
        let items = [line("a", "p-1", 2), line("b", "p-2", 1), line("c", "p-1", 3)];
        let planned = plan_sale(&items, &stock(&[("p-1", 5), ("p-2", 1)])).unwrap();

        assert_eq!(planned[0].previous_stock, 5);
        assert_eq!(planned[0].new_stock, 3);
        assert_eq!(planned[2].previous_stock, 3);
        assert_eq!(planned[2].new_stock, 0);
        assert_eq!(planned[1].new_stock, 0);
    }

    #[test]
    fn test_plan_sale_checks_total_per_product() {
        let items = [line("a", "p-1", 2), line("b", "p-1", 2)];
        let err = plan_sale(&items, &stock(&[("p-1", 3)])).unwrap_err();

        match err {
            CoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => {
                assert_eq!(product_id, "p-1");
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plan_sale_unknown_product() {
        let err = plan_sale(&[line("a", "ghost", 1)], &stock(&[])).unwrap_err();
        assert!(matches!(err, CoreError::ProductNotFound(id) if id == "ghost"));
    }

    #[test]
    fn test_plan_absolute_adjustment() {
        let req = AdjustStock::new("p-1", MovementType::Adjustment, 50, "cycle count");
        let planned =
            plan_adjustment(&req, Reference::adjustment("k"), 10, StockPolicy::default()).unwrap();

        assert_eq!(planned.delta, 40);
        assert_eq!(planned.new_stock, 50);
        assert_eq!(planned.movement_type, MovementType::Adjustment);
        assert_eq!(planned.reason.as_deref(), Some("cycle count"));
    }

    #[test]
    fn test_plan_outbound_adjustment_respects_stock() {
        let req = AdjustStock::new("p-1", MovementType::Outbound, 4, "breakage");
        let err = plan_adjustment(&req, Reference::adjustment("k"), 3, StockPolicy::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { requested: 4, available: 3, .. }));
    }

    #[test]
    fn test_plan_outbound_adjustment_with_authorized_override() {
        let policy = StockPolicy {
            allow_negative_overrides: true,
        };
        let req = AdjustStock::new("p-1", MovementType::Outbound, 4, "backorder").allow_negative(true);
        let planned = plan_adjustment(&req, Reference::adjustment("k"), 3, policy).unwrap();
        assert_eq!(planned.new_stock, -1);

        let not_requested = AdjustStock::new("p-1", MovementType::Outbound, 4, "backorder");
        assert!(plan_adjustment(&not_requested, Reference::adjustment("k"), 3, policy).is_err());
    }

    #[test]
    fn test_plan_reversal_of_sale_debit() {
        let original = movement("m-1", -3, None);
        let planned = plan_reversal(&original, 97, None, None).unwrap();

        assert_eq!(planned.delta, 3);
        assert_eq!(planned.movement_type, MovementType::Inbound);
        assert_eq!(planned.new_stock, 100);
        assert_eq!(planned.reference, Reference::reversal("m-1"));
        assert_eq!(planned.reversal_of.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_plan_reversal_rejects_chains() {
        let reversal = movement("m-2", 3, Some("m-1"));
        let err = plan_reversal(&reversal, 100, None, None).unwrap_err();
        assert!(matches!(err, CoreError::ReversalChain { movement_id } if movement_id == "m-2"));
    }

    #[test]
    fn test_plan_reversal_cannot_overdraw() {
        let receipt = movement("m-1", 10, None);
        let err = plan_reversal(&receipt, 4, None, None).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { requested: 10, available: 4, .. }));
    }

    #[test]
    fn test_reconcile() {
        assert!(reconcile("p-1", 100, -3, 97).is_none());

        let d = reconcile("p-1", 100, -3, 88).unwrap();
        assert_eq!(d.expected, 97);
        assert_eq!(d.actual, 88);
        assert_eq!(d.drift(), -9);

        let err: CoreError = d.into();
        assert_eq!(err.kind(), crate::ErrorKind::Divergence);
    }
}
