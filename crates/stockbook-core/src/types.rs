//! # Domain Types
//!
//! Core domain types of the stock ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌─────────────────┐      │
//! │  │    Product      │   │  StockMovement   │   │      Sale       │      │
//! │  │  ─────────────  │   │  ──────────────  │   │  ─────────────  │      │
//! │  │  id             │◄──│  product_id      │   │  id             │      │
//! │  │  code           │   │  movement_type   │   │  status         │      │
//! │  │  stock_quantity │   │  delta (signed)  │   │  line items ────┼──┐   │
//! │  │  initial_stock  │   │  reference ──────┼───┼─────────────────┼──┘   │
//! │  └─────────────────┘   └──────────────────┘   └─────────────────┘      │
//! │                                                                         │
//! │  stock_quantity == initial_stock + Σ delta   (always)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Movement Type
// =============================================================================

/// Kind of stock change a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Stock enters (receiving, reversal of a debit).
    Inbound,
    /// Stock leaves (sale, shrinkage, reversal of a credit).
    Outbound,
    /// Absolute correction to a counted value.
    Adjustment,
}

impl MovementType {
    /// Picks the type a derived movement carries from the sign of its delta.
    pub fn for_delta(delta: i64) -> Self {
        match delta.signum() {
            1 => MovementType::Inbound,
            -1 => MovementType::Outbound,
            _ => MovementType::Adjustment,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "inbound",
            MovementType::Outbound => "outbound",
            MovementType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inbound" | "in" => Ok(MovementType::Inbound),
            "outbound" | "out" => Ok(MovementType::Outbound),
            "adjustment" | "set" => Ok(MovementType::Adjustment),
            other => Err(ValidationError::InvalidFormat {
                field: "movement_type".to_string(),
                reason: format!("unknown movement type '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Reference
// =============================================================================

/// What caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// One processed sale line item.
    SaleLineItem,
    /// A manual stock correction.
    Adjustment,
    /// A compensating entry for an earlier movement.
    Reversal,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::SaleLineItem => "sale_line_item",
            ReferenceType::Adjustment => "adjustment",
            ReferenceType::Reversal => "reversal",
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key of a movement.
///
/// Together with the product id, a reference identifies at most one ledger
/// entry; the `stock_movements` table enforces that with a UNIQUE index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Reference {
    pub reference_type: ReferenceType,
    pub reference_id: String,
}

impl Reference {
    pub fn sale_line_item(line_item_id: impl Into<String>) -> Self {
        Reference {
            reference_type: ReferenceType::SaleLineItem,
            reference_id: line_item_id.into(),
        }
    }

    pub fn adjustment(key: impl Into<String>) -> Self {
        Reference {
            reference_type: ReferenceType::Adjustment,
            reference_id: key.into(),
        }
    }

    pub fn reversal(movement_id: impl Into<String>) -> Self {
        Reference {
            reference_type: ReferenceType::Reversal,
            reference_id: movement_id.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.reference_id)
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog product as seen by the stock engine.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Unique business code (SKU / barcode).
    pub code: String,

    /// Current stock (the aggregate). Written only by the stock engine.
    pub stock_quantity: i64,

    /// Opening balance the ledger is summed against. Never changes.
    pub initial_stock: i64,

    /// Reorder threshold.
    pub min_stock: i64,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    /// Row version, bumped every time the engine locks the row.
    pub version: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Checks if the product is at or below its reorder threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.min_stock
    }
}

/// Catalog data for creating a product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewProduct {
    pub id: String,
    pub name: String,
    pub code: String,
    pub initial_stock: i64,
    pub min_stock: i64,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Storage order. Per product, ascending `seq` is the order in which
    /// movements were applied.
    pub seq: i64,

    pub product_id: String,

    pub movement_type: MovementType,

    /// Signed change applied to `stock_quantity`.
    pub delta: i64,

    /// Stock right before this movement.
    pub previous_stock: i64,

    /// Stock right after this movement.
    pub new_stock: i64,

    pub reference_type: ReferenceType,

    pub reference_id: String,

    /// Movement this entry compensates, set only on reversals.
    pub reversal_of: Option<String>,

    /// Free-text note (adjustment reason, void reason).
    pub reason: Option<String>,

    pub actor_id: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn reference(&self) -> Reference {
        Reference {
            reference_type: self.reference_type,
            reference_id: self.reference_id.clone(),
        }
    }

    /// Reversals are tracked by lineage, not nesting.
    pub fn is_reversal(&self) -> bool {
        self.reversal_of.is_some() || self.reference_type == ReferenceType::Reversal
    }
}

// =============================================================================
// Sale
// =============================================================================

/// The status of a sale as far as stock is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Known but not yet debited.
    Pending,
    /// Every line item has been debited.
    Completed,
    /// Cancelled; any debits were reversed.
    Void,
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Pending
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
            SaleStatus::Void => "void",
        };
        f.write_str(s)
    }
}

/// A sale header.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub status: SaleStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A line item of a finalized sale, as submitted by the checkout flow.
///
/// `id` is the idempotency key: resubmitting the same id never debits twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleLineItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl SaleLineItem {
    pub fn new(
        id: impl Into<String>,
        sale_id: impl Into<String>,
        product_id: impl Into<String>,
        quantity: i64,
        unit_price_cents: i64,
    ) -> Self {
        SaleLineItem {
            id: id.into(),
            sale_id: sale_id.into(),
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
        }
    }

    pub fn reference(&self) -> Reference {
        Reference::sale_line_item(&self.id)
    }
}

/// Result of `process_sale`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleOutcome {
    pub sale_id: String,
    /// One movement per line item, in line item order.
    pub movements: Vec<StockMovement>,
    /// Number of line items answered from an earlier run instead of applied.
    pub replayed: usize,
}

impl SaleOutcome {
    /// True when nothing new was written.
    pub fn is_full_replay(&self) -> bool {
        self.replayed == self.movements.len()
    }
}

// =============================================================================
// Adjustments
// =============================================================================

/// A manual stock correction request from the inventory UI.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AdjustStock {
    pub product_id: String,
    pub movement_type: MovementType,
    /// Units to add/remove, or the counted absolute value for `Adjustment`.
    pub quantity: i64,
    pub reason: String,
    pub actor_id: Option<String>,
    /// Request permission to go below zero. Honoured only when the engine
    /// policy allows overrides.
    #[serde(default)]
    pub allow_negative: bool,
    /// Retry key. Reusing a key returns the movement it first produced.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl AdjustStock {
    pub fn new(
        product_id: impl Into<String>,
        movement_type: MovementType,
        quantity: i64,
        reason: impl Into<String>,
    ) -> Self {
        AdjustStock {
            product_id: product_id.into(),
            movement_type,
            quantity,
            reason: reason.into(),
            actor_id: None,
            allow_negative: false,
            idempotency_key: None,
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn allow_negative(mut self, allow: bool) -> Self {
        self.allow_negative = allow;
        self
    }
}

/// Stock rules that are configuration rather than law.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPolicy {
    /// Whether an adjustment may request a negative balance at all.
    pub allow_negative_overrides: bool,
}

// =============================================================================
// History
// =============================================================================

/// Window and page size for stock history reads.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HistoryRange {
    #[ts(as = "Option<String>")]
    pub from: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub to: Option<DateTime<Utc>>,
    pub page_size: u32,
}

impl HistoryRange {
    /// Whole history, fetched `page_size` entries at a time.
    pub fn all(page_size: u32) -> Self {
        HistoryRange {
            from: None,
            to: None,
            page_size,
        }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>, page_size: u32) -> Self {
        HistoryRange {
            from: Some(from),
            to: Some(to),
            page_size,
        }
    }
}

impl Default for HistoryRange {
    fn default() -> Self {
        HistoryRange::all(crate::DEFAULT_HISTORY_PAGE_SIZE)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_type_for_delta() {
        assert_eq!(MovementType::for_delta(3), MovementType::Inbound);
        assert_eq!(MovementType::for_delta(-3), MovementType::Outbound);
        assert_eq!(MovementType::for_delta(0), MovementType::Adjustment);
    }

    #[test]
    fn test_movement_type_parsing() {
        assert_eq!("inbound".parse::<MovementType>().unwrap(), MovementType::Inbound);
        assert_eq!("OUT".parse::<MovementType>().unwrap(), MovementType::Outbound);
        assert_eq!("set".parse::<MovementType>().unwrap(), MovementType::Adjustment);
        assert!("entrada".parse::<MovementType>().is_err());
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(
            Reference::sale_line_item("li-1").to_string(),
            "sale_line_item:li-1"
        );
        assert_eq!(Reference::reversal("m-9").to_string(), "reversal:m-9");
    }

    #[test]
    fn test_sale_status_default() {
        assert_eq!(SaleStatus::default(), SaleStatus::Pending);
        assert_eq!(SaleStatus::Void.to_string(), "void");
    }

    #[test]
    fn test_adjust_stock_builder() {
        let req = AdjustStock::new("p-1", MovementType::Inbound, 12, "delivery")
            .actor("clerk-7")
            .idempotency_key("po-88");
        assert_eq!(req.actor_id.as_deref(), Some("clerk-7"));
        assert_eq!(req.idempotency_key.as_deref(), Some("po-88"));
        assert!(!req.allow_negative);
    }

    #[test]
    fn test_adjust_stock_deserializes_with_defaults() {
        let req: AdjustStock = serde_json::from_str(
            r#"{"product_id":"p","movement_type":"outbound","quantity":2,"reason":"broken","actor_id":null}"#,
        )
        .unwrap();
        assert_eq!(req.movement_type, MovementType::Outbound);
        assert!(!req.allow_negative);
        assert!(req.idempotency_key.is_none());
    }
}
