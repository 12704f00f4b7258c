//! # Validation Module
//!
//! Input validation for stock engine requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (before any lock is taken)                       │
//! │  ├── Shape checks: ids, quantities, reasons                            │
//! │  └── Request consistency: sale ids, duplicate line items               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: ledger rules (under lock, see `ledger`)                      │
//! │  ├── Availability / non-negative stock                                 │
//! │  └── Reversal lineage                                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (new_stock = previous_stock + delta)                        │
//! │  ├── UNIQUE (reference_type, reference_id, product_id)                 │
//! │  └── Append-only triggers on stock_movements                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{AdjustStock, MovementType, SaleLineItem, StockPolicy};
use crate::{MAX_IDENTIFIER_LEN, MAX_LINE_QUANTITY, MAX_REASON_LEN, MAX_SALE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an identifier (product, sale, line item, movement, key).
///
/// ## Rules
/// - Must not be empty
/// - At most `MAX_IDENTIFIER_LEN` characters
/// - No whitespace
pub fn validate_identifier(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    if id.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a product code.
///
/// ## Example
/// ```rust
/// use stockbook_core::validation::validate_product_code;
///
/// assert!(validate_product_code("COKE-330").is_ok());
/// assert!(validate_product_code("").is_err());
/// assert!(validate_product_code("has space").is_err());
/// ```
pub fn validate_product_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: 50,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a product name.
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates the audit reason of a manual adjustment.
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    if reason.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    if reason.len() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a sale line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a unit price in cents. Zero is allowed (free items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "unit_price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates an opening stock balance.
pub fn validate_initial_stock(stock: i64) -> ValidationResult<()> {
    if stock < 0 {
        return Err(ValidationError::OutOfRange {
            field: "initial_stock".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

// =============================================================================
// Request Validators
// =============================================================================

/// Validates the line items of a sale before anything is locked.
///
/// ## Rules
/// - At least one and at most `MAX_SALE_LINES` line items
/// - Every line item belongs to `sale_id`
/// - Line item ids are unique within the request
/// - Quantities and prices are valid
pub fn validate_sale_request(sale_id: &str, line_items: &[SaleLineItem]) -> ValidationResult<()> {
    validate_identifier("sale_id", sale_id)?;

    if line_items.is_empty() {
        return Err(ValidationError::Required {
            field: "line_items".to_string(),
        });
    }

    if line_items.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "line_items".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }

    let mut seen = HashSet::with_capacity(line_items.len());
    for item in line_items {
        validate_identifier("line_item_id", &item.id)?;
        validate_identifier("product_id", &item.product_id)?;

        if item.sale_id != sale_id {
            return Err(ValidationError::InvalidFormat {
                field: "line_item.sale_id".to_string(),
                reason: format!("line item {} belongs to sale {}", item.id, item.sale_id),
            });
        }

        if !seen.insert(item.id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "line_item_id".to_string(),
                value: item.id.clone(),
            });
        }

        validate_quantity(item.quantity)?;
        validate_price_cents(item.unit_price_cents)?;
    }

    Ok(())
}

/// Validates a manual adjustment against the active policy.
///
/// ## Rules
/// - `inbound`/`outbound`: quantity > 0
/// - `adjustment`: quantity is the target value; >= 0 unless a negative
///   override is both requested and permitted
/// - `allow_negative` requires `policy.allow_negative_overrides`
pub fn validate_adjustment(req: &AdjustStock, policy: StockPolicy) -> ValidationResult<()> {
    validate_identifier("product_id", &req.product_id)?;
    validate_reason(&req.reason)?;

    if let Some(key) = &req.idempotency_key {
        validate_identifier("idempotency_key", key)?;
    }

    if req.allow_negative && !policy.allow_negative_overrides {
        return Err(ValidationError::NotPermitted {
            field: "allow_negative".to_string(),
            reason: "negative stock overrides are disabled".to_string(),
        });
    }

    match req.movement_type {
        MovementType::Inbound | MovementType::Outbound => {
            if req.quantity <= 0 {
                return Err(ValidationError::MustBePositive {
                    field: "quantity".to_string(),
                });
            }
        }
        MovementType::Adjustment => {
            if req.quantity < 0 && !req.allow_negative {
                return Err(ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: 0,
                    max: i64::MAX,
                });
            }
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, product: &str, qty: i64) -> SaleLineItem {
        SaleLineItem::new(id, "sale-1", product, qty, 250)
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("id", "p-1").is_ok());
        assert!(validate_identifier("id", "").is_err());
        assert!(validate_identifier("id", "a b").is_err());
        assert!(validate_identifier("id", &"x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_product_code() {
        assert!(validate_product_code("COKE-330").is_ok());
        assert!(validate_product_code("product_1").is_ok());
        assert!(validate_product_code("   ").is_err());
        assert!(validate_product_code("bad/code").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_sale_request() {
        assert!(validate_sale_request("sale-1", &[line("a", "p-1", 1), line("b", "p-1", 2)]).is_ok());
        assert!(validate_sale_request("sale-1", &[]).is_err());

        let dup = validate_sale_request("sale-1", &[line("a", "p-1", 1), line("a", "p-2", 1)]);
        assert!(matches!(dup, Err(ValidationError::Duplicate { .. })));

        let foreign = SaleLineItem::new("x", "sale-2", "p-1", 1, 0);
        assert!(validate_sale_request("sale-1", &[foreign]).is_err());

        let negative_price = SaleLineItem::new("x", "sale-1", "p-1", 1, -5);
        assert!(validate_sale_request("sale-1", &[negative_price]).is_err());
    }

    #[test]
    fn test_validate_adjustment() {
        let policy = StockPolicy::default();

        let inbound = AdjustStock::new("p-1", MovementType::Inbound, 5, "delivery");
        assert!(validate_adjustment(&inbound, policy).is_ok());

        let zero_inbound = AdjustStock::new("p-1", MovementType::Inbound, 0, "delivery");
        assert!(validate_adjustment(&zero_inbound, policy).is_err());

        let absolute_zero = AdjustStock::new("p-1", MovementType::Adjustment, 0, "count");
        assert!(validate_adjustment(&absolute_zero, policy).is_ok());

        let no_reason = AdjustStock::new("p-1", MovementType::Inbound, 5, "  ");
        assert!(validate_adjustment(&no_reason, policy).is_err());
    }

    #[test]
    fn test_negative_override_requires_policy() {
        let req = AdjustStock::new("p-1", MovementType::Adjustment, -2, "backorder")
            .allow_negative(true);

        let strict = StockPolicy::default();
        assert!(matches!(
            validate_adjustment(&req, strict),
            Err(ValidationError::NotPermitted { .. })
        ));

        let lenient = StockPolicy {
            allow_negative_overrides: true,
        };
        assert!(validate_adjustment(&req, lenient).is_ok());
    }
}
