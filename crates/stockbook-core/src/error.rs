//! # Error Types
//!
//! Domain-specific error types for stockbook-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockbook-core errors (this file)                                     │
//! │  ├── CoreError        - Ledger rule violations                         │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── ErrorKind        - Caller-facing classification                   │
//! │                                                                         │
//! │  stockbook-db errors (separate crate)                                  │
//! │  └── DbError          - Storage, lock timeouts, duplicate operations   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller (by ErrorKind)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Error Kind
// =============================================================================

/// Caller-facing classification of every failure the stock engine can report.
///
/// The checkout and inventory UIs switch on this instead of matching the
/// concrete error enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed input, or an operation the current state forbids.
    Validation,
    /// Unknown product, sale or movement.
    NotFound,
    /// Not enough stock to apply the requested debit.
    InsufficientStock,
    /// A product lock could not be acquired in time. Safe to retry.
    LockTimeout,
    /// Idempotency replay. Resolved locally, never surfaced to end users.
    DuplicateOperation,
    /// Aggregate and ledger disagree.
    Divergence,
    /// Infrastructure failure; the enclosing transaction was aborted.
    Storage,
}

// =============================================================================
// Core Error
// =============================================================================

/// Ledger rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Sale cannot be found.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Stock movement cannot be found.
    #[error("Stock movement not found: {0}")]
    MovementNotFound(String),

    /// Insufficient stock to apply a debit.
    ///
    /// ## User Workflow
    /// ```text
    /// Sale line: product P, qty 5
    ///      │
    ///      ▼
    /// Locked stock for P: 3
    ///      │
    ///      ▼
    /// InsufficientStock { product_id: "P", requested: 5, available: 3 }
    ///      │
    ///      ▼
    /// Whole sale rejected, nothing debited
    /// ```
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    /// Sale is not in a state that allows the requested operation.
    #[error("Sale {sale_id} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: String,
    },

    /// Attempt to reverse a movement that is itself a reversal.
    #[error("Movement {movement_id} is a reversal and cannot be reversed")]
    ReversalChain { movement_id: String },

    /// Stock aggregate disagrees with the ledger.
    #[error("Stock divergence for {product_id}: ledger expects {expected}, aggregate holds {actual}")]
    Divergence {
        product_id: String,
        expected: i64,
        actual: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Classifies this error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ProductNotFound(_)
            | CoreError::SaleNotFound(_)
            | CoreError::MovementNotFound(_) => ErrorKind::NotFound,
            CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CoreError::Divergence { .. } => ErrorKind::Divergence,
            CoreError::InvalidSaleStatus { .. }
            | CoreError::ReversalChain { .. }
            | CoreError::Validation(_) => ErrorKind::Validation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any lock is taken or any row is read.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., whitespace in an identifier).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value within one request (e.g., repeated line item id).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// The request asks for something the active policy forbids.
    #[error("{field} not permitted: {reason}")]
    NotPermitted { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
