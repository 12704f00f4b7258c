//! # stockbook-core: Pure Ledger Logic
//!
//! Domain types and the arithmetic of the stock ledger, with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockbook Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │      Checkout (PDV)            Inventory UI / Reports           │   │
//! │  │   process_sale(...)      adjust / reverse / history / check     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            stockbook-db: StockEngine (locks + SQLite)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ asks what to write                     │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockbook-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  ledger   │  │ validation│  │   error   │  │   │
//! │  │   │  Product  │  │ plan_sale │  │  requests │  │ CoreError │  │   │
//! │  │   │ Movement  │  │ reconcile │  │  policy   │  │ ErrorKind │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO LOCKS • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, StockMovement, Sale, ...)
//! - [`ledger`] - Movement planning and reconciliation
//! - [`validation`] - Request validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use stockbook_core::ledger::plan_sale;
//! use stockbook_core::SaleLineItem;
//!
//! let stock = BTreeMap::from([("p-1".to_string(), 100)]);
//! let items = [SaleLineItem::new("li-1", "sale-1", "p-1", 3, 450)];
//!
//! let planned = plan_sale(&items, &stock).unwrap();
//! assert_eq!(planned[0].delta, -3);
//! assert_eq!(planned[0].new_stock, 97);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use ledger::{Divergence, PlannedMovement};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items in a single sale.
pub const MAX_SALE_LINES: usize = 100;

/// Maximum quantity of a single sale line.
///
/// ## Business Reason
/// Catches keying mistakes (1000 instead of 10) before they hit stock.
pub const MAX_LINE_QUANTITY: i64 = 999;

/// Maximum length of any identifier accepted by the engine.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Maximum length of an adjustment reason.
pub const MAX_REASON_LEN: usize = 500;

/// Default number of movements per history page.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 100;
