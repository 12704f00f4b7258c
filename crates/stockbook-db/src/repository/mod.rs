//! # Repository Module
//!
//! Database repositories for the stock ledger.
//!
//! ## Read vs Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Callers (CLI, checkout, reports)                                      │
//! │       │                                                                 │
//! │       │  db.products().current("p-1")       (pool, public, read-only)  │
//! │       │  db.movements().list_by_product(..)                            │
//! │       ▼                                                                 │
//! │  ProductRepository / MovementRepository / SaleRepository               │
//! │       ▲                                                                 │
//! │       │  lock_row / set_stock / append / record_sale                   │
//! │       │  (&mut SqliteConnection inside a transaction, crate-private)   │
//! │       │                                                                 │
//! │  StockEngine (holds the product locks)                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`] - Catalog rows and the stock aggregate
//! - [`MovementRepository`] - The append-only ledger and history cursor
//! - [`SaleRepository`] - Sale headers and line items

pub mod movement;
pub mod product;
pub mod sale;

pub use movement::{MovementHistory, MovementRepository};
pub use product::ProductRepository;
pub use sale::SaleRepository;
