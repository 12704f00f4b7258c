//! # stockbook-db: Ledger Store and Stock Engine
//!
//! SQLite persistence for the stock ledger and the engine that writes it.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockbook Data Flow                              │
//! │                                                                         │
//! │  Checkout (process_sale)     Inventory UI (adjust / reverse / check)   │
//! │       │                               │                                 │
//! │       ▼                               ▼                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockbook-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  StockEngine  │    │  Repositories │    │   Database   │  │   │
//! │  │   │   (stock/)    │───►│  product.rs   │───►│   (pool.rs)  │  │   │
//! │  │   │               │    │  movement.rs  │    │  migrations  │  │   │
//! │  │   │ ProductLocks  │    │  sale.rs      │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │ plans with                                         │   │
//! │  │           ▼                                                     │   │
//! │  │   stockbook-core::ledger (pure)                                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite: products · sales · sale_line_items · stock_movements  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database and engine error types
//! - [`repository`] - Products, stock movements, sales
//! - [`locks`] - Per-product lock registry
//! - [`stock`] - The stock engine
//! - [`config`] - `stockbook.toml` loading
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockbook_db::{Database, StockbookConfig};
//!
//! let config = StockbookConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let engine = db.engine(config.engine_config());
//!
//! let outcome = engine.process_sale("sale-1", &line_items).await?;
//! let report = engine.check_consistency(None).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod locks;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod stock;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, StockbookConfig};
pub use error::{DbError, DbResult};
pub use locks::ProductLocks;
pub use pool::{Database, DbConfig};
pub use stock::{ConsistencyReport, EngineConfig, StockEngine};

// Repository re-exports for convenience
pub use repository::movement::{MovementHistory, MovementRepository};
pub use repository::product::ProductRepository;
pub use repository::sale::SaleRepository;
