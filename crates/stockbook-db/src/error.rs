//! # Database Error Types
//!
//! Error types for the ledger store and the stock engine.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)      CoreError (ledger rules)              │
//! │       │                               │                                 │
//! │       ▼                               ▼                                 │
//! │  DbError (this module) ◄──────────────┘                                │
//! │       │   + LockTimeout, DuplicateOperation                            │
//! │       ▼                                                                 │
//! │  caller switches on DbError::kind() → ErrorKind                        │
//! │                                                                         │
//! │  DuplicateOperation never reaches callers of the engine: it is         │
//! │  resolved into the previously recorded movement.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockbook_core::{CoreError, ErrorKind, Reference, ValidationError};
use thiserror::Error;

/// Database and engine errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation outside the ledger's idempotency index.
    ///
    /// ## When This Occurs
    /// - Inserting a duplicate product code
    /// - Reusing a line item id from another sale
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A ledger entry for this reference and product already exists.
    ///
    /// Raised by `MovementRepository::append`. The engine recovers it into
    /// the existing movement; it is an idempotent replay, not a failure.
    #[error("Duplicate operation: {reference} already recorded for product {product_id}")]
    DuplicateOperation {
        reference: Reference,
        product_id: String,
    },

    /// A product lock was not acquired within the configured wait.
    #[error("Timed out after {waited_ms}ms waiting for the stock lock on product {product_id}")]
    LockTimeout { product_id: String, waited_ms: u64 },

    /// Ledger rule violation from stockbook-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Classifies this error for callers.
    ///
    /// ## Mapping
    /// ```text
    /// NotFound                          → NotFound
    /// UniqueViolation, ForeignKey       → Validation
    /// DuplicateOperation                → DuplicateOperation
    /// LockTimeout                       → LockTimeout
    /// Core(e)                           → e.kind()
    /// Connection/Query/Transaction/...  → Storage
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. } => {
                ErrorKind::Validation
            }
            DbError::DuplicateOperation { .. } => ErrorKind::DuplicateOperation,
            DbError::LockTimeout { .. } => ErrorKind::LockTimeout,
            DbError::Core(e) => e.kind(),
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::TransactionFailed(_)
            | DbError::PoolExhausted
            | DbError::Internal(_) => ErrorKind::Storage,
        }
    }

    /// True if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::LockTimeout { .. } | DbError::PoolExhausted)
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Core(CoreError::Validation(err))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// True if `err` is SQLite rejecting a write on the ledger's
/// `(reference_type, reference_id, product_id)` index.
pub(crate) fn is_ledger_reference_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message();
            msg.contains("UNIQUE constraint failed") && msg.contains("stock_movements.reference_id")
        }
        _ => false,
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================
