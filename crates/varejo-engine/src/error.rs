//! # Engine Error Types
//!
//! The full error taxonomy of the transaction coordinators.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Detected BEFORE any mutation (no compensation ever needed)            │
//! │  ├── Core(InvalidCart)         malformed cart input                    │
//! │  ├── Core(PaymentMismatch)     payments don't settle the total         │
//! │  ├── NoOpenRegister            no register session supplied/found      │
//! │  ├── SessionClosed             session no longer accepts movements     │
//! │  ├── RegisterAlreadyOpen       operator already has an open session    │
//! │  ├── InvalidStateTransition    e.g. cancel on a non-completed sale     │
//! │  └── *NotFound                 lookup failures                         │
//! │                                                                         │
//! │  Mid-saga (compensation already ran before this is returned)           │
//! │  ├── InsufficientStock         floor violation - full rollback done    │
//! │  └── StorageUnavailable        transient errors exhausted retries      │
//! │                                                                         │
//! │  Special                                                                │
//! │  ├── AlreadyCancelled          idempotent no-op, benign for callers    │
//! │  └── ReversalIncomplete        sale intentionally left completed;      │
//! │                                caller must retry cancel                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use varejo_core::{CoreError, SaleStatus};
use varejo_db::DbError;

/// Errors returned by the transaction coordinators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pure business-rule violation (invalid cart, payment mismatch).
    /// Detected before any persistence.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A stock decrement would drive the on-hand quantity below zero.
    ///
    /// When returned from finalization, the whole sale has been rolled back:
    /// no sale, no items, no net stock effect, no cash movement.
    #[error(
        "Insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    /// Finalization was called without an (existing) register session.
    #[error("No open register session")]
    NoOpenRegister,

    /// The register session no longer accepts writes.
    #[error("Register session {session_id} is closed")]
    SessionClosed { session_id: String },

    /// The operator already has an open session.
    #[error("Operator {operator_id} already has an open register session")]
    RegisterAlreadyOpen { operator_id: String },

    /// The sale is not in a state that allows the requested operation.
    #[error("Sale {sale_id} is {status:?}, cannot perform operation")]
    InvalidStateTransition { sale_id: String, status: SaleStatus },

    /// The sale was already cancelled. Idempotent no-op: stock and cash were
    /// NOT touched again. Callers treat this as success.
    #[error("Sale {sale_id} is already cancelled")]
    AlreadyCancelled { sale_id: String },

    /// Cancellation failed partway after bounded retries. The sale remains
    /// `completed`; already-committed restorations are NOT undone and will
    /// be deduplicated when the caller retries `cancel`.
    #[error("Reversal of sale {sale_id} is incomplete: {detail}")]
    ReversalIncomplete { sale_id: String, detail: String },

    /// A transient storage failure persisted through all retry attempts.
    #[error("Storage unavailable: {source}")]
    StorageUnavailable { source: DbError },

    /// Sale lookup failed.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Product lookup failed.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Register session lookup failed.
    #[error("Register session not found: {0}")]
    SessionNotFound(String),

    /// Non-transient database failure.
    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } if entity == "Product" => {
                EngineError::ProductNotFound(id)
            }
            DbError::NotFound { entity, id } if entity == "Sale" => EngineError::SaleNotFound(id),
            DbError::NotFound { entity, id } if entity == "CashRegisterSession" => {
                EngineError::SessionNotFound(id)
            }
            other => EngineError::Db(other),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let err: EngineError = DbError::not_found("Product", "p1").into();
        assert!(matches!(err, EngineError::ProductNotFound(id) if id == "p1"));

        let err: EngineError = DbError::not_found("Sale", "s1").into();
        assert!(matches!(err, EngineError::SaleNotFound(id) if id == "s1"));

        let err: EngineError = DbError::PoolExhausted.into();
        assert!(matches!(err, EngineError::Db(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::InsufficientStock {
            product_id: "p1".to_string(),
            requested: 5,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product p1: available 3, requested 5"
        );
    }
}
