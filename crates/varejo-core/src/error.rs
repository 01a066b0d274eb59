//! # Error Types
//!
//! Domain-specific error types for varejo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  varejo-core errors (this file)                                        │
//! │  ├── CoreError        - Business-rule violations (pure, pre-persist)   │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  varejo-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  varejo-engine errors (separate crate)                                 │
//! │  └── EngineError      - Full transaction taxonomy                      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (ids, amounts)
//! 3. Errors are enum variants, never String
//! 4. Core errors are detected BEFORE any persistence happens

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Pure business-rule violations.
///
/// Every variant here is detected before any state is mutated, so none of
/// them ever requires compensation downstream.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The cart input is malformed (empty, bad quantity, negative amounts).
    ///
    /// Local to the cart aggregator; never persisted.
    #[error("Invalid cart: {reason}")]
    InvalidCart { reason: String },

    /// The payments handed to finalization do not settle the cart total.
    ///
    /// ## User Workflow
    /// ```text
    /// Cart total: 20.00
    ///      │
    ///      ▼
    /// Payments: cash 15.00        ← short by 5.00
    ///      │
    ///      ▼
    /// PaymentMismatch { expected: 2000, received: 1500 }
    /// ```
    #[error("Payments total {received_cents} does not match sale total {expected_cents}")]
    PaymentMismatch {
        expected_cents: i64,
        received_cents: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidCart error.
    pub fn invalid_cart(reason: impl Into<String>) -> Self {
        CoreError::InvalidCart {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when input doesn't meet requirements; used for early
/// validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
