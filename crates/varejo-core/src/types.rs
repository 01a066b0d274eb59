//! # Domain Types
//!
//! Core domain types for the sale transaction and inventory consistency
//! engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │ StockAdjustment │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  product_id     │       │
//! │  │  stock_quantity │   │  status         │   │  delta (signed) │       │
//! │  │  minimum_stock  │   │  total_cents    │   │  reason         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────┐   ┌───────────────┐     │
//! │  │  CashMovement   │   │ CashRegisterSession │   │   SaleItem    │     │
//! │  │  ─────────────  │   │  ────────────────── │   │ ───────────── │     │
//! │  │  entrada|saida  │   │  opening_balance    │   │  quantity     │     │
//! │  │  category       │   │  expected_balance   │   │  unit_price   │     │
//! │  │  amount_cents   │   │  difference         │   │  subtotal     │     │
//! │  └─────────────────┘   └─────────────────────┘   └───────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Invariants (enforced by varejo-db / varejo-engine)
//! - `Product.stock_quantity` is ONLY mutated through stock adjustments and
//!   always equals the fold of all adjustment deltas for that product.
//! - `StockAdjustment` and `CashMovement` rows are append-only: never edited,
//!   never deleted. Corrections are new offsetting rows.
//! - A `Sale` reaches `Completed` only after its stock decrements and cash
//!   movements have all been committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Stock Adjustment Reason
// =============================================================================

/// Why a stock adjustment was applied.
///
/// The reason decides the floor policy: `Sale` decrements fail rather than
/// drive stock negative, while `SaleReversal` restorations are exempt from
/// the floor (they undo a previously-validated decrement) but capped so a
/// retried reversal cannot restore more than was originally sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    /// Decrement caused by a finalized sale item.
    Sale,
    /// Restoration caused by a sale cancellation (or saga compensation).
    SaleReversal,
    /// Increment from received purchase/merchandise.
    Purchase,
    /// Manual correction (count, damage, expiry).
    Manual,
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale transaction.
///
/// ## Lifecycle
/// ```text
/// Pending ──► Completed ──► Cancelled      (terminal)
///    │
///    ├──► Suspended ──► Pending            (parked carts)
///    │
///    └──► deleted                          (discard: no stock effects yet)
/// ```
/// `Cancelled` is reached ONLY from `Completed`; a pending/suspended sale has
/// no committed stock or cash effects, so it is deleted instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Sale header persisted, effects not yet committed.
    Pending,
    /// Stock decremented and cash recorded; the sale is done.
    Completed,
    /// A completed sale that has been reversed.
    Cancelled,
    /// Parked mid-checkout (no stock or cash effects).
    Suspended,
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Pending
    }
}

// =============================================================================
// Payment Status
// =============================================================================

/// Settlement status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    /// Set when a completed sale is cancelled and its cash entry offset.
    Refunded,
}

// =============================================================================
// Payment Method
// =============================================================================

/// How a payment was tendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Pix,
}

// =============================================================================
// Cash Movement
// =============================================================================

/// Direction of a cash movement relative to the register drawer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Money into the drawer.
    Entrada,
    /// Money out of the drawer.
    Saida,
}

/// Business category of a cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementCategory {
    /// Payment received for a sale.
    Venda,
    /// Offsetting entry for a cancelled sale.
    VendaCancelada,
    /// Mid-shift cash withdrawal from the drawer.
    Sangria,
    /// Mid-shift cash top-up into the drawer.
    Suprimento,
}

// =============================================================================
// Session Status
// =============================================================================

/// Status of a cash register session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

// =============================================================================
// Product
// =============================================================================

/// A product available for sale.
///
/// The catalog fields (sku, name, price) are owned by the surrounding ERP;
/// this engine reads them and writes ONLY `stock_quantity`, exclusively
/// through stock adjustments.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name.
    pub name: String,

    /// Price in cents (smallest currency unit).
    pub price_cents: i64,

    /// Current on-hand quantity. Equals the fold of all stock adjustments.
    pub stock_quantity: i64,

    /// Threshold at or below which a low-stock alert is emitted.
    pub minimum_stock_level: i64,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Whether the on-hand quantity is at or below the alert threshold.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.minimum_stock_level
    }
}

// =============================================================================
// Stock Adjustment
// =============================================================================

/// One signed change to a product's on-hand quantity.
///
/// Append-only: the current `stock_quantity` of a product is the sum of all
/// its adjustment deltas, materialized eagerly on the product row for read
/// performance.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockAdjustment {
    pub id: String,
    pub product_id: String,
    /// Signed quantity change (negative for sales).
    pub delta: i64,
    pub reason: StockReason,
    /// Sale or purchase id that caused this adjustment, if any.
    pub reference_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sale
// =============================================================================

/// A customer transaction with one or more line items.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    /// Register session the sale's payments were recorded against.
    pub cash_register_session_id: Option<String>,
    /// Customer, when identified. Opaque id supplied by the ERP.
    pub client_id: Option<String>,
    pub status: SaleStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub payment_status: PaymentStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Returns the total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item in a sale.
///
/// Uses the snapshot pattern: `unit_price_cents` freezes the catalog price at
/// sale time. Items are created together with finalization and never mutated
/// after the sale reaches `Completed` - corrections are cancel-and-recreate.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// Quantity sold (> 0).
    pub quantity: i64,
    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,
    /// Discount applied to this line.
    pub discount_cents: i64,
    /// Line subtotal: unit_price × quantity − discount.
    pub subtotal_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns the line subtotal as Money.
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }
}

// =============================================================================
// Payment (input)
// =============================================================================

/// One tender toward a sale's total. Input to finalization; the persisted
/// record of money received is the resulting `CashMovement`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    pub method: PaymentMethod,
    /// Amount paid in cents (> 0).
    pub amount_cents: i64,
}

impl Payment {
    /// Returns the payment amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Cash Movement
// =============================================================================

/// An immutable entry in the cash ledger of a register session.
///
/// The ledger is never edited or deleted, only appended to: a cancellation
/// produces a new offsetting `saida` entry referencing the same sale rather
/// than removing the original `entrada`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashMovement {
    pub id: String,
    pub cash_register_session_id: String,
    /// Sale that caused this movement, if any.
    pub sale_id: Option<String>,
    pub movement_type: MovementType,
    pub category: MovementCategory,
    /// Always positive; direction is carried by `movement_type`.
    pub amount_cents: i64,
    pub description: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CashMovement {
    /// Signed effect of this movement on the drawer balance.
    #[inline]
    pub fn signed_amount(&self) -> Money {
        match self.movement_type {
            MovementType::Entrada => Money::from_cents(self.amount_cents),
            MovementType::Saida => Money::from_cents(-self.amount_cents),
        }
    }
}

// =============================================================================
// Cash Register Session
// =============================================================================

/// One operator's open-to-close shift, scoping all cash movements recorded
/// during it.
///
/// Closed exactly once; at close
/// `expected_balance = opening_balance + Σ entrada − Σ saida` is compared
/// against the counted `closing_balance` to derive `difference`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashRegisterSession {
    pub id: String,
    /// Opaque operator id supplied by the surrounding auth layer.
    pub operator_id: String,
    pub status: SessionStatus,
    pub opening_balance_cents: i64,
    /// Counted balance, set at close.
    pub closing_balance_cents: Option<i64>,
    /// Computed balance, set at close.
    pub expected_balance_cents: Option<i64>,
    /// counted − expected. Negative means a shortage.
    pub difference_cents: Option<i64>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl CashRegisterSession {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sale_status_default() {
        assert_eq!(SaleStatus::default(), SaleStatus::Pending);
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&StockReason::SaleReversal).unwrap(),
            "\"sale_reversal\""
        );
        assert_eq!(
            serde_json::to_string(&MovementCategory::VendaCancelada).unwrap(),
            "\"venda_cancelada\""
        );
        assert_eq!(
            serde_json::to_string(&MovementType::Saida).unwrap(),
            "\"saida\""
        );
    }

    #[test]
    fn test_movement_signed_amount() {
        let entrada = CashMovement {
            id: "m1".to_string(),
            cash_register_session_id: "s1".to_string(),
            sale_id: None,
            movement_type: MovementType::Entrada,
            category: MovementCategory::Suprimento,
            amount_cents: 500,
            description: None,
            created_at: Utc::now(),
        };
        assert_eq!(entrada.signed_amount().cents(), 500);

        let saida = CashMovement {
            movement_type: MovementType::Saida,
            category: MovementCategory::Sangria,
            ..entrada
        };
        assert_eq!(saida.signed_amount().cents(), -500);
    }

    #[test]
    fn test_product_low_stock() {
        let now = Utc::now();
        let product = Product {
            id: "p1".to_string(),
            sku: "COKE-330".to_string(),
            name: "Coca-Cola 330ml".to_string(),
            price_cents: 599,
            stock_quantity: 3,
            minimum_stock_level: 5,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(product.is_low_stock());
    }
}
