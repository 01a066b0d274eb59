//! # Cart Aggregation
//!
//! Pure computation of sale totals from a list of line items.
//!
//! ## Where This Sits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Checkout Data Flow                                 │
//! │                                                                         │
//! │  UI cart ──► [CartLine]                                                │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │  CartTotals::compute(lines, discount, delivery_fee)  ← THIS MODULE     │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │  CartTotals { subtotal, total } ──► finalization (varejo-engine)       │
//! │                                                                         │
//! │  No persistence, no side effects: safe to call repeatedly while the    │
//! │  cashier edits the cart, and trivially testable in isolation.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Formula
//! - `line subtotal = unit_price × quantity − line_discount`
//! - `subtotal = Σ line subtotals`
//! - `total = subtotal − discount + delivery_fee`
//!
//! Malformed input (non-positive quantities, negative prices or discounts,
//! negative resulting totals) is rejected with [`CoreError::InvalidCart`]
//! before anything downstream runs.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::Payment;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

// =============================================================================
// Cart Line
// =============================================================================

/// One line of a cart: a product, a quantity, a frozen unit price and an
/// optional line-level discount.
///
/// The unit price is captured when the product is added to the cart (snapshot
/// pattern) so a catalog price change mid-checkout cannot alter the sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
}

impl CartLine {
    /// Creates a line with no line-level discount.
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        CartLine {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
            discount_cents: 0,
        }
    }

    /// Gross line amount before discount: unit_price × quantity.
    #[inline]
    pub fn gross(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }

    /// Line subtotal: gross − line discount.
    #[inline]
    pub fn subtotal(&self) -> Money {
        self.gross() - Money::from_cents(self.discount_cents)
    }
}

// =============================================================================
// Cart Totals
// =============================================================================

/// The aggregated amounts of a cart. Output of [`CartTotals::compute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
}

impl CartTotals {
    /// Computes cart totals from line items, a cart-level discount and a
    /// delivery fee.
    ///
    /// Pure and deterministic: same input, same output, no side effects.
    ///
    /// ## Errors
    /// [`CoreError::InvalidCart`] when the cart is empty or oversized, a
    /// quantity is non-positive or over the per-item limit, a price or
    /// discount is negative, a line discount exceeds its line gross, or the
    /// resulting subtotal/total would be negative.
    pub fn compute(
        lines: &[CartLine],
        discount_cents: i64,
        delivery_fee_cents: i64,
    ) -> CoreResult<CartTotals> {
        if lines.is_empty() {
            return Err(CoreError::invalid_cart("cart has no items"));
        }
        if lines.len() > MAX_CART_ITEMS {
            return Err(CoreError::invalid_cart(format!(
                "cart cannot have more than {} items",
                MAX_CART_ITEMS
            )));
        }
        if discount_cents < 0 {
            return Err(CoreError::invalid_cart("discount cannot be negative"));
        }
        if delivery_fee_cents < 0 {
            return Err(CoreError::invalid_cart("delivery fee cannot be negative"));
        }

        let mut subtotal = Money::zero();
        for line in lines {
            if line.quantity <= 0 {
                return Err(CoreError::invalid_cart(format!(
                    "quantity must be positive for product {}",
                    line.product_id
                )));
            }
            if line.quantity > MAX_ITEM_QUANTITY {
                return Err(CoreError::invalid_cart(format!(
                    "quantity exceeds maximum of {} for product {}",
                    MAX_ITEM_QUANTITY, line.product_id
                )));
            }
            if line.unit_price_cents < 0 {
                return Err(CoreError::invalid_cart(format!(
                    "unit price cannot be negative for product {}",
                    line.product_id
                )));
            }
            if line.discount_cents < 0 {
                return Err(CoreError::invalid_cart(format!(
                    "line discount cannot be negative for product {}",
                    line.product_id
                )));
            }
            let line_subtotal = line.subtotal();
            if line_subtotal.is_negative() {
                return Err(CoreError::invalid_cart(format!(
                    "line discount exceeds line amount for product {}",
                    line.product_id
                )));
            }
            subtotal += line_subtotal;
        }

        let total =
            subtotal - Money::from_cents(discount_cents) + Money::from_cents(delivery_fee_cents);
        if total.is_negative() {
            return Err(CoreError::invalid_cart("total cannot be negative"));
        }

        Ok(CartTotals {
            subtotal_cents: subtotal.cents(),
            discount_cents,
            delivery_fee_cents,
            total_cents: total.cents(),
        })
    }

    /// Checks that a set of payments settles this cart exactly.
    ///
    /// ## Errors
    /// - [`CoreError::InvalidCart`] when a payment amount is non-positive.
    /// - [`CoreError::PaymentMismatch`] when Σ payments ≠ total.
    pub fn check_payments(&self, payments: &[Payment]) -> CoreResult<()> {
        let mut received = Money::zero();
        for payment in payments {
            if payment.amount_cents <= 0 {
                return Err(CoreError::invalid_cart("payment amount must be positive"));
            }
            received += payment.amount();
        }

        if received.cents() != self.total_cents {
            return Err(CoreError::PaymentMismatch {
                expected_cents: self.total_cents,
                received_cents: received.cents(),
            });
        }

        Ok(())
    }

    /// Returns the total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentMethod;

    fn line(qty: i64, price: i64) -> CartLine {
        CartLine::new("p1", qty, price)
    }

    #[test]
    fn test_compute_basic() {
        let totals = CartTotals::compute(&[line(2, 1000)], 0, 0).unwrap();
        assert_eq!(totals.subtotal_cents, 2000);
        assert_eq!(totals.total_cents, 2000);
    }

    #[test]
    fn test_compute_with_discount_and_delivery() {
        // 3 × 5.00 − 2.00 line discount = 13.00 subtotal
        let mut l = line(3, 500);
        l.discount_cents = 200;
        let totals = CartTotals::compute(&[l], 300, 150).unwrap();
        assert_eq!(totals.subtotal_cents, 1300);
        // 13.00 − 3.00 + 1.50
        assert_eq!(totals.total_cents, 1150);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let lines = vec![line(2, 1000), line(1, 550)];
        let a = CartTotals::compute(&lines, 100, 0).unwrap();
        let b = CartTotals::compute(&lines, 100, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_cart() {
        assert!(matches!(
            CartTotals::compute(&[], 0, 0),
            Err(CoreError::InvalidCart { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_quantities() {
        assert!(CartTotals::compute(&[line(0, 1000)], 0, 0).is_err());
        assert!(CartTotals::compute(&[line(-2, 1000)], 0, 0).is_err());
        assert!(CartTotals::compute(&[line(1000, 1000)], 0, 0).is_err());
    }

    #[test]
    fn test_rejects_negative_amounts() {
        assert!(CartTotals::compute(&[line(1, -100)], 0, 0).is_err());
        assert!(CartTotals::compute(&[line(1, 100)], -1, 0).is_err());
        assert!(CartTotals::compute(&[line(1, 100)], 0, -1).is_err());
    }

    #[test]
    fn test_rejects_negative_total() {
        // discount larger than subtotal
        assert!(matches!(
            CartTotals::compute(&[line(1, 100)], 200, 0),
            Err(CoreError::InvalidCart { .. })
        ));
    }

    #[test]
    fn test_rejects_line_discount_over_gross() {
        let mut l = line(1, 100);
        l.discount_cents = 150;
        assert!(CartTotals::compute(&[l], 0, 0).is_err());
    }

    #[test]
    fn test_check_payments_exact() {
        let totals = CartTotals::compute(&[line(2, 1000)], 0, 0).unwrap();
        let payments = vec![Payment {
            method: PaymentMethod::Cash,
            amount_cents: 2000,
        }];
        assert!(totals.check_payments(&payments).is_ok());
    }

    #[test]
    fn test_check_payments_split_tender() {
        let totals = CartTotals::compute(&[line(2, 1000)], 0, 0).unwrap();
        let payments = vec![
            Payment {
                method: PaymentMethod::Cash,
                amount_cents: 500,
            },
            Payment {
                method: PaymentMethod::Card,
                amount_cents: 1500,
            },
        ];
        assert!(totals.check_payments(&payments).is_ok());
    }

    #[test]
    fn test_check_payments_mismatch() {
        let totals = CartTotals::compute(&[line(2, 1000)], 0, 0).unwrap();
        let payments = vec![Payment {
            method: PaymentMethod::Cash,
            amount_cents: 1999,
        }];
        match totals.check_payments(&payments) {
            Err(CoreError::PaymentMismatch {
                expected_cents,
                received_cents,
            }) => {
                assert_eq!(expected_cents, 2000);
                assert_eq!(received_cents, 1999);
            }
            other => panic!("expected PaymentMismatch, got {:?}", other),
        }
    }
}
