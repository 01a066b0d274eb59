//! # Stock Ledger Repository
//!
//! The single write path for product stock. Every change to
//! `products.stock_quantity` goes through [`StockRepository::apply`], which
//! persists the append-only adjustment row and the materialized quantity in
//! one transaction.
//!
//! ## The Check-and-Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply(product_id, delta, reason, reference_id)                         │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    │                                                                    │
//! │    ├── reason = sale_reversal?                                          │
//! │    │     cap = Σ sold(reference) − Σ restored(reference)               │
//! │    │     delta = min(delta, cap); cap ≤ 0 → NoOp (dedupe)              │
//! │    │                                                                    │
//! │    ├── UPDATE products SET stock_quantity = stock_quantity + delta     │
//! │    │     [WHERE stock_quantity + delta >= 0]   ← atomic floor check    │
//! │    │     0 rows → Rejected { available } (nothing mutated)             │
//! │    │                                                                    │
//! │    ├── INSERT INTO stock_adjustments (...)                             │
//! │    │                                                                    │
//! │  COMMIT → Applied { new_quantity, minimum_stock_level }                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The conditional UPDATE is what makes concurrent sales safe: two sales
//! racing for the last unit both run `stock_quantity + delta >= 0` inside
//! SQLite's write serialization, so only one can pass.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use varejo_core::{StockAdjustment, StockReason};

/// Input for one stock adjustment.
#[derive(Debug, Clone)]
pub struct NewStockAdjustment {
    pub product_id: String,
    /// Signed quantity change (negative for sales).
    pub delta: i64,
    pub reason: StockReason,
    /// Sale or purchase id that caused this adjustment.
    pub reference_id: Option<String>,
}

impl NewStockAdjustment {
    /// Decrement caused by a finalized sale item.
    pub fn sale(product_id: impl Into<String>, quantity: i64, sale_id: impl Into<String>) -> Self {
        NewStockAdjustment {
            product_id: product_id.into(),
            delta: -quantity,
            reason: StockReason::Sale,
            reference_id: Some(sale_id.into()),
        }
    }

    /// Restoration that undoes a sale's decrement.
    pub fn sale_reversal(
        product_id: impl Into<String>,
        quantity: i64,
        sale_id: impl Into<String>,
    ) -> Self {
        NewStockAdjustment {
            product_id: product_id.into(),
            delta: quantity,
            reason: StockReason::SaleReversal,
            reference_id: Some(sale_id.into()),
        }
    }
}

/// Outcome of [`StockRepository::apply`].
#[derive(Debug, Clone)]
pub enum StockWrite {
    /// The adjustment was committed.
    Applied {
        new_quantity: i64,
        minimum_stock_level: i64,
    },
    /// The floor check failed; nothing was mutated.
    Rejected { available: i64 },
    /// A reversal found nothing left to restore (already fully restored for
    /// this reference, or zero delta); nothing was mutated.
    NoOp { current_quantity: i64 },
}

/// Repository for the append-only stock ledger.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Applies one stock adjustment atomically.
    ///
    /// ## Floor Policy
    /// Every reason except `sale_reversal` is subject to the non-negative
    /// floor; a violation returns [`StockWrite::Rejected`] with the quantity
    /// that was actually available, and mutates nothing.
    ///
    /// ## Reversal Cap
    /// `sale_reversal` is exempt from the floor (it undoes a
    /// previously-validated decrement) but capped at the quantity originally
    /// decremented for its `reference_id`, minus what was already restored.
    /// A fully-restored reversal returns [`StockWrite::NoOp`] - this is what
    /// makes retried cancellations safe.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - product does not exist
    pub async fn apply(&self, adjustment: &NewStockAdjustment) -> DbResult<StockWrite> {
        debug!(
            product_id = %adjustment.product_id,
            delta = adjustment.delta,
            reason = ?adjustment.reason,
            "Applying stock adjustment"
        );

        let mut tx = self.pool.begin().await?;

        let delta = match adjustment.reason {
            StockReason::SaleReversal => {
                let cap = match &adjustment.reference_id {
                    Some(reference_id) => {
                        remaining_to_restore(&mut tx, &adjustment.product_id, reference_id).await?
                    }
                    // A reversal without a reference has no original
                    // decrement to undo.
                    None => 0,
                };
                let delta = adjustment.delta.min(cap);
                if delta <= 0 {
                    let current = current_quantity(&mut tx, &adjustment.product_id)
                        .await?
                        .ok_or_else(|| DbError::not_found("Product", &adjustment.product_id))?;
                    tx.rollback().await?;
                    return Ok(StockWrite::NoOp {
                        current_quantity: current,
                    });
                }
                delta
            }
            _ => {
                if adjustment.delta == 0 {
                    let current = current_quantity(&mut tx, &adjustment.product_id)
                        .await?
                        .ok_or_else(|| DbError::not_found("Product", &adjustment.product_id))?;
                    tx.rollback().await?;
                    return Ok(StockWrite::NoOp {
                        current_quantity: current,
                    });
                }
                adjustment.delta
            }
        };

        let now = Utc::now();

        // The floor check rides on the UPDATE itself so the read-modify-write
        // cannot race another writer.
        let update = match adjustment.reason {
            StockReason::SaleReversal => sqlx::query(
                "UPDATE products SET stock_quantity = stock_quantity + ?2, updated_at = ?3 \
                 WHERE id = ?1",
            ),
            _ => sqlx::query(
                "UPDATE products SET stock_quantity = stock_quantity + ?2, updated_at = ?3 \
                 WHERE id = ?1 AND stock_quantity + ?2 >= 0",
            ),
        }
        .bind(&adjustment.product_id)
        .bind(delta)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if update.rows_affected() == 0 {
            let available = current_quantity(&mut tx, &adjustment.product_id)
                .await?
                .ok_or_else(|| DbError::not_found("Product", &adjustment.product_id))?;
            tx.rollback().await?;
            return Ok(StockWrite::Rejected { available });
        }

        sqlx::query(
            "INSERT INTO stock_adjustments (id, product_id, delta, reason, reference_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&adjustment.product_id)
        .bind(delta)
        .bind(adjustment.reason)
        .bind(&adjustment.reference_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (new_quantity, minimum_stock_level): (i64, i64) = sqlx::query_as(
            "SELECT stock_quantity, minimum_stock_level FROM products WHERE id = ?1",
        )
        .bind(&adjustment.product_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            product_id = %adjustment.product_id,
            new_quantity,
            "Stock adjustment committed"
        );

        Ok(StockWrite::Applied {
            new_quantity,
            minimum_stock_level,
        })
    }

    /// Returns the adjustment history for a product, oldest first.
    pub async fn history(&self, product_id: &str) -> DbResult<Vec<StockAdjustment>> {
        let adjustments = sqlx::query_as::<_, StockAdjustment>(
            "SELECT id, product_id, delta, reason, reference_id, created_at \
             FROM stock_adjustments WHERE product_id = ?1 ORDER BY created_at, id",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(adjustments)
    }

    /// Returns the adjustments recorded for a reference (sale or purchase).
    pub async fn history_for_reference(&self, reference_id: &str) -> DbResult<Vec<StockAdjustment>> {
        let adjustments = sqlx::query_as::<_, StockAdjustment>(
            "SELECT id, product_id, delta, reason, reference_id, created_at \
             FROM stock_adjustments WHERE reference_id = ?1 ORDER BY created_at, id",
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(adjustments)
    }

    /// Folds the adjustment log for a product: Σ delta.
    ///
    /// By construction this always equals `products.stock_quantity`; the
    /// invariant tests replay it to prove exactly that.
    pub async fn fold(&self, product_id: &str) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM stock_adjustments WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }
}

/// Quantity still restorable for (product, reference):
/// Σ sold − Σ already restored.
async fn remaining_to_restore(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    product_id: &str,
    reference_id: &str,
) -> DbResult<i64> {
    let sold: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(-delta), 0) FROM stock_adjustments \
         WHERE product_id = ?1 AND reference_id = ?2 AND reason = ?3",
    )
    .bind(product_id)
    .bind(reference_id)
    .bind(StockReason::Sale)
    .fetch_one(&mut **tx)
    .await?;

    let restored: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(delta), 0) FROM stock_adjustments \
         WHERE product_id = ?1 AND reference_id = ?2 AND reason = ?3",
    )
    .bind(product_id)
    .bind(reference_id)
    .bind(StockReason::SaleReversal)
    .fetch_one(&mut **tx)
    .await?;

    Ok(sold - restored)
}

async fn current_quantity(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    product_id: &str,
) -> DbResult<Option<i64>> {
    let quantity: Option<i64> =
        sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = ?1")
            .bind(product_id)
            .fetch_optional(&mut **tx)
            .await?;

    Ok(quantity)
}

// =============================================================================
// Unit Tests
// =============================================================================
