//! # Stock Ledger Service
//!
//! The engine-side face of the stock ledger: wraps the repository's atomic
//! check-and-write with bounded retry, maps floor violations to
//! [`EngineError::InsufficientStock`], and publishes low-stock alerts after
//! commit.
//!
//! ## Contract
//! ```text
//! adjust(product_id, delta, reason, reference_id) → StockLevel | error
//!
//!   reason = sale          floor-checked; violation → InsufficientStock
//!   reason = sale_reversal floor-exempt; capped at what the reference
//!                          actually decremented (retries dedupe to no-ops)
//!   reason = purchase      floor-checked (a negative correction may not
//!   reason = manual        overdraw either)
//! ```
//!
//! Concurrency: the floor check runs inside the repository's single
//! transaction, so two sales racing for the last unit serialize at this call
//! and only one passes. Sagas touching disjoint products never meet here.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::events::LowStockAlert;
use crate::retry::with_retry;
use varejo_core::StockReason;
use varejo_db::{Database, NewStockAdjustment, StockWrite};

/// Capacity of the low-stock broadcast channel. Slow subscribers lag and
/// miss old alerts rather than block the ledger.
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// On-hand quantity of a product after an adjustment.
#[derive(Debug, Clone)]
pub struct StockLevel {
    pub product_id: String,
    pub quantity: i64,
}

/// Engine service owning all stock mutations.
#[derive(Debug, Clone)]
pub struct StockLedger {
    db: Database,
    alerts: broadcast::Sender<LowStockAlert>,
}

impl StockLedger {
    /// Creates a new stock ledger service.
    pub fn new(db: Database) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        StockLedger { db, alerts }
    }

    /// Subscribes to low-stock alerts.
    ///
    /// The notification collaborator (external to this engine) listens here;
    /// the ledger itself never emails or pushes anything.
    pub fn subscribe(&self) -> broadcast::Receiver<LowStockAlert> {
        self.alerts.subscribe()
    }

    /// Applies a signed stock adjustment.
    ///
    /// Returns the resulting stock level. A deduplicated reversal (nothing
    /// left to restore for the reference) is success-shaped: it returns the
    /// current level without writing anything.
    ///
    /// ## Errors
    /// - [`EngineError::InsufficientStock`] - floor violation; nothing mutated
    /// - [`EngineError::ProductNotFound`] - unknown product
    /// - [`EngineError::StorageUnavailable`] - transient failures exhausted retries
    pub async fn adjust(
        &self,
        product_id: &str,
        delta: i64,
        reason: StockReason,
        reference_id: Option<&str>,
    ) -> EngineResult<StockLevel> {
        let adjustment = NewStockAdjustment {
            product_id: product_id.to_string(),
            delta,
            reason,
            reference_id: reference_id.map(str::to_string),
        };

        let write = with_retry("stock.apply", || {
            let repo = self.db.stock();
            let adjustment = adjustment.clone();
            async move { repo.apply(&adjustment).await }
        })
        .await?;

        match write {
            StockWrite::Applied {
                new_quantity,
                minimum_stock_level,
            } => {
                if new_quantity <= minimum_stock_level {
                    info!(
                        product_id,
                        quantity = new_quantity,
                        minimum_stock_level,
                        "Stock at or below minimum"
                    );
                    // No receivers is fine; the alert is advisory
                    let _ = self.alerts.send(LowStockAlert {
                        product_id: product_id.to_string(),
                        quantity: new_quantity,
                        minimum_stock_level,
                    });
                }

                Ok(StockLevel {
                    product_id: product_id.to_string(),
                    quantity: new_quantity,
                })
            }

            StockWrite::Rejected { available } => Err(EngineError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: delta.abs(),
                available,
            }),

            StockWrite::NoOp { current_quantity } => {
                debug!(product_id, "Stock adjustment deduplicated to no-op");
                Ok(StockLevel {
                    product_id: product_id.to_string(),
                    quantity: current_quantity,
                })
            }
        }
    }
}
