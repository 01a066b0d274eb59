//! # Sale Cancellation
//!
//! The inverse of finalization: restore stock, offset the cash entry, mark
//! the sale cancelled - safe to run at most once per sale.
//!
//! ## Idempotence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cancel(sale_id, reason)                                                │
//! │                                                                         │
//! │  sale completed?          no → InvalidStateTransition / AlreadyCancelled│
//! │  sale's session open?     no → SessionClosed (nothing mutated)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  claim reversal marker  ──── marker completed → AlreadyCancelled       │
//! │       │                      marker in flight → RESUME                  │
//! │       ▼                                                                 │
//! │  per item: adjust(+qty, sale_reversal, sale_id)                         │
//! │       │        capped at what the sale decremented minus what was      │
//! │       │        already restored → retried items dedupe to no-ops       │
//! │       │ failure after retries → ReversalIncomplete (sale STAYS         │
//! │       │                         completed; caller retries cancel)      │
//! │       ▼                                                                 │
//! │  append ONE saida movement (venda_cancelada, amount = total)           │
//! │       │        skipped when an earlier attempt already wrote it        │
//! │       ▼                                                                 │
//! │  sale → cancelled/refunded; marker → completed                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every step is either guarded by the marker, deduplicated by the ledger
//! cap, or deduplicated inside its own INSERT - so two concurrent calls, or
//! a retry after a partial failure, produce exactly one restoration and one
//! offsetting cash entry.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::retry::with_retry;
use crate::stock::StockLedger;
use varejo_core::{
    CashMovement, MovementCategory, MovementType, Sale, SaleStatus, SessionStatus, StockReason,
};
use varejo_db::{Database, ReversalClaim};

/// Coordinates sale cancellation and reversal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    db: Database,
    ledger: StockLedger,
}

impl Cancellation {
    pub(crate) fn new(db: Database, ledger: StockLedger) -> Self {
        Cancellation { db, ledger }
    }

    /// Cancels a completed sale.
    ///
    /// ## Errors
    /// - [`EngineError::InvalidStateTransition`] - sale is not `completed`
    /// - [`EngineError::AlreadyCancelled`] - benign; the first call already
    ///   did everything, this one mutated nothing
    /// - [`EngineError::SessionClosed`] - the sale's register session closed;
    ///   the offsetting movement has nowhere to go and nothing is mutated
    /// - [`EngineError::ReversalIncomplete`] - a step failed after retries;
    ///   the sale stays `completed` and the caller must retry
    pub async fn cancel(&self, sale_id: &str, reason: &str) -> EngineResult<()> {
        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::SaleNotFound(sale_id.to_string()))?;

        match sale.status {
            SaleStatus::Completed => {}
            SaleStatus::Cancelled => {
                return Err(EngineError::AlreadyCancelled {
                    sale_id: sale_id.to_string(),
                })
            }
            status => {
                return Err(EngineError::InvalidStateTransition {
                    sale_id: sale_id.to_string(),
                    status,
                })
            }
        }

        // The offsetting movement must land on the sale's own session, so a
        // closed session fails the cancellation before anything is touched.
        let session_id = sale
            .cash_register_session_id
            .clone()
            .ok_or(EngineError::NoOpenRegister)?;
        let session = self
            .db
            .cash()
            .get_session(&session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        if session.status != SessionStatus::Open {
            return Err(EngineError::SessionClosed { session_id });
        }

        // Claim the reversal marker BEFORE mutating stock
        let claim = with_retry("sale.begin_reversal", || {
            let repo = self.db.sales();
            let sale_id = sale_id.to_string();
            let reason = reason.to_string();
            async move { repo.begin_reversal(&sale_id, &reason).await }
        })
        .await?;

        match claim {
            ReversalClaim::AlreadyCompleted => {
                return Err(EngineError::AlreadyCancelled {
                    sale_id: sale_id.to_string(),
                })
            }
            ReversalClaim::Started => {
                info!(sale_id, reason, "Cancelling sale");
            }
            ReversalClaim::InFlight => {
                info!(sale_id, "Resuming incomplete reversal");
            }
        }

        self.reverse(&sale, &session_id).await
    }

    /// The reversal body: restore stock, offset cash, flip the status.
    /// Every step dedupes, so running it again after a partial failure is
    /// safe.
    async fn reverse(&self, sale: &Sale, session_id: &str) -> EngineResult<()> {
        let items = self.db.sales().get_items(&sale.id).await?;

        // Restore stock. The ledger caps each restoration at what this sale
        // actually decremented minus what was already restored, so items
        // committed by an earlier attempt become no-ops here.
        for item in &items {
            let restored = self
                .ledger
                .adjust(
                    &item.product_id,
                    item.quantity,
                    StockReason::SaleReversal,
                    Some(&sale.id),
                )
                .await;

            if let Err(err) = restored {
                warn!(
                    sale_id = %sale.id,
                    product_id = %item.product_id,
                    error = %err,
                    "Stock restoration failed; sale stays completed"
                );
                return Err(EngineError::ReversalIncomplete {
                    sale_id: sale.id.clone(),
                    detail: err.to_string(),
                });
            }
        }

        // One offsetting saida for the whole sale. The insert dedupes on
        // (sale, category) in the same statement, so an earlier attempt's
        // entry - or a concurrent resume's - is never duplicated.
        let offset = CashMovement {
            id: Uuid::new_v4().to_string(),
            cash_register_session_id: session_id.to_string(),
            sale_id: Some(sale.id.clone()),
            movement_type: MovementType::Saida,
            category: MovementCategory::VendaCancelada,
            amount_cents: sale.total_cents,
            description: None,
            created_at: Utc::now(),
        };

        let inserted = with_retry("cash.offset_sale", || {
            let repo = self.db.cash();
            let offset = offset.clone();
            async move { repo.insert_sale_movement_once(&offset).await }
        })
        .await;

        match inserted {
            Ok(true) => {}
            Ok(false) => {
                let already_offset = self
                    .db
                    .cash()
                    .has_sale_movement(&sale.id, MovementCategory::VendaCancelada)
                    .await?;

                if !already_offset {
                    // Session closed between the precondition check and the
                    // write. Stock restorations stay committed (they dedupe
                    // on retry); the sale stays completed.
                    return Err(EngineError::ReversalIncomplete {
                        sale_id: sale.id.clone(),
                        detail: format!("register session {session_id} closed during reversal"),
                    });
                }
            }
            Err(err) => {
                return Err(EngineError::ReversalIncomplete {
                    sale_id: sale.id.clone(),
                    detail: err.to_string(),
                });
            }
        }

        // Terminal state + marker completion
        let cancelled = with_retry("sale.mark_cancelled", || {
            let repo = self.db.sales();
            let sale_id = sale.id.clone();
            async move { repo.mark_cancelled(&sale_id).await }
        })
        .await;

        match cancelled {
            Ok(true) => {}
            // A concurrent call won the final transition; the work is done
            Ok(false) => {
                return Err(EngineError::AlreadyCancelled {
                    sale_id: sale.id.clone(),
                })
            }
            Err(err) => {
                return Err(EngineError::ReversalIncomplete {
                    sale_id: sale.id.clone(),
                    detail: err.to_string(),
                })
            }
        }

        let marked = with_retry("sale.complete_reversal", || {
            let repo = self.db.sales();
            let sale_id = sale.id.clone();
            async move { repo.complete_reversal(&sale_id).await }
        })
        .await;

        if let Err(err) = marked {
            // The sale is already cancelled; a dangling in-flight marker only
            // means a later cancel returns AlreadyCancelled via the status
            // check instead of the marker.
            warn!(sale_id = %sale.id, error = %err, "Reversal marker completion failed");
        }

        info!(sale_id = %sale.id, total = sale.total_cents, "Sale cancelled");
        Ok(())
    }
}
