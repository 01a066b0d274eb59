//! # Sale Finalization
//!
//! The path from "cart of items" to a completed sale: header, items, stock
//! decrements, cash movements, completion - with explicit compensation when
//! any step fails.
//!
//! ## The Saga
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  finalize(cart, client?, session?, payments)                            │
//! │                                                                         │
//! │  1. totals = compute(cart)            ── InvalidCart    ┐ nothing       │
//! │  2. Σ payments == total?              ── PaymentMismatch│ persisted     │
//! │  3. session exists and is open?       ── NoOpenRegister │ yet           │
//! │                                          SessionClosed  ┘               │
//! │  4. INSERT sale (pending) + items                                       │
//! │  5. per item: ledger.adjust(−qty, sale, sale_id)                        │
//! │        │ InsufficientStock?                                             │
//! │        │   restore already-applied decrements (sale_reversal)          │
//! │        │   delete items + sale                                          │
//! │        │   re-raise the FIRST InsufficientStock                         │
//! │  6. per payment: append entrada movement (category venda)              │
//! │        │ failure? offset recorded entradas, restore stock,             │
//! │        │          delete items + sale                                   │
//! │  7. UPDATE sale → completed / paid                                      │
//! │                                                                         │
//! │  Success ⇒ stock decremented by exactly the sold quantities AND the    │
//! │  cash ledger reflects exactly the sale total. Never partially.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two sagas over disjoint products never block each other; two sagas over
//! the same product serialize only inside the ledger's `adjust`, not for the
//! whole saga.

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::retry::with_retry;
use crate::stock::StockLedger;
use varejo_core::{
    CartLine, CartTotals, CashMovement, MovementCategory, MovementType, Payment, PaymentMethod,
    PaymentStatus, Sale, SaleItem, SaleStatus, SessionStatus, StockReason,
};
use varejo_db::Database;

// =============================================================================
// Requests
// =============================================================================

/// A cart to be persisted as a pending sale (no stock or cash effects).
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub lines: Vec<CartLine>,
    pub discount_cents: i64,
    pub delivery_fee_cents: i64,
    pub client_id: Option<String>,
}

/// A cart to be finalized in one call (instant checkout).
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub lines: Vec<CartLine>,
    pub discount_cents: i64,
    pub delivery_fee_cents: i64,
    pub client_id: Option<String>,
    /// Register session receiving the payments. Absence fails with
    /// [`EngineError::NoOpenRegister`] before anything is persisted.
    pub session_id: Option<String>,
    pub payments: Vec<Payment>,
}

// =============================================================================
// Checkout Coordinator
// =============================================================================

/// Coordinates sale creation and finalization.
#[derive(Debug, Clone)]
pub struct Checkout {
    db: Database,
    ledger: StockLedger,
}

impl Checkout {
    pub(crate) fn new(db: Database, ledger: StockLedger) -> Self {
        Checkout { db, ledger }
    }

    /// Finalizes a cart: the full saga in one call.
    ///
    /// On success the returned sale is `completed`/`paid`, stock is
    /// decremented by exactly the sold quantities, and one entrada movement
    /// per payment references the sale. On any error, no stock-level or
    /// sale-level side effect survives.
    pub async fn finalize(&self, request: &CheckoutRequest) -> EngineResult<Sale> {
        // Steps 1-2: pure validation, nothing persisted on failure
        let totals = CartTotals::compute(
            &request.lines,
            request.discount_cents,
            request.delivery_fee_cents,
        )?;
        totals.check_payments(&request.payments)?;

        // Step 3: register precondition
        let session_id = request
            .session_id
            .as_deref()
            .ok_or(EngineError::NoOpenRegister)?;
        self.require_open_session(session_id).await?;

        // Step 4: persist header + items
        let (sale, items) = self
            .persist_draft(
                &request.lines,
                &totals,
                request.client_id.clone(),
                Some(session_id.to_string()),
            )
            .await?;

        // Steps 5-7
        self.commit_effects(&sale, &items, session_id, &request.payments)
            .await?;

        self.reload(&sale.id).await
    }

    /// Persists a cart as a pending sale without committing any effects.
    ///
    /// The draft can later be finalized ([`Checkout::finalize_draft`]),
    /// parked ([`Checkout::suspend`]) or thrown away ([`Checkout::discard`]).
    pub async fn save_draft(&self, request: &DraftRequest) -> EngineResult<Sale> {
        let totals = CartTotals::compute(
            &request.lines,
            request.discount_cents,
            request.delivery_fee_cents,
        )?;

        let (sale, _) = self
            .persist_draft(&request.lines, &totals, request.client_id.clone(), None)
            .await?;

        info!(sale_id = %sale.id, total = sale.total_cents, "Draft sale saved");
        Ok(sale)
    }

    /// Finalizes a previously saved draft.
    ///
    /// A suspended draft is resumed implicitly. The payments must settle the
    /// stored total exactly.
    pub async fn finalize_draft(
        &self,
        sale_id: &str,
        session_id: &str,
        payments: &[Payment],
    ) -> EngineResult<Sale> {
        let sale = self.load(sale_id).await?;

        match sale.status {
            SaleStatus::Pending => {}
            SaleStatus::Suspended => {
                self.db.sales().mark_pending(sale_id).await?;
            }
            status => {
                return Err(EngineError::InvalidStateTransition {
                    sale_id: sale_id.to_string(),
                    status,
                })
            }
        }

        let items = self.db.sales().get_items(sale_id).await?;
        if items.is_empty() {
            return Err(varejo_core::CoreError::invalid_cart("draft sale has no items").into());
        }

        let totals = CartTotals {
            subtotal_cents: sale.subtotal_cents,
            discount_cents: sale.discount_cents,
            delivery_fee_cents: sale.delivery_fee_cents,
            total_cents: sale.total_cents,
        };
        totals.check_payments(payments)?;

        self.require_open_session(session_id).await?;
        // A racing status change is caught by the completion guard later
        let _ = self.db.sales().assign_session(sale_id, session_id).await?;

        self.commit_effects(&sale, &items, session_id, payments)
            .await?;

        self.reload(sale_id).await
    }

    /// Parks a pending sale.
    pub async fn suspend(&self, sale_id: &str) -> EngineResult<()> {
        if self.db.sales().mark_suspended(sale_id).await? {
            return Ok(());
        }
        Err(self.state_error(sale_id).await)
    }

    /// Brings a suspended sale back to pending.
    pub async fn resume(&self, sale_id: &str) -> EngineResult<()> {
        if self.db.sales().mark_pending(sale_id).await? {
            return Ok(());
        }
        Err(self.state_error(sale_id).await)
    }

    /// Deletes a pending/suspended sale.
    ///
    /// Such a sale has no committed stock or cash effects, so deletion is the
    /// correct disposal - cancellation is reserved for completed sales.
    pub async fn discard(&self, sale_id: &str) -> EngineResult<()> {
        if self.db.sales().delete_draft(sale_id).await? {
            info!(sale_id, "Draft sale discarded");
            return Ok(());
        }
        Err(self.state_error(sale_id).await)
    }

    // -------------------------------------------------------------------------
    // Saga internals
    // -------------------------------------------------------------------------

    /// Inserts the pending header and its items.
    ///
    /// A failure while inserting items deletes whatever was persisted; no
    /// stock or cash effect exists yet at this stage.
    async fn persist_draft(
        &self,
        lines: &[CartLine],
        totals: &CartTotals,
        client_id: Option<String>,
        session_id: Option<String>,
    ) -> EngineResult<(Sale, Vec<SaleItem>)> {
        let now = Utc::now();
        let sale = Sale {
            id: Uuid::new_v4().to_string(),
            cash_register_session_id: session_id,
            client_id,
            status: SaleStatus::Pending,
            subtotal_cents: totals.subtotal_cents,
            discount_cents: totals.discount_cents,
            delivery_fee_cents: totals.delivery_fee_cents,
            total_cents: totals.total_cents,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        };

        let items: Vec<SaleItem> = lines
            .iter()
            .map(|line| SaleItem {
                id: Uuid::new_v4().to_string(),
                sale_id: sale.id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                discount_cents: line.discount_cents,
                subtotal_cents: line.subtotal().cents(),
                created_at: now,
            })
            .collect();

        with_retry("sale.insert", || {
            let repo = self.db.sales();
            let sale = sale.clone();
            async move { repo.insert_sale(&sale).await }
        })
        .await?;

        for item in &items {
            let inserted = with_retry("sale.insert_item", || {
                let repo = self.db.sales();
                let item = item.clone();
                async move { repo.insert_item(&item).await }
            })
            .await;

            if let Err(err) = inserted {
                self.delete_draft_best_effort(&sale.id).await;
                return Err(err);
            }
        }

        Ok((sale, items))
    }

    /// Steps 5-7: stock decrements, cash movements, completion.
    async fn commit_effects(
        &self,
        sale: &Sale,
        items: &[SaleItem],
        session_id: &str,
        payments: &[Payment],
    ) -> EngineResult<()> {
        // Step 5: stock decrements, one atomic adjust per item
        let mut decremented: Vec<&SaleItem> = Vec::new();
        for item in items {
            let adjusted = self
                .ledger
                .adjust(
                    &item.product_id,
                    -item.quantity,
                    StockReason::Sale,
                    Some(&sale.id),
                )
                .await;

            if let Err(err) = adjusted {
                warn!(
                    sale_id = %sale.id,
                    product_id = %item.product_id,
                    error = %err,
                    "Stock decrement failed, compensating"
                );
                self.restore_stock_best_effort(&sale.id, &decremented).await;
                self.delete_draft_best_effort(&sale.id).await;
                return Err(err);
            }
            decremented.push(item);
        }

        // Step 6: one entrada movement per payment
        let mut recorded: Vec<CashMovement> = Vec::new();
        for payment in payments {
            let movement = CashMovement {
                id: Uuid::new_v4().to_string(),
                cash_register_session_id: session_id.to_string(),
                sale_id: Some(sale.id.clone()),
                movement_type: MovementType::Entrada,
                category: MovementCategory::Venda,
                amount_cents: payment.amount_cents,
                description: Some(method_label(payment.method).to_string()),
                created_at: Utc::now(),
            };

            let inserted = with_retry("cash.insert_movement", || {
                let repo = self.db.cash();
                let movement = movement.clone();
                async move { repo.insert_movement(&movement).await }
            })
            .await;

            match inserted {
                Ok(true) => recorded.push(movement),
                Ok(false) => {
                    // Session closed under the saga
                    self.abort_after_movements(sale, &decremented, &recorded)
                        .await;
                    return Err(EngineError::SessionClosed {
                        session_id: session_id.to_string(),
                    });
                }
                Err(err) => {
                    self.abort_after_movements(sale, &decremented, &recorded)
                        .await;
                    return Err(err);
                }
            }
        }

        // Step 7: completion
        let completed = with_retry("sale.mark_completed", || {
            let repo = self.db.sales();
            let sale_id = sale.id.clone();
            async move { repo.mark_completed(&sale_id).await }
        })
        .await;

        match completed {
            Ok(true) => {
                info!(
                    sale_id = %sale.id,
                    total = sale.total_cents,
                    items = items.len(),
                    "Sale finalized"
                );
                Ok(())
            }
            Ok(false) => {
                // The header left `pending` under us; nothing was completed
                self.abort_after_movements(sale, &decremented, &recorded)
                    .await;
                Err(self.state_error(&sale.id).await)
            }
            Err(err) => {
                self.abort_after_movements(sale, &decremented, &recorded)
                    .await;
                Err(err)
            }
        }
    }

    /// Full compensation once movements exist: offset recorded entradas,
    /// restore stock, delete the draft.
    async fn abort_after_movements(
        &self,
        sale: &Sale,
        decremented: &[&SaleItem],
        recorded: &[CashMovement],
    ) {
        // The cash ledger is append-only: recorded entradas are offset by
        // saidas, never deleted.
        for movement in recorded {
            let offset = CashMovement {
                id: Uuid::new_v4().to_string(),
                cash_register_session_id: movement.cash_register_session_id.clone(),
                sale_id: movement.sale_id.clone(),
                movement_type: MovementType::Saida,
                category: MovementCategory::VendaCancelada,
                amount_cents: movement.amount_cents,
                description: Some("estorno".to_string()),
                created_at: Utc::now(),
            };

            let result = with_retry("cash.offset_movement", || {
                let repo = self.db.cash();
                let offset = offset.clone();
                async move { repo.insert_movement(&offset).await }
            })
            .await;

            match result {
                Ok(true) => {}
                Ok(false) => error!(
                    sale_id = %sale.id,
                    movement_id = %movement.id,
                    "Could not offset entrada: session closed"
                ),
                Err(err) => error!(
                    sale_id = %sale.id,
                    movement_id = %movement.id,
                    error = %err,
                    "Could not offset entrada"
                ),
            }
        }

        self.restore_stock_best_effort(&sale.id, decremented).await;
        self.delete_draft_best_effort(&sale.id).await;
    }

    /// Restores already-applied decrements via capped sale_reversal
    /// adjustments. Best effort: a failure here means the store is down, and
    /// the paired sale/sale_reversal rows keep the compensation auditable
    /// and resumable.
    async fn restore_stock_best_effort(&self, sale_id: &str, decremented: &[&SaleItem]) {
        for item in decremented {
            let restored = self
                .ledger
                .adjust(
                    &item.product_id,
                    item.quantity,
                    StockReason::SaleReversal,
                    Some(sale_id),
                )
                .await;

            if let Err(err) = restored {
                error!(
                    sale_id,
                    product_id = %item.product_id,
                    error = %err,
                    "Stock compensation failed"
                );
            }
        }
    }

    async fn delete_draft_best_effort(&self, sale_id: &str) {
        let deleted = with_retry("sale.delete_draft", || {
            let repo = self.db.sales();
            let sale_id = sale_id.to_string();
            async move { repo.delete_draft(&sale_id).await }
        })
        .await;

        if let Err(err) = deleted {
            error!(sale_id, error = %err, "Draft deletion failed during compensation");
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn require_open_session(&self, session_id: &str) -> EngineResult<()> {
        let session = self
            .db
            .cash()
            .get_session(session_id)
            .await?
            .ok_or(EngineError::NoOpenRegister)?;

        if session.status != SessionStatus::Open {
            return Err(EngineError::SessionClosed {
                session_id: session_id.to_string(),
            });
        }

        Ok(())
    }

    async fn load(&self, sale_id: &str) -> EngineResult<Sale> {
        self.db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::SaleNotFound(sale_id.to_string()))
    }

    async fn reload(&self, sale_id: &str) -> EngineResult<Sale> {
        self.load(sale_id).await
    }

    /// Classifies why a guarded transition affected no rows.
    async fn state_error(&self, sale_id: &str) -> EngineError {
        match self.db.sales().get_by_id(sale_id).await {
            Ok(Some(sale)) => EngineError::InvalidStateTransition {
                sale_id: sale_id.to_string(),
                status: sale.status,
            },
            Ok(None) => EngineError::SaleNotFound(sale_id.to_string()),
            Err(err) => err.into(),
        }
    }
}

fn method_label(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Cash => "dinheiro",
        PaymentMethod::Card => "cartao",
        PaymentMethod::Pix => "pix",
    }
}
