//! # Sale Repository
//!
//! Database operations for sales, sale items and reversal markers.
//!
//! ## Guarded Transitions
//! Every status transition is a conditional UPDATE (`WHERE status = …`) with
//! `rows_affected` checked, so the state machine cannot be bypassed by a
//! stale in-memory snapshot:
//! ```text
//! pending ──mark_completed──► completed ──mark_cancelled──► cancelled
//!    │ ▲                                                    (terminal)
//!    ▼ │
//! suspended        pending/suspended ──delete_draft──► (gone)
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use varejo_core::{Sale, SaleItem, SaleStatus};

const SALE_COLUMNS: &str = "id, cash_register_session_id, client_id, status, \
     subtotal_cents, discount_cents, delivery_fee_cents, total_cents, \
     payment_status, created_at, updated_at, completed_at, cancelled_at";

const ITEM_COLUMNS: &str = "id, sale_id, product_id, quantity, unit_price_cents, \
     discount_cents, subtotal_cents, created_at";

/// Outcome of claiming a sale's reversal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalClaim {
    /// This caller created the marker; it owns the reversal.
    Started,
    /// A marker exists without `completed_at`: an earlier reversal did not
    /// finish and this caller should resume it.
    InFlight,
    /// The reversal already committed in full.
    AlreadyCompleted,
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Inserts a sale header.
    pub async fn insert_sale(&self, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, total = sale.total_cents, "Inserting sale");

        sqlx::query(
            "INSERT INTO sales (
                id, cash_register_session_id, client_id, status,
                subtotal_cents, discount_cents, delivery_fee_cents, total_cents,
                payment_status, created_at, updated_at, completed_at, cancelled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&sale.id)
        .bind(&sale.cash_register_session_id)
        .bind(&sale.client_id)
        .bind(sale.status)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.delivery_fee_cents)
        .bind(sale.total_cents)
        .bind(sale.payment_status)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.completed_at)
        .bind(sale.cancelled_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a line item.
    pub async fn insert_item(&self, item: &SaleItem) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO sale_items (
                id, sale_id, product_id, quantity, unit_price_cents,
                discount_cents, subtotal_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.discount_cents)
        .bind(item.subtotal_cents)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets all items for a sale.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY created_at, id"
        ))
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Lists sales recorded against a register session, oldest first.
    pub async fn list_by_session(&self, session_id: &str) -> DbResult<Vec<Sale>> {
        let sales = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales \
             WHERE cash_register_session_id = ?1 ORDER BY created_at, id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sales)
    }

    /// Marks a pending sale completed and paid.
    ///
    /// Returns false when the sale is not currently `pending` (or missing).
    pub async fn mark_completed(&self, sale_id: &str) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE sales SET status = ?2, payment_status = ?3, \
             completed_at = ?4, updated_at = ?4 \
             WHERE id = ?1 AND status = ?5",
        )
        .bind(sale_id)
        .bind(SaleStatus::Completed)
        .bind(varejo_core::PaymentStatus::Paid)
        .bind(now)
        .bind(SaleStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks a completed sale cancelled and refunded.
    ///
    /// Returns false when the sale is not currently `completed` (or missing).
    pub async fn mark_cancelled(&self, sale_id: &str) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE sales SET status = ?2, payment_status = ?3, \
             cancelled_at = ?4, updated_at = ?4 \
             WHERE id = ?1 AND status = ?5",
        )
        .bind(sale_id)
        .bind(SaleStatus::Cancelled)
        .bind(varejo_core::PaymentStatus::Refunded)
        .bind(now)
        .bind(SaleStatus::Completed)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Attaches a register session to a pending sale.
    ///
    /// Drafts are saved without a session; the session is fixed at
    /// finalization time. Returns false when the sale is not `pending`.
    pub async fn assign_session(&self, sale_id: &str, session_id: &str) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE sales SET cash_register_session_id = ?2, updated_at = ?3 \
             WHERE id = ?1 AND status = ?4",
        )
        .bind(sale_id)
        .bind(session_id)
        .bind(now)
        .bind(SaleStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Suspends a pending sale (parked cart).
    pub async fn mark_suspended(&self, sale_id: &str) -> DbResult<bool> {
        self.transition(sale_id, SaleStatus::Pending, SaleStatus::Suspended)
            .await
    }

    /// Resumes a suspended sale back to pending.
    pub async fn mark_pending(&self, sale_id: &str) -> DbResult<bool> {
        self.transition(sale_id, SaleStatus::Suspended, SaleStatus::Pending)
            .await
    }

    async fn transition(&self, sale_id: &str, from: SaleStatus, to: SaleStatus) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE sales SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
        )
        .bind(sale_id)
        .bind(to)
        .bind(now)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a sale that never committed any effects, with its items.
    ///
    /// Only `pending`/`suspended` sales qualify; a completed sale must be
    /// cancelled, never deleted. Returns false when nothing was deleted.
    pub async fn delete_draft(&self, sale_id: &str) -> DbResult<bool> {
        debug!(sale_id = %sale_id, "Deleting draft sale");

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sale_items WHERE sale_id = ?1")
            .bind(sale_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "DELETE FROM sales WHERE id = ?1 AND status IN (?2, ?3)",
        )
        .bind(sale_id)
        .bind(SaleStatus::Pending)
        .bind(SaleStatus::Suspended)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Reversal markers
    // -------------------------------------------------------------------------

    /// Claims the reversal marker for a sale.
    ///
    /// The marker is claimed BEFORE any reversal side effect, so a concurrent
    /// or repeated cancel sees it and cannot duplicate the reversal.
    pub async fn begin_reversal(&self, sale_id: &str, reason: &str) -> DbResult<ReversalClaim> {
        let now = Utc::now();

        let inserted = sqlx::query(
            "INSERT INTO sale_reversals (sale_id, reason, started_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (sale_id) DO NOTHING",
        )
        .bind(sale_id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(ReversalClaim::Started);
        }

        let completed_at: Option<Option<chrono::DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT completed_at FROM sale_reversals WHERE sale_id = ?1",
        )
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await?;

        match completed_at {
            Some(Some(_)) => Ok(ReversalClaim::AlreadyCompleted),
            Some(None) => Ok(ReversalClaim::InFlight),
            // Conflict without a visible row should not happen; treat as an
            // in-flight reversal so the caller resumes instead of duplicating.
            None => Ok(ReversalClaim::InFlight),
        }
    }

    /// Marks a sale's reversal marker completed.
    pub async fn complete_reversal(&self, sale_id: &str) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE sale_reversals SET completed_at = ?2 \
             WHERE sale_id = ?1 AND completed_at IS NULL",
        )
        .bind(sale_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SaleReversal", sale_id));
        }

        Ok(())
    }
}

/// Generates a new sale ID.
pub fn generate_sale_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new sale item ID.
pub fn generate_sale_item_id() -> String {
    Uuid::new_v4().to_string()
}
