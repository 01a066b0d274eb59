//! # Cash Repository
//!
//! Register sessions and the append-only cash movement ledger.
//!
//! ## The Guarded Append
//! A movement may only land on an OPEN session. Instead of a read-then-write
//! (which races a concurrent close), the insert carries its own guard:
//! ```text
//! INSERT INTO cash_movements (...)
//! SELECT ...
//! WHERE EXISTS (SELECT 1 FROM cash_register_sessions
//!               WHERE id = ? AND status = 'open')
//! ```
//! Zero rows affected means the session was closed (or missing) at the
//! instant of the write, and the caller surfaces the precondition error.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use varejo_core::{CashMovement, CashRegisterSession, MovementCategory, MovementType, SessionStatus};

const SESSION_COLUMNS: &str = "id, operator_id, status, opening_balance_cents, \
     closing_balance_cents, expected_balance_cents, difference_cents, \
     opened_at, closed_at";

const MOVEMENT_COLUMNS: &str = "id, cash_register_session_id, sale_id, movement_type, \
     category, amount_cents, description, created_at";

/// Outcome of closing a session.
#[derive(Debug, Clone)]
pub enum SessionClose {
    /// The session was open and is now closed; carries the final row with
    /// expected balance and difference filled in.
    Closed(CashRegisterSession),
    /// The session had already been closed; nothing was changed.
    AlreadyClosed,
}

/// Repository for register sessions and cash movements.
#[derive(Debug, Clone)]
pub struct CashRepository {
    pool: SqlitePool,
}

impl CashRepository {
    /// Creates a new CashRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CashRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    /// Inserts a new open session.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - the operator already has an open
    ///   session (partial unique index)
    pub async fn insert_session(&self, session: &CashRegisterSession) -> DbResult<()> {
        debug!(
            id = %session.id,
            operator_id = %session.operator_id,
            opening_balance = session.opening_balance_cents,
            "Opening register session"
        );

        sqlx::query(
            "INSERT INTO cash_register_sessions (
                id, operator_id, status, opening_balance_cents,
                closing_balance_cents, expected_balance_cents, difference_cents,
                opened_at, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&session.id)
        .bind(&session.operator_id)
        .bind(session.status)
        .bind(session.opening_balance_cents)
        .bind(session.closing_balance_cents)
        .bind(session.expected_balance_cents)
        .bind(session.difference_cents)
        .bind(session.opened_at)
        .bind(session.closed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a session by ID.
    pub async fn get_session(&self, id: &str) -> DbResult<Option<CashRegisterSession>> {
        let session = sqlx::query_as::<_, CashRegisterSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM cash_register_sessions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Finds the open session for an operator, if any.
    pub async fn find_open_for_operator(
        &self,
        operator_id: &str,
    ) -> DbResult<Option<CashRegisterSession>> {
        let session = sqlx::query_as::<_, CashRegisterSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM cash_register_sessions \
             WHERE operator_id = ?1 AND status = ?2"
        ))
        .bind(operator_id)
        .bind(SessionStatus::Open)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Closes an open session, computing its expected balance and difference.
    ///
    /// One transaction: read the session, aggregate its movements, flip it to
    /// closed. The UPDATE keeps the `status = 'open'` guard so a racing close
    /// resolves to exactly one winner.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no such session
    pub async fn close_session(
        &self,
        session_id: &str,
        counted_balance_cents: i64,
    ) -> DbResult<SessionClose> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, CashRegisterSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM cash_register_sessions WHERE id = ?1"
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found("CashRegisterSession", session_id))?;

        if session.status == SessionStatus::Closed {
            tx.rollback().await?;
            return Ok(SessionClose::AlreadyClosed);
        }

        let entradas = sum_movements_tx(&mut tx, session_id, MovementType::Entrada).await?;
        let saidas = sum_movements_tx(&mut tx, session_id, MovementType::Saida).await?;

        let expected = session.opening_balance_cents + entradas - saidas;
        let difference = counted_balance_cents - expected;
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE cash_register_sessions SET \
                status = ?2, closing_balance_cents = ?3, expected_balance_cents = ?4, \
                difference_cents = ?5, closed_at = ?6 \
             WHERE id = ?1 AND status = ?7",
        )
        .bind(session_id)
        .bind(SessionStatus::Closed)
        .bind(counted_balance_cents)
        .bind(expected)
        .bind(difference)
        .bind(now)
        .bind(SessionStatus::Open)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SessionClose::AlreadyClosed);
        }

        tx.commit().await?;

        debug!(
            session_id = %session_id,
            expected, difference,
            "Register session closed"
        );

        Ok(SessionClose::Closed(CashRegisterSession {
            status: SessionStatus::Closed,
            closing_balance_cents: Some(counted_balance_cents),
            expected_balance_cents: Some(expected),
            difference_cents: Some(difference),
            closed_at: Some(now),
            ..session
        }))
    }

    // -------------------------------------------------------------------------
    // Movements
    // -------------------------------------------------------------------------

    /// Appends a cash movement, guarded on the session being open.
    ///
    /// Returns false (and writes nothing) when the session is closed or
    /// missing at the instant of the write.
    pub async fn insert_movement(&self, movement: &CashMovement) -> DbResult<bool> {
        debug!(
            session_id = %movement.cash_register_session_id,
            movement_type = ?movement.movement_type,
            category = ?movement.category,
            amount = movement.amount_cents,
            "Recording cash movement"
        );

        let result = sqlx::query(
            "INSERT INTO cash_movements (
                id, cash_register_session_id, sale_id, movement_type,
                category, amount_cents, description, created_at
            ) \
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8 \
            WHERE EXISTS (SELECT 1 FROM cash_register_sessions \
                          WHERE id = ?2 AND status = ?9)",
        )
        .bind(&movement.id)
        .bind(&movement.cash_register_session_id)
        .bind(&movement.sale_id)
        .bind(movement.movement_type)
        .bind(movement.category)
        .bind(movement.amount_cents)
        .bind(&movement.description)
        .bind(movement.created_at)
        .bind(SessionStatus::Open)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Appends a per-sale movement at most once for its (sale, category).
    ///
    /// Same open-session guard as [`CashRepository::insert_movement`], plus a
    /// `NOT EXISTS` dedupe in the same statement so two concurrent reversal
    /// attempts cannot both append the offsetting entry. Returns false when
    /// nothing was written - the caller distinguishes "already present"
    /// (success) from "session closed" via [`CashRepository::has_sale_movement`].
    pub async fn insert_sale_movement_once(&self, movement: &CashMovement) -> DbResult<bool> {
        debug!(
            session_id = %movement.cash_register_session_id,
            sale_id = ?movement.sale_id,
            category = ?movement.category,
            "Recording deduplicated sale movement"
        );

        let result = sqlx::query(
            "INSERT INTO cash_movements (
                id, cash_register_session_id, sale_id, movement_type,
                category, amount_cents, description, created_at
            ) \
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8 \
            WHERE EXISTS (SELECT 1 FROM cash_register_sessions \
                          WHERE id = ?2 AND status = ?9) \
              AND NOT EXISTS (SELECT 1 FROM cash_movements \
                              WHERE sale_id = ?3 AND category = ?5)",
        )
        .bind(&movement.id)
        .bind(&movement.cash_register_session_id)
        .bind(&movement.sale_id)
        .bind(movement.movement_type)
        .bind(movement.category)
        .bind(movement.amount_cents)
        .bind(&movement.description)
        .bind(movement.created_at)
        .bind(SessionStatus::Open)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists all movements for a session, oldest first.
    pub async fn movements_for_session(&self, session_id: &str) -> DbResult<Vec<CashMovement>> {
        let movements = sqlx::query_as::<_, CashMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM cash_movements \
             WHERE cash_register_session_id = ?1 ORDER BY created_at, id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Sums a session's movements of one direction.
    pub async fn sum_movements(
        &self,
        session_id: &str,
        movement_type: MovementType,
    ) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM cash_movements \
             WHERE cash_register_session_id = ?1 AND movement_type = ?2",
        )
        .bind(session_id)
        .bind(movement_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    /// Total entrada amount recorded for a sale.
    pub async fn entrada_total_for_sale(&self, sale_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM cash_movements \
             WHERE sale_id = ?1 AND movement_type = ?2",
        )
        .bind(sale_id)
        .bind(MovementType::Entrada)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// Lists movements recorded for a sale, oldest first.
    pub async fn movements_for_sale(&self, sale_id: &str) -> DbResult<Vec<CashMovement>> {
        let movements = sqlx::query_as::<_, CashMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM cash_movements \
             WHERE sale_id = ?1 ORDER BY created_at, id"
        ))
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Whether a movement with the given category exists for a sale.
    ///
    /// Used to dedupe the offsetting entry of a retried cancellation.
    pub async fn has_sale_movement(
        &self,
        sale_id: &str,
        category: MovementCategory,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cash_movements WHERE sale_id = ?1 AND category = ?2",
        )
        .bind(sale_id)
        .bind(category)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

async fn sum_movements_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: &str,
    movement_type: MovementType,
) -> DbResult<i64> {
    let sum: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM cash_movements \
         WHERE cash_register_session_id = ?1 AND movement_type = ?2",
    )
    .bind(session_id)
    .bind(movement_type)
    .fetch_one(&mut **tx)
    .await?;

    Ok(sum)
}

/// Generates a new session ID.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new movement ID.
pub fn generate_movement_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn open_session(operator: &str, opening: i64) -> CashRegisterSession {
        CashRegisterSession {
            id: generate_session_id(),
            operator_id: operator.to_string(),
            status: SessionStatus::Open,
            opening_balance_cents: opening,
            closing_balance_cents: None,
            expected_balance_cents: None,
            difference_cents: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    fn movement(
        session_id: &str,
        movement_type: MovementType,
        category: MovementCategory,
        amount: i64,
    ) -> CashMovement {
        CashMovement {
            id: generate_movement_id(),
            cash_register_session_id: session_id.to_string(),
            sale_id: None,
            movement_type,
            category,
            amount_cents: amount,
            description: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_one_open_session_per_operator() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        db.cash()
            .insert_session(&open_session("op-1", 10000))
            .await
            .unwrap();

        let err = db
            .cash()
            .insert_session(&open_session("op-1", 5000))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // A different operator can open in parallel
        db.cash()
            .insert_session(&open_session("op-2", 5000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_computes_expected_and_difference() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = open_session("op-1", 10000);
        db.cash().insert_session(&session).await.unwrap();

        assert!(db
            .cash()
            .insert_movement(&movement(
                &session.id,
                MovementType::Entrada,
                MovementCategory::Venda,
                5000
            ))
            .await
            .unwrap());
        assert!(db
            .cash()
            .insert_movement(&movement(
                &session.id,
                MovementType::Saida,
                MovementCategory::Sangria,
                1000
            ))
            .await
            .unwrap());

        // opening 100.00 + entrada 50.00 − saida 10.00 = expected 140.00
        match db.cash().close_session(&session.id, 14000).await.unwrap() {
            SessionClose::Closed(closed) => {
                assert_eq!(closed.expected_balance_cents, Some(14000));
                assert_eq!(closed.difference_cents, Some(0));
                assert_eq!(closed.closing_balance_cents, Some(14000));
            }
            SessionClose::AlreadyClosed => panic!("expected Closed"),
        }

        // Second close is detected, not recomputed
        assert!(matches!(
            db.cash().close_session(&session.id, 14000).await.unwrap(),
            SessionClose::AlreadyClosed
        ));
    }

    #[tokio::test]
    async fn test_movement_rejected_on_closed_session() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = open_session("op-1", 0);
        db.cash().insert_session(&session).await.unwrap();
        db.cash().close_session(&session.id, 0).await.unwrap();

        let inserted = db
            .cash()
            .insert_movement(&movement(
                &session.id,
                MovementType::Entrada,
                MovementCategory::Venda,
                5000,
            ))
            .await
            .unwrap();
        assert!(!inserted);

        assert!(db
            .cash()
            .movements_for_session(&session.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_close_with_shortage() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = open_session("op-1", 10000);
        db.cash().insert_session(&session).await.unwrap();

        // counted 20.00 short of the expected 100.00
        match db.cash().close_session(&session.id, 8000).await.unwrap() {
            SessionClose::Closed(closed) => {
                assert_eq!(closed.expected_balance_cents, Some(10000));
                assert_eq!(closed.difference_cents, Some(-2000));
            }
            SessionClose::AlreadyClosed => panic!("expected Closed"),
        }
    }
}
