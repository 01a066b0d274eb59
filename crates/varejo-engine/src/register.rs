//! # Cash Register Sessions
//!
//! Open/close of operator shifts and the mid-shift cash operations
//! (sangria/suprimento).
//!
//! ## Reconciliation
//! ```text
//! open(operator, 100.00)
//!     entrada  venda       50.00     (finalization writes these)
//!     saida    sangria     10.00
//! close(counted = 140.00)
//!     expected   = 100.00 + 50.00 − 10.00 = 140.00
//!     difference = counted − expected     =   0.00
//! ```
//! A closed session accepts no further movements - the guard lives on the
//! movement INSERT itself, so finalization and cancellation cannot race a
//! close into writing onto a closed session.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::retry::with_retry;
use varejo_core::validation::{validate_amount_cents, validate_balance_cents, validate_external_id};
use varejo_core::{
    CashMovement, CashRegisterSession, MovementCategory, MovementType, SessionStatus,
};
use varejo_db::{Database, DbError, SessionClose};

/// Coordinates register session lifecycle and drawer operations.
#[derive(Debug, Clone)]
pub struct Register {
    db: Database,
}

impl Register {
    pub(crate) fn new(db: Database) -> Self {
        Register { db }
    }

    /// Opens a session for an operator.
    ///
    /// ## Errors
    /// - [`EngineError::RegisterAlreadyOpen`] - the operator already has an
    ///   open session (one session per operator-shift)
    pub async fn open(
        &self,
        operator_id: &str,
        opening_balance_cents: i64,
    ) -> EngineResult<CashRegisterSession> {
        validate_external_id("operator_id", operator_id)
            .map_err(varejo_core::CoreError::from)?;
        validate_balance_cents(opening_balance_cents).map_err(varejo_core::CoreError::from)?;

        let session = CashRegisterSession {
            id: Uuid::new_v4().to_string(),
            operator_id: operator_id.to_string(),
            status: SessionStatus::Open,
            opening_balance_cents,
            closing_balance_cents: None,
            expected_balance_cents: None,
            difference_cents: None,
            opened_at: Utc::now(),
            closed_at: None,
        };

        let inserted = with_retry("cash.insert_session", || {
            let repo = self.db.cash();
            let session = session.clone();
            async move { repo.insert_session(&session).await }
        })
        .await;

        match inserted {
            Ok(()) => {
                info!(
                    session_id = %session.id,
                    operator_id,
                    opening_balance = opening_balance_cents,
                    "Register session opened"
                );
                Ok(session)
            }
            Err(EngineError::Db(DbError::UniqueViolation { .. })) => {
                Err(EngineError::RegisterAlreadyOpen {
                    operator_id: operator_id.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Closes a session against a counted drawer balance.
    ///
    /// Computes `expected = opening + Σ entrada − Σ saida` and
    /// `difference = counted − expected`, then flips the session to closed.
    /// Exactly once: a second close fails with [`EngineError::SessionClosed`].
    pub async fn close(
        &self,
        session_id: &str,
        counted_balance_cents: i64,
    ) -> EngineResult<CashRegisterSession> {
        validate_balance_cents(counted_balance_cents).map_err(varejo_core::CoreError::from)?;

        let outcome = with_retry("cash.close_session", || {
            let repo = self.db.cash();
            let session_id = session_id.to_string();
            async move { repo.close_session(&session_id, counted_balance_cents).await }
        })
        .await?;

        match outcome {
            SessionClose::Closed(session) => {
                info!(
                    session_id,
                    expected = session.expected_balance_cents,
                    difference = session.difference_cents,
                    "Register session closed"
                );
                Ok(session)
            }
            SessionClose::AlreadyClosed => Err(EngineError::SessionClosed {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Records a mid-shift cash withdrawal (saida, category sangria).
    pub async fn withdraw(
        &self,
        session_id: &str,
        amount_cents: i64,
        description: Option<&str>,
    ) -> EngineResult<CashMovement> {
        self.drawer_movement(
            session_id,
            MovementType::Saida,
            MovementCategory::Sangria,
            amount_cents,
            description,
        )
        .await
    }

    /// Records a mid-shift cash top-up (entrada, category suprimento).
    pub async fn supply(
        &self,
        session_id: &str,
        amount_cents: i64,
        description: Option<&str>,
    ) -> EngineResult<CashMovement> {
        self.drawer_movement(
            session_id,
            MovementType::Entrada,
            MovementCategory::Suprimento,
            amount_cents,
            description,
        )
        .await
    }

    /// Gets a session by id.
    pub async fn get(&self, session_id: &str) -> EngineResult<CashRegisterSession> {
        self.db
            .cash()
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Finds the open session for an operator, if any.
    pub async fn find_open(&self, operator_id: &str) -> EngineResult<Option<CashRegisterSession>> {
        Ok(self.db.cash().find_open_for_operator(operator_id).await?)
    }

    async fn drawer_movement(
        &self,
        session_id: &str,
        movement_type: MovementType,
        category: MovementCategory,
        amount_cents: i64,
        description: Option<&str>,
    ) -> EngineResult<CashMovement> {
        validate_amount_cents(amount_cents).map_err(varejo_core::CoreError::from)?;

        let movement = CashMovement {
            id: Uuid::new_v4().to_string(),
            cash_register_session_id: session_id.to_string(),
            sale_id: None,
            movement_type,
            category,
            amount_cents,
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };

        let inserted = with_retry("cash.drawer_movement", || {
            let repo = self.db.cash();
            let movement = movement.clone();
            async move { repo.insert_movement(&movement).await }
        })
        .await?;

        if !inserted {
            // The guarded insert wrote nothing: closed or missing session
            return match self.db.cash().get_session(session_id).await? {
                Some(_) => Err(EngineError::SessionClosed {
                    session_id: session_id.to_string(),
                }),
                None => Err(EngineError::SessionNotFound(session_id.to_string())),
            };
        }

        info!(
            session_id,
            movement_type = ?movement.movement_type,
            category = ?movement.category,
            amount = amount_cents,
            "Drawer movement recorded"
        );

        Ok(movement)
    }
}
