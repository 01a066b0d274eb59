//! # varejo-engine: Transaction Coordinators
//!
//! The orchestration layer of the sale transaction and inventory consistency
//! engine: everything between "cart of items" and a consistent database.
//!
//! ## Components
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           varejo-engine                                 │
//! │                                                                         │
//! │  ┌────────────┐   finalize    ┌─────────────┐   adjust   ┌──────────┐  │
//! │  │  Checkout  ├──────────────►│ StockLedger ├───────────►│varejo-db │  │
//! │  └─────┬──────┘               └──────┬──────┘            │          │  │
//! │        │ movements                   │ LowStockAlert     │ SQLite   │  │
//! │        ▼                             ▼ (broadcast)       │          │  │
//! │  ┌────────────┐               external subscribers       │          │  │
//! │  │  Register  ├──────────────────────────────────────────►          │  │
//! │  └────────────┘                                          │          │  │
//! │  ┌────────────┐   cancel                                 │          │  │
//! │  │Cancellation├──────────────────────────────────────────►          │  │
//! │  └────────────┘                                          └──────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//! - A successful `finalize` decremented stock by exactly the sold
//!   quantities and recorded cash for exactly the sale total - never
//!   partially.
//! - A failed `finalize` left no sale, no items and no net stock effect.
//! - `cancel` is idempotent: at most one restoration and one offsetting
//!   cash entry per sale, no matter how often (or concurrently) it runs.
//! - Stock can never be oversold: the floor check is atomic with the write.
//!
//! ## Usage
//! ```rust,ignore
//! use varejo_db::{Database, DbConfig};
//! use varejo_engine::Engine;
//!
//! let db = Database::new(DbConfig::new("./varejo.db")).await?;
//! let engine = Engine::new(db);
//!
//! let session = engine.register().open("operator-1", 10_000).await?;
//! let sale = engine.checkout().finalize(&request).await?;
//! engine.cancellation().cancel(&sale.id, "customer gave up").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cancel;
pub mod checkout;
pub mod error;
pub mod events;
pub mod register;
pub mod stock;

mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use cancel::Cancellation;
pub use checkout::{Checkout, CheckoutRequest, DraftRequest};
pub use error::{EngineError, EngineResult};
pub use events::LowStockAlert;
pub use register::Register;
pub use stock::{StockLedger, StockLevel};

use varejo_db::Database;

// =============================================================================
// Engine Facade
// =============================================================================

/// Entry point bundling the coordinators over one database.
///
/// Cheap to clone; all components share the same pool and the same low-stock
/// broadcast channel.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    ledger: StockLedger,
}

impl Engine {
    /// Creates an engine over an initialized database.
    pub fn new(db: Database) -> Self {
        let ledger = StockLedger::new(db.clone());
        Engine { db, ledger }
    }

    /// The underlying database handle, for read queries
    /// (sale history, adjustment history, session movements).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The stock ledger service.
    pub fn stock(&self) -> &StockLedger {
        &self.ledger
    }

    /// Checkout coordinator: drafts and finalization.
    pub fn checkout(&self) -> Checkout {
        Checkout::new(self.db.clone(), self.ledger.clone())
    }

    /// Cancellation coordinator.
    pub fn cancellation(&self) -> Cancellation {
        Cancellation::new(self.db.clone(), self.ledger.clone())
    }

    /// Register session coordinator.
    pub fn register(&self) -> Register {
        Register::new(self.db.clone())
    }

    /// Subscribes to low-stock alerts (see [`LowStockAlert`]).
    pub fn subscribe_low_stock(&self) -> tokio::sync::broadcast::Receiver<LowStockAlert> {
        self.ledger.subscribe()
    }
}
