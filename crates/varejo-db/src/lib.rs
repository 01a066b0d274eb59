//! # varejo-db: Database Layer
//!
//! SQLite persistence for the sale/stock/cash engine, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Varejo Data Flow                                 │
//! │                                                                         │
//! │  varejo-engine (finalize / cancel / adjust / open / close)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     varejo-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │  product      │    │  (embedded)  │  │   │
//! │  │   │               │    │  stock        │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│  sale         │    │ 001_init.sql │  │   │
//! │  │   │ Management    │    │  cash         │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL mode, foreign keys on)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (product, stock, sale, cash)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use varejo_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/varejo.db")).await?;
//! let product = db.products().get_by_id("uuid-here").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::cash::{CashRepository, SessionClose};
pub use repository::product::ProductRepository;
pub use repository::sale::{ReversalClaim, SaleRepository};
pub use repository::stock::{NewStockAdjustment, StockRepository, StockWrite};
