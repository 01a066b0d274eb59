//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  varejo-engine                                                          │
//! │       │                                                                 │
//! │       │  db.stock().apply(&adjustment)                                  │
//! │       ▼                                                                 │
//! │  StockRepository                                                        │
//! │  ├── apply(&self, adjustment)      ← one transaction, check-and-write  │
//! │  ├── history(&self, product_id)                                        │
//! │  └── fold(&self, product_id)                                           │
//! │       │                                                                 │
//! │       ▼  SQL                                                            │
//! │  SQLite                                                                 │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • SQL is isolated in one place per aggregate                          │
//! │  • The engine stays free of query strings                              │
//! │  • Invariant-bearing writes live next to their guard queries           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Product reads and inserts
//! - [`stock::StockRepository`] - Append-only stock ledger writes and reads
//! - [`sale::SaleRepository`] - Sale, sale item and reversal-marker operations
//! - [`cash::CashRepository`] - Register sessions and cash movements

pub mod cash;
pub mod product;
pub mod sale;
pub mod stock;
