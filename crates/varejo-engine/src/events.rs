//! # Engine Events
//!
//! Post-commit events published for external collaborators. The engine never
//! alerts anyone itself - notification/alerting subscribes here.

use serde::Serialize;

/// Published after a committed stock adjustment leaves a product at or below
/// its minimum stock level.
///
/// Delivered over a `tokio::sync::broadcast` channel: absent or slow
/// subscribers never block or fail the adjustment that produced the event.
#[derive(Debug, Clone, Serialize)]
pub struct LowStockAlert {
    pub product_id: String,
    /// On-hand quantity after the adjustment.
    pub quantity: i64,
    pub minimum_stock_level: i64,
}
