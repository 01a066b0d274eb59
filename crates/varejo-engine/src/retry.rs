//! # Bounded Retry
//!
//! Transient storage errors (pool timeouts, SQLite lock contention) are
//! retried a small fixed number of times with a short backoff, then surfaced
//! as [`EngineError::StorageUnavailable`]. Everything else fails immediately.
//!
//! No operation in the engine polls or waits unboundedly.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, EngineResult};
use varejo_db::DbResult;

/// Maximum attempts per storage operation (1 initial + 2 retries).
pub(crate) const MAX_ATTEMPTS: u32 = 3;

/// Base backoff; attempt N sleeps N × this.
const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Runs a storage operation with bounded retry on transient errors.
///
/// The closure is invoked once per attempt and must return a future that
/// owns its captures (clone cheap repository handles into an `async move`
/// block at the call site).
pub(crate) async fn with_retry<T, F, Fut>(operation: &str, mut f: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(
                    operation,
                    attempt,
                    error = %err,
                    "Transient storage error, retrying"
                );
                tokio::time::sleep(BACKOFF_BASE * attempt).await;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(EngineError::StorageUnavailable { source: err });
            }
            Err(err) => return Err(err.into()),
        }
    }
}
