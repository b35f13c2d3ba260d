//! Store error types.

use thiserror::Error;

/// Failures of the storage layer itself. Any of these ends the current
/// request; row-level surprises (missing rows, lost races) are not errors
/// and show up as `None` / `false` return values instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
