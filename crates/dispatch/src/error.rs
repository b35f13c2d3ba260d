use thiserror::Error;

use volsched_core::CoreError;
use volsched_store::StoreError;

/// Errors that end a request. Infeasibility and lost races are not errors;
/// they are recorded on the request context and scanning continues.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] CoreError),
}
