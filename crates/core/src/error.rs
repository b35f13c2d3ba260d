use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of why a job could not go to a host.
///
/// Only [`ErrorClass::StorageInconsistent`] says anything about the job
/// itself; the others are verdicts about a (host, job) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Memory, disk, bandwidth or deadline.
    ResourceInfeasible,
    /// App not selected, redundancy class or app version mismatch, assigned-work filter.
    PolicyInfeasible,
    /// Already queued in this reply, or already sent to this user/host.
    Duplicate,
    /// Row vanished or changed underneath us; another instance won a race.
    StorageInconsistent,
    /// Project-supplied predicate.
    Custom,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::ResourceInfeasible => write!(f, "RESOURCE_INFEASIBLE"),
            ErrorClass::PolicyInfeasible => write!(f, "POLICY_INFEASIBLE"),
            ErrorClass::Duplicate => write!(f, "DUPLICATE"),
            ErrorClass::StorageInconsistent => write!(f, "STORAGE_INCONSISTENT"),
            ErrorClass::Custom => write!(f, "CUSTOM"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
