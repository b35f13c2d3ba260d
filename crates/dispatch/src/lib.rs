//! Job dispatch for a volunteer computing scheduler.
//!
//! For each host request: re-send lost work, then run the selection
//! strategies (one job per lightweight app, locality, priority passes over
//! the shared [`volsched_cache::JobCache`]) until the host's quota is met.
//! Candidates pass an in-memory [`feasibility::quick_check`] before the
//! storage-backed [`commit::commit_job`] makes the dispatch authoritative.

pub mod catalog;
pub mod commit;
pub mod context;
pub mod deadline;
pub mod error;
pub mod feasibility;
pub mod messages;
pub mod redundancy;
pub mod resend;
pub mod scheduler;
pub mod strategy;

pub use catalog::{Catalog, ChosenVersion};
pub use commit::CommitOutcome;
pub use context::{RequestContext, ScanMode, WorkQuota};
pub use error::SchedError;
pub use feasibility::{CustomCheck, RejectReason};
pub use scheduler::Scheduler;
pub use strategy::locality::{NoGenerator, WorkGenerator};
pub use strategy::Strategy;
