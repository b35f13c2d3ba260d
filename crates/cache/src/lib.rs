//! Shared staging cache of dispatchable jobs.
//!
//! The feeder fills EMPTY slots; scheduler instances scan PRESENT slots
//! without locking, claim the one they want, and leave it EMPTY once the
//! job is sent (or can never be sent) or PRESENT to retry later.

mod cache;
pub mod slot;

pub use cache::{ClaimGuard, JobCache};
pub use slot::{next_owner_id, JobEntry, OwnerId, SlotState, SlotView};
