use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use volsched_core::{ResultId, Workunit};

/// Identifies the scheduler instance holding a claim.
pub type OwnerId = u64;

/// Owner id used by the feeder while it writes a slot.
pub const FEEDER_OWNER: OwnerId = 0;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique claim owner id for one request.
pub fn next_owner_id() -> OwnerId {
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    Empty,
    Present,
    Claimed(OwnerId),
}

const TAG_EMPTY: u64 = 0;
const TAG_PRESENT: u64 = 1;
const TAG_CLAIMED_BASE: u64 = 2;

impl SlotState {
    pub(crate) fn encode(self) -> u64 {
        match self {
            SlotState::Empty => TAG_EMPTY,
            SlotState::Present => TAG_PRESENT,
            SlotState::Claimed(owner) => TAG_CLAIMED_BASE + owner,
        }
    }

    pub(crate) fn decode(tag: u64) -> Self {
        match tag {
            TAG_EMPTY => SlotState::Empty,
            TAG_PRESENT => SlotState::Present,
            t => SlotState::Claimed(t - TAG_CLAIMED_BASE),
        }
    }
}

/// A job staged for dispatch: one unsent result plus a snapshot of its workunit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub result_id: ResultId,
    pub result_name: String,
    pub workunit: Workunit,
    /// Only reliable hosts should get this job early (e.g. a retry of a failed result).
    #[serde(default)]
    pub need_reliable: bool,
    pub inserted_at: DateTime<Utc>,
}

/// Unlocked snapshot of a PRESENT slot, taken during a scan.
///
/// May be stale by the time it is used; [`crate::JobCache::claim`] rechecks.
#[derive(Debug, Clone)]
pub struct SlotView {
    pub index: usize,
    pub generation: u64,
    pub infeasible_count: u32,
    pub entry: std::sync::Arc<JobEntry>,
}
