use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rand::Rng;
use tracing::{debug, warn};

use volsched_core::ResultId;

use crate::slot::{JobEntry, OwnerId, SlotState, SlotView, FEEDER_OWNER};

struct Slot {
    /// Encoded [`SlotState`]. The only field claimers contend on.
    state: AtomicU64,
    /// Bumped on every refill so a claimer can tell its snapshot went stale.
    generation: AtomicU64,
    /// Infeasible-attempt counter tagged with the generation it belongs to:
    /// low 32 bits of the generation in the high half, count in the low half.
    infeasible: AtomicU64,
    entry: RwLock<Option<Arc<JobEntry>>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU64::new(SlotState::Empty.encode()),
            generation: AtomicU64::new(0),
            infeasible: AtomicU64::new(pack_infeasible(0, 0)),
            entry: RwLock::new(None),
        }
    }

    fn state(&self) -> SlotState {
        SlotState::decode(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from.encode(), to.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn entry(&self) -> Option<Arc<JobEntry>> {
        self.entry.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_entry(&self, entry: Option<Arc<JobEntry>>) {
        *self.entry.write().unwrap_or_else(|e| e.into_inner()) = entry;
    }
}

fn generation_tag(generation: u64) -> u64 {
    generation & u64::from(u32::MAX)
}

fn pack_infeasible(generation: u64, count: u32) -> u64 {
    (generation_tag(generation) << 32) | u64::from(count)
}

/// The count, if `packed` belongs to `generation`.
fn unpack_infeasible(packed: u64, generation: u64) -> u32 {
    if packed >> 32 == generation_tag(generation) {
        packed as u32
    } else {
        0
    }
}

/// Fixed-capacity table of job slots shared by every scheduler instance.
///
/// Scanning is lock-free and may observe stale data. Exclusive access to a
/// slot is obtained with [`JobCache::claim`], which swaps the state tag
/// PRESENT → CLAIMED(owner) atomically and then rechecks the generation.
pub struct JobCache {
    slots: Vec<Slot>,
}

impl JobCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(Slot::state)
    }

    /// Uniformly random scan start, so concurrent instances don't all
    /// contend on the low indices.
    pub fn random_offset(&self) -> usize {
        if self.slots.is_empty() {
            return 0;
        }
        rand::thread_rng().gen_range(0..self.slots.len())
    }

    /// Snapshot of slot `index` if it is PRESENT.
    pub fn view(&self, index: usize) -> Option<SlotView> {
        let slot = self.slots.get(index)?;
        if slot.state() != SlotState::Present {
            return None;
        }
        let generation = slot.generation.load(Ordering::Acquire);
        let entry = slot.entry()?;
        let infeasible_count = unpack_infeasible(slot.infeasible.load(Ordering::Acquire), generation);
        // A refill between the two generation reads means `entry` may be torn.
        if slot.generation.load(Ordering::Acquire) != generation {
            return None;
        }
        Some(SlotView { index, generation, infeasible_count, entry })
    }

    /// Visit every PRESENT slot once, starting at `start` and wrapping around.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = SlotView> + '_ {
        let n = self.slots.len();
        (0..n).filter_map(move |i| self.view((start + i) % n))
    }

    /// First PRESENT slot from `start` whose snapshot satisfies `pred`.
    pub fn scan<P>(&self, start: usize, mut pred: P) -> Option<SlotView>
    where
        P: FnMut(&SlotView) -> bool,
    {
        self.iter_from(start).find(|v| pred(v))
    }

    /// Try to take exclusive ownership of the slot behind `view`.
    ///
    /// Returns `None` if another instance holds it, it was emptied, or it was
    /// refilled with a different job since the snapshot.
    pub fn claim(&self, view: &SlotView, owner: OwnerId) -> Option<ClaimGuard<'_>> {
        let slot = self.slots.get(view.index)?;
        if !slot.transition(SlotState::Present, SlotState::Claimed(owner)) {
            debug!(slot = view.index, "claim lost: slot not present");
            return None;
        }
        if slot.generation.load(Ordering::Acquire) != view.generation {
            debug!(slot = view.index, "claim lost: slot refilled since scan");
            slot.transition(SlotState::Claimed(owner), SlotState::Present);
            return None;
        }
        let Some(entry) = slot.entry() else {
            slot.transition(SlotState::Claimed(owner), SlotState::Empty);
            return None;
        };
        Some(ClaimGuard {
            cache: self,
            index: view.index,
            owner,
            entry,
            done: false,
        })
    }

    /// Count a failed feasibility check against the job, if it is still the same job.
    pub fn note_infeasible(&self, view: &SlotView) {
        let Some(slot) = self.slots.get(view.index) else {
            return;
        };
        let mut current = slot.infeasible.load(Ordering::Acquire);
        loop {
            // Tag check and increment are one CAS, so a refill in between
            // can't receive the previous job's count.
            if current >> 32 != generation_tag(view.generation) {
                return;
            }
            let next = pack_infeasible(view.generation, (current as u32).saturating_add(1));
            match slot
                .infeasible
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    // ── Feeder side ─────────────────────────────────────────────

    /// Place `entry` into the first EMPTY slot. Returns its index, or `None`
    /// if the cache is full.
    pub fn fill(&self, entry: JobEntry) -> Option<usize> {
        let entry = Arc::new(entry);
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.transition(SlotState::Empty, SlotState::Claimed(FEEDER_OWNER)) {
                continue;
            }
            slot.set_entry(Some(Arc::clone(&entry)));
            let generation = slot.generation.fetch_add(1, Ordering::AcqRel) + 1;
            slot.infeasible.store(pack_infeasible(generation, 0), Ordering::Release);
            slot.transition(SlotState::Claimed(FEEDER_OWNER), SlotState::Present);
            return Some(index);
        }
        None
    }

    pub fn contains_result(&self, result_id: ResultId) -> bool {
        self.slots.iter().any(|s| {
            s.state() != SlotState::Empty && s.entry().is_some_and(|e| e.result_id == result_id)
        })
    }

    pub fn present_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state() == SlotState::Present).count()
    }

    /// Whether any PRESENT job is flagged as needing a reliable host.
    pub fn has_need_reliable(&self) -> bool {
        self.iter_from(0).any(|v| v.entry.need_reliable)
    }

    /// Whether any PRESENT job has failed a feasibility check before.
    pub fn has_infeasible(&self) -> bool {
        self.iter_from(0).any(|v| v.infeasible_count > 0)
    }
}

/// Exclusive hold on one slot.
///
/// Dropping the guard without [`ClaimGuard::mark_sent`] or
/// [`ClaimGuard::abandon`] puts the job back as PRESENT, so an early return
/// or a propagated error never leaves a slot stuck in CLAIMED.
pub struct ClaimGuard<'a> {
    cache: &'a JobCache,
    index: usize,
    owner: OwnerId,
    entry: Arc<JobEntry>,
    done: bool,
}

impl ClaimGuard<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn entry(&self) -> &JobEntry {
        &self.entry
    }

    /// Rewrite the cached job while holding the claim (e.g. to record a
    /// redundancy class bound during validation).
    pub fn update_entry<F: FnOnce(&mut JobEntry)>(&mut self, f: F) {
        let mut updated = (*self.entry).clone();
        f(&mut updated);
        self.entry = Arc::new(updated);
        self.cache.slots[self.index].set_entry(Some(Arc::clone(&self.entry)));
    }

    /// The job went into a reply; the slot is free for the feeder.
    pub fn mark_sent(mut self) {
        self.finish(SlotState::Empty);
    }

    /// The job can never be sent; drop it from the cache.
    pub fn abandon(mut self) {
        self.finish(SlotState::Empty);
    }

    /// Put the job back for other hosts.
    pub fn release(mut self) {
        self.finish(SlotState::Present);
    }

    fn finish(&mut self, to: SlotState) {
        if self.done {
            return;
        }
        self.done = true;
        let slot = &self.cache.slots[self.index];
        if to == SlotState::Empty {
            slot.set_entry(None);
        }
        if !slot.transition(SlotState::Claimed(self.owner), to) {
            warn!(slot = self.index, owner = self.owner, "releasing a slot this owner no longer holds");
        }
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.finish(SlotState::Present);
    }
}
