//! Selection strategies. Each walks some source of candidates (the cache,
//! or the store for locality work) and sends what passes the quick filter
//! and the slow path, until the request's quota is met.

pub mod locality;
pub mod per_app;
pub mod priority;

use tracing::trace;

use volsched_cache::{JobEntry, SlotView};
use volsched_core::App;

use crate::commit::{commit_job, CommitOutcome};
use crate::context::{RequestContext, ScanMode};
use crate::error::SchedError;
use crate::feasibility::{quick_check, Candidate, Feasible, RejectReason};
use crate::scheduler::Scheduler;

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send what this strategy can. Returns the number of jobs sent.
    fn run(&self, sched: &Scheduler, ctx: &mut RequestContext) -> Result<usize, SchedError>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanLimits {
    pub max_jobs: usize,
    /// End the scan at the first rejection that counts as infeasible.
    pub stop_on_infeasible: bool,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_jobs: usize::MAX,
            stop_on_infeasible: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScanSummary {
    pub sent: usize,
    pub first_rejection: Option<RejectReason>,
}

/// One pass over the cache from a random offset.
pub(crate) fn scan_cache(
    sched: &Scheduler,
    ctx: &mut RequestContext,
    mode: ScanMode,
    limits: ScanLimits,
) -> Result<ScanSummary, SchedError> {
    let cache = sched.cache();
    let env = sched.filter_env();
    let mut summary = ScanSummary::default();

    for view in cache.iter_from(cache.random_offset()) {
        if ctx.quota.is_met() || summary.sent >= limits.max_jobs {
            break;
        }
        let Some(app) = sched.catalog().app(view.entry.workunit.app_id) else {
            continue;
        };
        let feasible = match quick_check(&env, ctx, &Candidate::from_view(&view), app, mode) {
            Ok(f) => f,
            Err(reason) => {
                trace!(slot = view.index, result_id = view.entry.result_id, %reason, "rejected");
                if reason.counts_as_infeasible() {
                    cache.note_infeasible(&view);
                    ctx.note_rejection(reason, &view.entry.workunit, app);
                    summary.first_rejection.get_or_insert(reason);
                    if limits.stop_on_infeasible {
                        break;
                    }
                }
                continue;
            }
        };
        if try_claimed(sched, ctx, &view, app, &feasible)? {
            summary.sent += 1;
        }
    }
    Ok(summary)
}

/// Claim the slot behind `view`, run the slow path and settle the slot.
fn try_claimed(
    sched: &Scheduler,
    ctx: &mut RequestContext,
    view: &SlotView,
    app: &App,
    feasible: &Feasible,
) -> Result<bool, SchedError> {
    let Some(mut guard) = sched.cache().claim(view, ctx.owner) else {
        return Ok(false);
    };
    // On a store error the guard puts the slot back as PRESENT.
    let entry = guard.entry().clone();
    match commit_job(sched, ctx, &entry, app, feasible)? {
        CommitOutcome::Sent => {
            guard.mark_sent();
            Ok(true)
        }
        CommitOutcome::Retry { reason, refreshed } => {
            trace!(slot = guard.index(), %reason, "slow path declined");
            if let Some(wu) = refreshed {
                guard.update_entry(|e| e.workunit = wu);
            }
            guard.release();
            Ok(false)
        }
        CommitOutcome::Drop { class, why } => {
            trace!(slot = guard.index(), %class, why, "dropping job from cache");
            guard.abandon();
            Ok(false)
        }
    }
}

/// Filter and commit a job that came straight from the store.
pub(crate) fn try_direct(
    sched: &Scheduler,
    ctx: &mut RequestContext,
    entry: &JobEntry,
    mode: ScanMode,
) -> Result<bool, SchedError> {
    let Some(app) = sched.catalog().app(entry.workunit.app_id) else {
        return Ok(false);
    };
    let feasible = match quick_check(&sched.filter_env(), ctx, &Candidate::direct(entry), app, mode) {
        Ok(f) => f,
        Err(reason) => {
            if reason.counts_as_infeasible() {
                ctx.note_rejection(reason, &entry.workunit, app);
            }
            return Ok(false);
        }
    };
    Ok(commit_job(sched, ctx, entry, app, &feasible)? == CommitOutcome::Sent)
}
