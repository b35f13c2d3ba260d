//! Will a job finish before its deadline on this host?
//!
//! Two bounds are tried: an optimistic one (shortened for jobs that want a
//! reliable host, when the host is reliable and the policy is on) and the
//! nominal one. With a reported workload the host's queue is replayed in
//! earliest-deadline-first order across its CPUs; otherwise the host's
//! estimated queue delay plus the job's duration must fit the bound.

use chrono::{DateTime, Utc};

use volsched_core::config::SchedConfig;
use volsched_core::{App, Workunit};

use crate::catalog::ChosenVersion;
use crate::context::RequestContext;
use crate::feasibility::RejectReason;

/// A job in the host's queue, for the EDF replay. Times are seconds from now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimJob {
    pub remaining: f64,
    pub deadline: f64,
}

/// Outcome of a successful deadline check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobEstimate {
    /// Seconds of computation on this host.
    pub duration: f64,
    /// Seconds from send to report deadline.
    pub delay_bound: f64,
}

/// `secs` as a chrono duration, millisecond precision. `None` if out of range.
pub fn span(secs: f64) -> Option<chrono::Duration> {
    let ms = (secs * 1000.0).round();
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(chrono::Duration::milliseconds(ms as i64))
}

/// `now + secs`, if that is a representable time.
pub fn deadline_after(now: DateTime<Utc>, secs: f64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(span(secs)?)
}

pub fn estimate_duration(wu: &Workunit, version: &ChosenVersion) -> f64 {
    let flops = version.usage.projected_flops;
    if flops <= 0.0 {
        return f64::INFINITY;
    }
    wu.rsc_fpops_est.max(0.0) / flops
}

/// (optimistic, pessimistic) delay bounds for a job.
pub fn delay_bounds(wu: &Workunit, need_reliable: bool, host_reliable: bool, config: &SchedConfig) -> (f64, f64) {
    let nominal = wu.delay_bound;
    match config.reduced_delay_fraction() {
        Some(f) if need_reliable && host_reliable => (nominal * f, nominal),
        _ => (nominal, nominal),
    }
}

/// Number of jobs that finish after their deadline when `jobs` run
/// earliest-deadline-first on `ncpus` processors.
pub fn edf_misses(jobs: &[SimJob], ncpus: usize) -> usize {
    let mut order: Vec<&SimJob> = jobs.iter().collect();
    order.sort_by(|a, b| a.deadline.total_cmp(&b.deadline));
    let mut free_at = vec![0.0_f64; ncpus.max(1)];
    let mut misses = 0;
    for job in order {
        let (cpu, start) = free_at
            .iter()
            .copied()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .unwrap_or((0, 0.0));
        let finish = start + job.remaining;
        free_at[cpu] = finish;
        if finish > job.deadline {
            misses += 1;
        }
    }
    misses
}

fn fits(ctx: &RequestContext, config: &SchedConfig, duration: f64, bound: f64) -> bool {
    if config.workload_sim && !ctx.request.in_progress.is_empty() {
        let before = edf_misses(&ctx.workload, ctx.ncpus());
        let mut with = ctx.workload.clone();
        with.push(SimJob { remaining: duration, deadline: bound });
        return edf_misses(&with, ctx.ncpus()) <= before;
    }
    ctx.estimated_delay + duration <= bound
}

/// Deadline feasibility of `wu` on the request's host.
pub fn check(
    ctx: &RequestContext,
    config: &SchedConfig,
    wu: &Workunit,
    app: &App,
    version: &ChosenVersion,
    need_reliable: bool,
) -> Result<JobEstimate, RejectReason> {
    let duration = estimate_duration(wu, version);
    let (optimistic, pessimistic) = delay_bounds(wu, need_reliable, ctx.reliable, config);
    if deadline_after(ctx.now, optimistic).is_none() || deadline_after(ctx.now, pessimistic).is_none() {
        return Err(RejectReason::Deadline);
    }

    if app.hard {
        // An idle host always gets one trial job, whatever its speed.
        if ctx.estimated_delay <= 0.0 {
            return Ok(JobEstimate { duration, delay_bound: pessimistic });
        }
        if ctx.host().total_credit <= 0.0 {
            return Err(RejectReason::HardAppNoCredit);
        }
    }

    if fits(ctx, config, duration, optimistic) {
        return Ok(JobEstimate { duration, delay_bound: optimistic });
    }
    if pessimistic > optimistic && fits(ctx, config, duration, pessimistic) {
        return Ok(JobEstimate { duration, delay_bound: pessimistic });
    }
    Err(RejectReason::Deadline)
}
