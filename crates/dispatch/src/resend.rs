//! Lost work: results the store has IN_PROGRESS on this host that the host
//! no longer reports. They are re-sent with a fresh deadline if that
//! deadline can still be met, and expired otherwise.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use volsched_cache::JobEntry;
use volsched_core::{DispatchedJob, ResultRecord, ResultState};
use volsched_store::{Precondition, ResultQuery, ResultUpdate};

use crate::context::{RequestContext, ScanMode};
use crate::deadline::deadline_after;
use crate::error::SchedError;
use crate::feasibility::{quick_check, Candidate, RejectReason};
use crate::scheduler::Scheduler;

/// New report deadline for a lost result: now plus half its original
/// window, never earlier than the original deadline and never later than
/// a full delay bound from now.
pub fn new_deadline(result: &ResultRecord, delay_bound: f64, now: DateTime<Utc>) -> DateTime<Utc> {
    let sent = result.sent_time.unwrap_or(now);
    let original = result.report_deadline.unwrap_or(now);
    let estimate = now.checked_add_signed((original - sent) / 2).unwrap_or(original);
    let deadline = estimate.max(original);
    match deadline_after(now, delay_bound) {
        Some(cap) => deadline.min(cap),
        None => deadline,
    }
}

fn expire(sched: &Scheduler, ctx: &RequestContext, result: &ResultRecord) -> Result<(), SchedError> {
    let update = ResultUpdate {
        report_deadline: Some(ctx.now - chrono::Duration::seconds(1)),
        ..ResultUpdate::default()
    };
    let expect = Precondition::in_state(ResultState::InProgress).on_host(ctx.host().id);
    if sched.store().update_result(result.id, &expect, &update)? {
        info!(result_id = result.id, "expired lost result");
    }
    Ok(())
}

/// Re-send or expire every lost result of the requesting host. Returns the
/// number re-sent.
pub fn resend_lost(sched: &Scheduler, ctx: &mut RequestContext) -> Result<usize, SchedError> {
    if !sched.config().scheduler.resend_lost_results || !ctx.request.reports_in_progress {
        return Ok(0);
    }
    let store = sched.store();
    let q = ResultQuery::new().host(ctx.host().id).state(ResultState::InProgress);
    let lost: Vec<ResultRecord> = store
        .find_results(&q)?
        .into_iter()
        .filter(|r| !ctx.request.reports_result(&r.name))
        .collect();
    if lost.is_empty() {
        return Ok(0);
    }
    debug!(count = lost.len(), "host lost results");

    let mut resent = 0;
    for result in lost {
        if ctx.quota.is_met() {
            break;
        }
        let Some(wu) = store.workunit(result.workunit_id)? else {
            warn!(result_id = result.id, wu_id = result.workunit_id, "lost result has no workunit");
            continue;
        };
        if wu.is_finished() {
            expire(sched, ctx, &result)?;
            continue;
        }
        let Some(app) = sched.catalog().app(wu.app_id) else {
            continue;
        };

        let deadline = new_deadline(&result, wu.delay_bound, ctx.now);
        let window = (deadline - ctx.now).num_milliseconds() as f64 / 1000.0;
        // Filter against the remaining window rather than the nominal bound.
        let mut candidate = wu.clone();
        candidate.delay_bound = window;
        let entry = JobEntry {
            result_id: result.id,
            result_name: result.name.clone(),
            workunit: candidate,
            need_reliable: false,
            inserted_at: result.created_at,
        };
        let feasible = match quick_check(&sched.filter_env(), ctx, &Candidate::direct(&entry), app, ScanMode::direct()) {
            Ok(f) => f,
            Err(RejectReason::Deadline) => {
                expire(sched, ctx, &result)?;
                continue;
            }
            Err(reason) => {
                debug!(result_id = result.id, %reason, "lost result not resendable now");
                ctx.note_rejection(reason, &wu, app);
                continue;
            }
        };

        let update = ResultUpdate {
            sent_time: Some(ctx.now),
            report_deadline: Some(deadline),
            ..ResultUpdate::default()
        };
        let expect = Precondition::in_state(ResultState::InProgress)
            .of_workunit(wu.id)
            .on_host(ctx.host().id);
        if !store.update_result(result.id, &expect, &update)? {
            continue;
        }

        info!(result_id = result.id, wu_id = wu.id, %deadline, "resending lost result");
        let job = DispatchedJob {
            result_id: result.id,
            result_name: result.name.clone(),
            workunit_id: wu.id,
            workunit_name: wu.name.clone(),
            app_id: app.id,
            app_version_id: if result.app_version_id != 0 {
                result.app_version_id
            } else {
                feasible.version.app_version_id
            },
            report_deadline: deadline,
            estimated_duration: feasible.estimate.duration,
            usage: feasible.version.usage,
            resent: true,
        };
        ctx.record_sent(job, &wu, window);
        resent += 1;
    }
    Ok(resent)
}
