//! Slow path: re-check a candidate against the store and, if it still
//! holds, mark its result IN_PROGRESS and add it to the reply.
//!
//! The cache is only an optimization; everything here reads the
//! authoritative rows because another instance may have raced us.

use tracing::{debug, info, warn};

use volsched_cache::JobEntry;
use volsched_core::{
    App, DispatchedJob, ErrorClass, HrType, ResultOutcome, ResultState, Workunit, HR_UNBOUND,
};
use volsched_store::{Precondition, ResultQuery, ResultUpdate};

use crate::context::RequestContext;
use crate::deadline::deadline_after;
use crate::error::SchedError;
use crate::feasibility::{Feasible, RejectReason};
use crate::redundancy;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// In the reply; the result is IN_PROGRESS.
    Sent,
    /// Not for this host, but still sendable. `refreshed` is the current
    /// workunit row when the cached copy turned out stale.
    Retry {
        reason: RejectReason,
        refreshed: Option<Workunit>,
    },
    /// The job can never be sent from this entry.
    Drop { class: ErrorClass, why: &'static str },
}

fn inconsistent(why: &'static str) -> CommitOutcome {
    CommitOutcome::Drop {
        class: ErrorClass::StorageInconsistent,
        why,
    }
}

/// Validate `entry` against storage and commit it to the reply.
pub fn commit_job(
    sched: &Scheduler,
    ctx: &mut RequestContext,
    entry: &JobEntry,
    app: &App,
    feasible: &Feasible,
) -> Result<CommitOutcome, SchedError> {
    let store = sched.store();
    let config = &sched.config().scheduler;
    let host = ctx.host().clone();

    let Some(result) = store.result(entry.result_id)? else {
        warn!(result_id = entry.result_id, "result row vanished");
        return Ok(inconsistent("result row vanished"));
    };
    if result.server_state != ResultState::Unsent {
        warn!(result_id = result.id, state = %result.server_state, "already sent by another instance");
        return Ok(inconsistent("result no longer unsent"));
    }
    if result.workunit_id != entry.workunit.id {
        warn!(result_id = result.id, cached_wu = entry.workunit.id, stored_wu = result.workunit_id, "workunit id mismatch");
        return Ok(inconsistent("workunit id mismatch"));
    }

    let Some(mut wu) = store.workunit(result.workunit_id)? else {
        warn!(result_id = result.id, wu_id = result.workunit_id, "workunit row vanished");
        return Ok(inconsistent("workunit row vanished"));
    };
    if wu.is_finished() {
        let update = ResultUpdate {
            server_state: Some(ResultState::Over),
            outcome: Some(ResultOutcome::DidntNeed),
            ..ResultUpdate::default()
        };
        store.update_result(result.id, &Precondition::in_state(ResultState::Unsent), &update)?;
        info!(result_id = result.id, wu_id = wu.id, error_mask = wu.error_mask, "workunit finished; result not needed");
        return Ok(CommitOutcome::Drop {
            class: ErrorClass::StorageInconsistent,
            why: "workunit has an outcome",
        });
    }

    if config.one_result_per_user_per_wu {
        let q = ResultQuery::new().workunit(wu.id).user(host.user_id);
        if store.count_results(&q)? > 0 {
            return Ok(CommitOutcome::Retry {
                reason: RejectReason::AlreadySentToUser,
                refreshed: None,
            });
        }
    }
    if config.one_result_per_host_per_wu {
        let q = ResultQuery::new().workunit(wu.id).host(host.id);
        if store.count_results(&q)? > 0 {
            return Ok(CommitOutcome::Retry {
                reason: RejectReason::AlreadySentToHost,
                refreshed: None,
            });
        }
    }

    if app.hr_type != HrType::None {
        let class = redundancy::host_class(app.hr_type, &host);
        if let Err(reason) = redundancy::check(app.hr_type, wu.hr_class, class) {
            return Ok(CommitOutcome::Retry { reason, refreshed: Some(wu) });
        }
        if let (HR_UNBOUND, Some(class)) = (wu.hr_class, class) {
            match store.bind_hr_class(wu.id, class)? {
                None => {
                    warn!(wu_id = wu.id, "workunit row vanished");
                    return Ok(inconsistent("workunit row vanished"));
                }
                Some(bound) if bound != class => {
                    debug!(wu_id = wu.id, bound, class, "lost redundancy class race");
                    wu.hr_class = bound;
                    return Ok(CommitOutcome::Retry {
                        reason: RejectReason::HrClassMismatch,
                        refreshed: Some(wu),
                    });
                }
                Some(bound) => wu.hr_class = bound,
            }
        }
    }

    let av = feasible.version.app_version_id;
    if app.homogeneous_app_version {
        if wu.app_version_id != 0 && wu.app_version_id != av {
            return Ok(CommitOutcome::Retry {
                reason: RejectReason::AppVersionMismatch,
                refreshed: Some(wu),
            });
        }
        if wu.app_version_id == 0 {
            match store.bind_app_version(wu.id, av)? {
                None => {
                    warn!(wu_id = wu.id, "workunit row vanished");
                    return Ok(inconsistent("workunit row vanished"));
                }
                Some(bound) if bound != av => {
                    wu.app_version_id = bound;
                    return Ok(CommitOutcome::Retry {
                        reason: RejectReason::AppVersionMismatch,
                        refreshed: Some(wu),
                    });
                }
                Some(bound) => wu.app_version_id = bound,
            }
        }
    }

    let delay_bound = feasible.estimate.delay_bound;
    let Some(deadline) = deadline_after(ctx.now, delay_bound) else {
        warn!(result_id = result.id, delay_bound, "report deadline out of range");
        return Ok(CommitOutcome::Retry {
            reason: RejectReason::Deadline,
            refreshed: None,
        });
    };
    let update = ResultUpdate {
        server_state: Some(ResultState::InProgress),
        host_id: Some(host.id),
        user_id: Some(host.user_id),
        sent_time: Some(ctx.now),
        report_deadline: Some(deadline),
        app_version_id: Some(av),
        ..ResultUpdate::default()
    };
    let expect = Precondition::in_state(ResultState::Unsent).of_workunit(wu.id);
    if !store.update_result(result.id, &expect, &update)? {
        warn!(result_id = result.id, "conditional update refused");
        return Ok(inconsistent("lost the commit race"));
    }

    debug!(result_id = result.id, wu_id = wu.id, app = %app.name, delay_bound, "committed");
    let job = DispatchedJob {
        result_id: result.id,
        result_name: result.name,
        workunit_id: wu.id,
        workunit_name: wu.name.clone(),
        app_id: app.id,
        app_version_id: av,
        report_deadline: deadline,
        estimated_duration: feasible.estimate.duration,
        usage: feasible.version.usage.clone(),
        resent: false,
    };
    ctx.record_sent(job, &wu, delay_bound);
    Ok(CommitOutcome::Sent)
}
