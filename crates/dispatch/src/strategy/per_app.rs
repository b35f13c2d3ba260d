use tracing::debug;

use volsched_core::AppId;

use super::{scan_cache, ScanLimits, Strategy};
use crate::context::{RequestContext, ScanMode};
use crate::error::SchedError;
use crate::scheduler::Scheduler;

/// At most one job per lightweight (non-CPU-intensive) app per host.
///
/// Apps the host already runs are skipped. Jobs of one such app are
/// interchangeable, so the first infeasible one rules the app out for the
/// rest of the request.
pub struct PerAppScan;

impl Strategy for PerAppScan {
    fn name(&self) -> &'static str {
        "per-app"
    }

    fn run(&self, sched: &Scheduler, ctx: &mut RequestContext) -> Result<usize, SchedError> {
        let apps: Vec<AppId> = sched.catalog().non_cpu_intensive_apps().map(|a| a.id).collect();
        let mut sent = 0;
        for app_id in apps {
            if ctx.quota.is_met() {
                break;
            }
            let represented = ctx.request.in_progress.iter().any(|j| j.app_id == app_id)
                || ctx.reply.jobs.iter().any(|j| j.app_id == app_id);
            if represented || ctx.unsendable_apps.contains(&app_id) {
                continue;
            }
            let limits = ScanLimits {
                max_jobs: 1,
                stop_on_infeasible: true,
            };
            let summary = scan_cache(sched, ctx, ScanMode::single_app(app_id), limits)?;
            if summary.sent == 0 {
                if let Some(reason) = summary.first_rejection {
                    debug!(app_id, %reason, "app unsendable to this host");
                    ctx.unsendable_apps.insert(app_id);
                }
            }
            sent += summary.sent;
        }
        Ok(sent)
    }
}
