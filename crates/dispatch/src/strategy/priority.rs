use tracing::debug;

use volsched_core::LocalityMode;

use super::{scan_cache, ScanLimits, Strategy};
use crate::context::{RequestContext, ScanMode};
use crate::error::SchedError;
use crate::scheduler::Scheduler;

/// Ordered passes over the cache, most restrictive first:
///
/// 1. jobs needing a reliable host, if this host is reliable
/// 2. beta apps, if the user accepts beta work
/// 3. jobs that other hosts have already rejected
/// 4. locality-lite jobs whose files the host holds
/// 5. everything
/// 6. apps the user did not select, if pass 5 found nothing and the user allows it
pub struct PriorityScan;

impl Strategy for PriorityScan {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn run(&self, sched: &Scheduler, ctx: &mut RequestContext) -> Result<usize, SchedError> {
        let cache = sched.cache();
        let catalog = sched.catalog();
        let mut sent = 0;

        let mut passes = Vec::with_capacity(4);
        if ctx.reliable && cache.has_need_reliable() {
            passes.push(ScanMode::reliable_only());
        }
        if ctx.request.prefs.allow_beta_work && catalog.has_beta_app() {
            passes.push(ScanMode::beta_only());
        }
        if cache.has_infeasible() {
            passes.push(ScanMode::infeasible_only());
        }
        if !ctx.request.files_held.is_empty() && !catalog.apps_with_locality(LocalityMode::Lite).is_empty() {
            passes.push(ScanMode::locality_lite());
        }

        for mode in passes {
            if ctx.quota.is_met() {
                return Ok(sent);
            }
            let n = scan_cache(sched, ctx, mode, ScanLimits::default())?.sent;
            debug!(?mode, sent = n, "priority pass");
            sent += n;
        }

        if ctx.quota.is_met() {
            return Ok(sent);
        }
        let general = scan_cache(sched, ctx, ScanMode::general(), ScanLimits::default())?.sent;
        sent += general;

        let prefs = &ctx.request.prefs;
        if general == 0 && !ctx.quota.is_met() && prefs.allow_other_apps && prefs.selected_apps.is_some() {
            let n = scan_cache(sched, ctx, ScanMode::non_preferred(), ScanLimits::default())?.sent;
            debug!(sent = n, "non-preferred fallback");
            sent += n;
        }
        Ok(sent)
    }
}
