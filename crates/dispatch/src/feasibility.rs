//! The quick filter: an in-memory verdict on whether a cached job could run
//! on the requesting host. No storage access; checks run cheapest first and
//! stop at the first failure.

use volsched_cache::{JobEntry, SlotView};
use volsched_core::config::SchedConfig;
use volsched_core::{App, ErrorClass, LocalityMode, MessageCategory, Workunit};

use crate::catalog::{Catalog, ChosenVersion};
use crate::context::{RequestContext, ScanMode};
use crate::deadline::{self, JobEstimate};
use crate::redundancy;

/// Why a job can't go to this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Outside the current pass's subset of the cache.
    ScanMode,
    AppNotSelected,
    /// Assigned to another host or user.
    NotTargeted,
    HrClassUnknown,
    HrClassMismatch,
    NoAppVersion,
    AppVersionMismatch,
    AlreadyInReply,
    Memory,
    Disk,
    Bandwidth,
    Deadline,
    HardAppNoCredit,
    AlreadySentToUser,
    AlreadySentToHost,
    /// Rejected by the project's extra predicate, with its code.
    Custom(i32),
}

impl RejectReason {
    pub fn code(&self) -> i32 {
        match self {
            RejectReason::ScanMode => 1,
            RejectReason::AppNotSelected => 2,
            RejectReason::NotTargeted => 3,
            RejectReason::HrClassUnknown => 4,
            RejectReason::HrClassMismatch => 5,
            RejectReason::NoAppVersion => 6,
            RejectReason::AppVersionMismatch => 7,
            RejectReason::AlreadyInReply => 8,
            RejectReason::Memory => 9,
            RejectReason::Disk => 10,
            RejectReason::Bandwidth => 11,
            RejectReason::Deadline => 12,
            RejectReason::HardAppNoCredit => 13,
            RejectReason::AlreadySentToUser => 14,
            RejectReason::AlreadySentToHost => 15,
            RejectReason::Custom(c) => *c,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            RejectReason::Memory
            | RejectReason::Disk
            | RejectReason::Bandwidth
            | RejectReason::Deadline
            | RejectReason::HardAppNoCredit => ErrorClass::ResourceInfeasible,
            RejectReason::ScanMode
            | RejectReason::AppNotSelected
            | RejectReason::NotTargeted
            | RejectReason::HrClassUnknown
            | RejectReason::HrClassMismatch
            | RejectReason::NoAppVersion
            | RejectReason::AppVersionMismatch => ErrorClass::PolicyInfeasible,
            RejectReason::AlreadyInReply | RejectReason::AlreadySentToUser | RejectReason::AlreadySentToHost => {
                ErrorClass::Duplicate
            }
            RejectReason::Custom(_) => ErrorClass::Custom,
        }
    }

    pub fn category(&self) -> MessageCategory {
        match self {
            RejectReason::Memory => MessageCategory::Memory,
            RejectReason::Disk => MessageCategory::Disk,
            RejectReason::Bandwidth => MessageCategory::Bandwidth,
            RejectReason::Deadline | RejectReason::HardAppNoCredit => MessageCategory::Deadline,
            RejectReason::AppNotSelected
            | RejectReason::HrClassUnknown
            | RejectReason::HrClassMismatch
            | RejectReason::NoAppVersion
            | RejectReason::AppVersionMismatch => MessageCategory::Policy,
            _ => MessageCategory::Other,
        }
    }

    /// Whether the failure counts against the job's infeasible-attempt
    /// counter. Pass gates, assignment and duplicates say nothing about
    /// how hard the job is to place.
    pub fn counts_as_infeasible(&self) -> bool {
        !matches!(
            self,
            RejectReason::ScanMode
                | RejectReason::NotTargeted
                | RejectReason::AlreadyInReply
                | RejectReason::AlreadySentToUser
                | RejectReason::AlreadySentToHost
        )
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Custom(c) => write!(f, "custom({c})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Project-supplied predicate, evaluated after every built-in check.
pub trait CustomCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `Err(code)` rejects the job.
    fn check(&self, ctx: &RequestContext, wu: &Workunit, app: &App) -> Result<(), i32>;
}

/// A job under consideration, as seen by the filter.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub entry: &'a JobEntry,
    pub infeasible_count: u32,
}

impl<'a> Candidate<'a> {
    pub fn from_view(view: &'a SlotView) -> Self {
        Self {
            entry: &view.entry,
            infeasible_count: view.infeasible_count,
        }
    }

    /// A job that did not come from the cache.
    pub fn direct(entry: &'a JobEntry) -> Self {
        Self { entry, infeasible_count: 0 }
    }
}

/// What a passing job needs for commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Feasible {
    pub estimate: JobEstimate,
    pub version: ChosenVersion,
}

/// Shared, read-only inputs of the filter.
#[derive(Clone, Copy)]
pub struct FilterEnv<'a> {
    pub catalog: &'a Catalog,
    pub config: &'a SchedConfig,
    pub custom: Option<&'a dyn CustomCheck>,
}

fn check_mode(ctx: &RequestContext, cand: &Candidate<'_>, app: &App, mode: ScanMode) -> Result<(), RejectReason> {
    if mode.direct {
        return Ok(());
    }
    let wu = &cand.entry.workunit;
    let gated = (mode.reliable_only && !cand.entry.need_reliable)
        || (mode.beta_only && !app.beta)
        || (mode.infeasible_only && cand.infeasible_count == 0)
        || (mode.locality_lite
            && (app.locality != LocalityMode::Lite || !wu.input_files.iter().any(|f| ctx.request.holds_file(f))))
        || mode.only_app.is_some_and(|id| id != app.id)
        // Cached beta jobs go out only in the beta pass. Full-locality jobs
        // are never cached, so the locality strategy still reaches them.
        || (app.beta && !mode.beta_only && mode.only_app.is_none() && app.locality != LocalityMode::Full)
        // Lightweight apps only go out through their own one-per-app scan.
        || (mode.only_app.is_none() && app.non_cpu_intensive);
    if gated {
        Err(RejectReason::ScanMode)
    } else {
        Ok(())
    }
}

fn check_selection(ctx: &RequestContext, wu: &Workunit, app: &App, mode: ScanMode) -> Result<(), RejectReason> {
    let host = ctx.host();
    if wu.target_host.is_some_and(|h| h != host.id) || wu.target_user.is_some_and(|u| u != host.user_id) {
        return Err(RejectReason::NotTargeted);
    }
    let prefs = &ctx.request.prefs;
    if app.beta && !prefs.allow_beta_work {
        return Err(RejectReason::AppNotSelected);
    }
    // Assigned work ignores preferences.
    let assigned = wu.target_host.is_some() || wu.target_user.is_some();
    if !assigned && !mode.direct && !mode.non_preferred && !prefs.is_selected(app.id) {
        return Err(RejectReason::AppNotSelected);
    }
    Ok(())
}

fn check_version(env: &FilterEnv<'_>, ctx: &RequestContext, wu: &Workunit, app: &App) -> Result<ChosenVersion, RejectReason> {
    let best = ctx.versions.get(&app.id).ok_or(RejectReason::NoAppVersion)?;
    if !app.homogeneous_app_version || wu.app_version_id == 0 || wu.app_version_id == best.app_version_id {
        return Ok(best.clone());
    }
    // Bound to another version: usable only if this host can run that one too.
    match env.catalog.version(wu.app_version_id) {
        Some(v) if v.app_id == app.id && Catalog::can_run(v, ctx.host(), &ctx.request.platforms) => {
            Ok(Catalog::resolve(v, ctx.host()))
        }
        _ => Err(RejectReason::AppVersionMismatch),
    }
}

/// Run every in-memory check on `cand` for the request's host.
///
/// Pure: the same (context, job, mode) always gives the same verdict.
pub fn quick_check(
    env: &FilterEnv<'_>,
    ctx: &RequestContext,
    cand: &Candidate<'_>,
    app: &App,
    mode: ScanMode,
) -> Result<Feasible, RejectReason> {
    let wu = &cand.entry.workunit;
    let host = ctx.host();

    check_mode(ctx, cand, app, mode)?;
    check_selection(ctx, wu, app, mode)?;
    redundancy::check(app.hr_type, wu.hr_class, redundancy::host_class(app.hr_type, host))?;
    let version = check_version(env, ctx, wu, app)?;

    if ctx.sent_workunits.contains(&wu.id) || ctx.reply.jobs.iter().any(|j| j.result_id == cand.entry.result_id) {
        return Err(RejectReason::AlreadyInReply);
    }
    if wu.rsc_memory_bound > host.usable_ram {
        return Err(RejectReason::Memory);
    }
    if wu.rsc_disk_bound > ctx.usable_disk {
        return Err(RejectReason::Disk);
    }
    if host.n_bwdown > 0.0 && wu.rsc_bandwidth_bound > host.n_bwdown {
        return Err(RejectReason::Bandwidth);
    }

    let estimate = if app.non_cpu_intensive {
        JobEstimate {
            duration: deadline::estimate_duration(wu, &version),
            delay_bound: wu.delay_bound,
        }
    } else {
        deadline::check(ctx, env.config, wu, app, &version, cand.entry.need_reliable)?
    };

    if let Some(custom) = env.custom {
        custom.check(ctx, wu, app).map_err(RejectReason::Custom)?;
    }
    Ok(Feasible { estimate, version })
}
