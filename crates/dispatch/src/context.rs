//! Per-request mutable state, threaded explicitly through every stage.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use volsched_cache::{next_owner_id, OwnerId};
use volsched_core::config::SchedConfig;
use volsched_core::{
    App, AppId, DispatchedJob, HostInfo, SchedulerReply, SchedulerRequest, Workunit, WorkunitId,
};

use crate::catalog::{Catalog, ChosenVersion};
use crate::deadline::SimJob;
use crate::feasibility::RejectReason;
use crate::messages::{self, MessageLog};

/// Which subset of the cache a scan pass may pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanMode {
    pub reliable_only: bool,
    pub beta_only: bool,
    pub infeasible_only: bool,
    pub locality_lite: bool,
    /// Ignore the user's app selection.
    pub non_preferred: bool,
    /// Restrict to one (non-CPU-intensive) app.
    pub only_app: Option<AppId>,
    /// Candidate did not come from a cache scan (locality, resend): no gates.
    pub direct: bool,
}

impl ScanMode {
    pub fn general() -> Self {
        Self::default()
    }

    pub fn reliable_only() -> Self {
        Self { reliable_only: true, ..Self::default() }
    }

    pub fn beta_only() -> Self {
        Self { beta_only: true, ..Self::default() }
    }

    pub fn infeasible_only() -> Self {
        Self { infeasible_only: true, ..Self::default() }
    }

    pub fn locality_lite() -> Self {
        Self { locality_lite: true, ..Self::default() }
    }

    pub fn non_preferred() -> Self {
        Self { non_preferred: true, ..Self::default() }
    }

    pub fn single_app(app_id: AppId) -> Self {
        Self { only_app: Some(app_id), ..Self::default() }
    }

    pub fn direct() -> Self {
        Self { direct: true, ..Self::default() }
    }
}

/// How much more work this request may receive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkQuota {
    pub jobs_left: u32,
    pub seconds_left: f64,
}

impl WorkQuota {
    pub fn for_request(request: &SchedulerRequest, config: &SchedConfig) -> Self {
        let ncpus = request.host.p_ncpus.max(1);
        let mut jobs = config.max_wus_to_send.saturating_mul(ncpus);
        if config.max_wus_in_progress > 0 {
            let cap = config.max_wus_in_progress.saturating_mul(ncpus);
            jobs = jobs.min(cap.saturating_sub(request.in_progress.len() as u32));
        }
        if config.daily_result_quota > 0 {
            let cap = config.daily_result_quota.saturating_mul(ncpus);
            jobs = jobs.min(cap.saturating_sub(request.host.results_today));
        }
        Self {
            jobs_left: jobs,
            seconds_left: request.work_req_seconds,
        }
    }

    pub fn is_met(&self) -> bool {
        self.jobs_left == 0 || self.seconds_left <= 0.0
    }

    fn consume(&mut self, seconds: f64) {
        self.jobs_left = self.jobs_left.saturating_sub(1);
        self.seconds_left -= seconds;
    }
}

pub struct RequestContext {
    pub request_id: Uuid,
    /// Claim owner id for cache slots taken by this request.
    pub owner: OwnerId,
    pub now: DateTime<Utc>,
    pub request: SchedulerRequest,
    pub reliable: bool,
    pub quota: WorkQuota,
    /// Disk left after the jobs already in the reply.
    pub usable_disk: f64,
    /// Seconds until the host's queue drains, including jobs in the reply.
    pub estimated_delay: f64,
    /// Reported in-progress jobs plus jobs in the reply, for the EDF simulation.
    pub workload: Vec<SimJob>,
    /// Best app version per app for this host.
    pub versions: HashMap<AppId, ChosenVersion>,
    pub sent_workunits: HashSet<WorkunitId>,
    /// Apps found unsendable by the single-job-per-app scan.
    pub unsendable_apps: HashSet<AppId>,
    pub messages: MessageLog,
    pub reply: SchedulerReply,
}

impl RequestContext {
    pub fn new(request: SchedulerRequest, catalog: &Catalog, config: &SchedConfig, now: DateTime<Utc>) -> Self {
        let host = &request.host;
        let reliable = host.avg_turnaround > 0.0
            && host.avg_turnaround <= config.reliable_max_avg_turnaround
            && host.error_rate <= config.reliable_max_error_rate;
        let versions = catalog
            .apps()
            .filter_map(|app| {
                catalog
                    .best_version(app.id, host, &request.platforms)
                    .map(|v| (app.id, v))
            })
            .collect();
        let workload = request
            .in_progress
            .iter()
            .map(|j| SimJob {
                remaining: j.estimated_remaining.max(0.0),
                deadline: (j.report_deadline - now).num_milliseconds() as f64 / 1000.0,
            })
            .collect();

        Self {
            request_id: Uuid::new_v4(),
            owner: next_owner_id(),
            now,
            reliable,
            quota: WorkQuota::for_request(&request, config),
            usable_disk: host.usable_disk,
            estimated_delay: request.estimated_delay.max(0.0),
            workload,
            versions,
            sent_workunits: HashSet::new(),
            unsendable_apps: HashSet::new(),
            messages: MessageLog::default(),
            reply: SchedulerReply::default(),
            request,
        }
    }

    pub fn host(&self) -> &HostInfo {
        &self.request.host
    }

    pub fn ncpus(&self) -> usize {
        self.request.host.p_ncpus.max(1) as usize
    }

    /// Account for a job placed in the reply.
    pub fn record_sent(&mut self, job: DispatchedJob, wu: &Workunit, delay_bound: f64) {
        let duration = job.estimated_duration;
        let share = job.usage.avg_ncpus.max(0.0) / self.ncpus() as f64;
        self.quota.consume(duration);
        self.usable_disk -= wu.rsc_disk_bound;
        self.estimated_delay += duration * share;
        self.workload.push(SimJob {
            remaining: duration,
            deadline: delay_bound,
        });
        self.sent_workunits.insert(wu.id);
        self.reply.jobs.push(job);
    }

    /// Record a failed check as a user message, once per category and app.
    pub fn note_rejection(&mut self, reason: RejectReason, wu: &Workunit, app: &App) {
        if !reason.counts_as_infeasible() {
            return;
        }
        let host = &self.request.host;
        let usable_disk = self.usable_disk;
        self.messages
            .note(reason.category(), Some(app.id), || messages::describe(reason, host, usable_disk, wu, app));
    }

    /// Finish the reply: attach messages and the request-delay hint.
    pub fn into_reply(self, config: &SchedConfig) -> SchedulerReply {
        let mut reply = self.reply;
        reply.messages = self.messages.into_messages();
        reply.request_delay = if reply.jobs.is_empty() {
            Some(config.no_work_delay.max(config.min_sendwork_interval))
        } else if config.min_sendwork_interval > 0.0 {
            Some(config.min_sendwork_interval)
        } else {
            None
        };
        reply
    }
}
