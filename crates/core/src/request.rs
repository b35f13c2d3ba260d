use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{AppId, HostId, UserId};

/// Hardware and history of the requesting host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: HostId,
    pub user_id: UserId,
    /// Free-form OS name as reported by the client ("Microsoft Windows 11", "Linux", ...).
    pub os_name: String,
    /// CPU vendor string ("GenuineIntel", "AuthenticAMD", "Apple", ...).
    pub p_vendor: String,
    #[serde(default)]
    pub p_model: String,
    pub p_ncpus: u32,
    /// Measured floating point speed per CPU.
    pub p_fpops: f64,
    #[serde(default)]
    pub n_gpus: u32,
    /// RAM the client allows jobs to use, in bytes.
    pub usable_ram: f64,
    /// Disk the client allows jobs to use, in bytes.
    pub usable_disk: f64,
    /// Measured download bandwidth in bytes/sec. 0 = not measured.
    #[serde(default)]
    pub n_bwdown: f64,
    #[serde(default)]
    pub total_credit: f64,
    #[serde(default)]
    pub error_rate: f64,
    /// Average seconds between send and report. 0 = no history.
    #[serde(default)]
    pub avg_turnaround: f64,
    /// Jobs sent to this host today, for the daily quota.
    #[serde(default)]
    pub results_today: u32,
}

/// A job the host says it is still working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedJob {
    pub result_name: String,
    pub app_id: AppId,
    pub report_deadline: DateTime<Utc>,
    /// Estimated seconds of computation left.
    pub estimated_remaining: f64,
}

/// Project preferences of the host's owner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppPrefs {
    /// Apps the user selected. `None` = all apps.
    #[serde(default)]
    pub selected_apps: Option<HashSet<AppId>>,
    /// Accept other apps when the selected ones have no work.
    #[serde(default)]
    pub allow_other_apps: bool,
    #[serde(default)]
    pub allow_beta_work: bool,
}

impl AppPrefs {
    pub fn is_selected(&self, app_id: AppId) -> bool {
        self.selected_apps
            .as_ref()
            .map_or(true, |apps| apps.contains(&app_id))
    }
}

/// One scheduler RPC from a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerRequest {
    pub host: HostInfo,
    pub platforms: Vec<String>,
    #[serde(default)]
    pub prefs: AppPrefs,
    /// Seconds of work the host asks for.
    pub work_req_seconds: f64,
    /// Seconds until the host's queue drains if nothing new is added.
    #[serde(default)]
    pub estimated_delay: f64,
    #[serde(default)]
    pub in_progress: Vec<ReportedJob>,
    /// Whether `in_progress` is a complete report (enables lost-work detection).
    #[serde(default = "default_true")]
    pub reports_in_progress: bool,
    /// Files the host already holds (locality scheduling).
    #[serde(default)]
    pub files_held: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl SchedulerRequest {
    pub fn reports_result(&self, result_name: &str) -> bool {
        self.in_progress.iter().any(|j| j.result_name == result_name)
    }

    pub fn holds_file(&self, file: &str) -> bool {
        self.files_held.iter().any(|f| f == file)
    }
}
