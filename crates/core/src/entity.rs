use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type WorkunitId = u64;
pub type ResultId = u64;
pub type HostId = u64;
pub type UserId = u64;
pub type AppId = u64;
pub type AppVersionId = u64;

/// Redundancy class code. `0` means "not yet bound".
pub type HrClass = i32;

pub const HR_UNBOUND: HrClass = 0;

/// Workunit error mask bits.
pub mod wu_error {
    pub const COULDNT_SEND_RESULT: u32 = 0x01;
    pub const TOO_MANY_ERRORS: u32 = 0x02;
    pub const TOO_MANY_SUCCESS: u32 = 0x04;
    pub const CANCELLED: u32 = 0x10;
}

/// A unit of computation. The cache holds a snapshot of this row; the
/// store holds the authoritative copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workunit {
    pub id: WorkunitId,
    pub name: String,
    pub app_id: AppId,
    /// Bytes of RAM the job needs.
    pub rsc_memory_bound: f64,
    /// Bytes of disk the job needs.
    pub rsc_disk_bound: f64,
    /// Download bandwidth (bytes/sec) the job needs. 0 = no requirement.
    #[serde(default)]
    pub rsc_bandwidth_bound: f64,
    /// Estimated floating point operations.
    pub rsc_fpops_est: f64,
    /// Seconds between send and report deadline.
    pub delay_bound: f64,
    #[serde(default)]
    pub hr_class: HrClass,
    /// Homogeneous app version binding. 0 = unbound.
    #[serde(default)]
    pub app_version_id: AppVersionId,
    #[serde(default)]
    pub error_mask: u32,
    #[serde(default)]
    pub canonical_result_id: ResultId,
    /// Input files, used by locality scheduling.
    #[serde(default)]
    pub input_files: Vec<String>,
    /// Assigned work: only this host may run it.
    #[serde(default)]
    pub target_host: Option<HostId>,
    /// Assigned work: only hosts of this user may run it.
    #[serde(default)]
    pub target_user: Option<UserId>,
}

impl Workunit {
    pub fn has_error(&self) -> bool {
        self.error_mask != 0
    }

    pub fn is_finished(&self) -> bool {
        self.has_error() || self.canonical_result_id != 0
    }

    pub fn references_file(&self, file: &str) -> bool {
        self.input_files.iter().any(|f| f == file)
    }
}

/// Server-side lifecycle of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultState {
    Unsent,
    InProgress,
    Over,
}

impl std::fmt::Display for ResultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultState::Unsent => write!(f, "Unsent"),
            ResultState::InProgress => write!(f, "InProgress"),
            ResultState::Over => write!(f, "Over"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultOutcome {
    Success,
    ClientError,
    NoReply,
    DidntNeed,
}

/// One host's attempt at a workunit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: ResultId,
    pub name: String,
    pub workunit_id: WorkunitId,
    pub app_id: AppId,
    pub server_state: ResultState,
    #[serde(default)]
    pub outcome: Option<ResultOutcome>,
    #[serde(default)]
    pub host_id: Option<HostId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub report_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_version_id: AppVersionId,
}

/// How an app uses locality scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LocalityMode {
    #[default]
    None,
    /// Jobs stay in the cache; hosts holding a job's file get a dedicated pass.
    Lite,
    /// Jobs are dispatched straight from the store by file affinity.
    Full,
}

/// Redundancy grouping granularity for an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HrType {
    #[default]
    None,
    /// OS family and CPU vendor.
    Fine,
    /// OS family only.
    Coarse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: String,
    #[serde(default)]
    pub beta: bool,
    /// Jobs need an established host (nonzero credit) unless the host is idle.
    #[serde(default)]
    pub hard: bool,
    /// Lightweight app: at most one job per host, no deadline check.
    #[serde(default)]
    pub non_cpu_intensive: bool,
    #[serde(default)]
    pub locality: LocalityMode,
    #[serde(default)]
    pub hr_type: HrType,
    #[serde(default)]
    pub homogeneous_app_version: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcType {
    #[default]
    Cpu,
    Gpu,
}

/// Resource profile of an app version running on a particular host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostUsage {
    pub proc_type: ProcType,
    pub avg_ncpus: f64,
    #[serde(default)]
    pub gpu_usage: f64,
    /// Flops the host is expected to deliver for this version. 0 = derive
    /// from the host's per-CPU speed.
    #[serde(default)]
    pub projected_flops: f64,
}

impl Default for HostUsage {
    fn default() -> Self {
        Self {
            proc_type: ProcType::Cpu,
            avg_ncpus: 1.0,
            gpu_usage: 0.0,
            projected_flops: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppVersion {
    pub id: AppVersionId,
    pub app_id: AppId,
    pub platform: String,
    pub version_num: u32,
    #[serde(default)]
    pub plan_class: Option<String>,
    #[serde(default)]
    pub usage: HostUsage,
}
