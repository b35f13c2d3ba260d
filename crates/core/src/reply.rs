use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{AppId, AppVersionId, HostUsage, ResultId, WorkunitId};

/// A job placed in the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedJob {
    pub result_id: ResultId,
    pub result_name: String,
    pub workunit_id: WorkunitId,
    pub workunit_name: String,
    pub app_id: AppId,
    pub app_version_id: AppVersionId,
    pub report_deadline: DateTime<Utc>,
    /// Estimated runtime on this host, in seconds.
    pub estimated_duration: f64,
    pub usage: HostUsage,
    /// True if this is lost work being re-sent.
    pub resent: bool,
}

/// Grouping for "why no work" messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageCategory {
    Memory,
    Disk,
    Bandwidth,
    Deadline,
    Policy,
    Other,
}

impl std::fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageCategory::Memory => write!(f, "memory"),
            MessageCategory::Disk => write!(f, "disk"),
            MessageCategory::Bandwidth => write!(f, "bandwidth"),
            MessageCategory::Deadline => write!(f, "deadline"),
            MessageCategory::Policy => write!(f, "policy"),
            MessageCategory::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub category: MessageCategory,
    pub app_id: Option<AppId>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerReply {
    pub jobs: Vec<DispatchedJob>,
    /// Files the host may delete (locality scheduling).
    pub files_to_delete: Vec<String>,
    pub messages: Vec<UserMessage>,
    /// Seconds the host should wait before its next request.
    pub request_delay: Option<f64>,
}

impl SchedulerReply {
    pub fn contains_workunit(&self, wu_id: WorkunitId) -> bool {
        self.jobs.iter().any(|j| j.workunit_id == wu_id)
    }

    pub fn messages_for(&self, category: MessageCategory) -> impl Iterator<Item = &UserMessage> {
        self.messages.iter().filter(move |m| m.category == category)
    }

    pub fn new_job_count(&self) -> usize {
        self.jobs.iter().filter(|j| !j.resent).count()
    }
}
