//! Human-readable "why no work" messages, at most one per resource
//! category per application per reply.

use std::collections::HashSet;

use volsched_core::{App, AppId, HostInfo, MessageCategory, UserMessage, Workunit};

use crate::feasibility::RejectReason;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Default)]
pub struct MessageLog {
    seen: HashSet<(MessageCategory, Option<AppId>)>,
    messages: Vec<UserMessage>,
}

impl MessageLog {
    /// Keep the message only if nothing was recorded yet for its
    /// (category, app) pair. Returns whether it was kept.
    pub fn note<F: FnOnce() -> String>(&mut self, category: MessageCategory, app_id: Option<AppId>, text: F) -> bool {
        if !self.seen.insert((category, app_id)) {
            return false;
        }
        self.messages.push(UserMessage {
            category,
            app_id,
            text: text(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<UserMessage> {
        self.messages
    }
}

/// Text shown to the volunteer for a rejected job.
pub fn describe(reason: RejectReason, host: &HostInfo, usable_disk: f64, wu: &Workunit, app: &App) -> String {
    match reason {
        RejectReason::Memory => format!(
            "{}: tasks need {:.2} GB of RAM but only {:.2} GB is usable",
            app.name,
            wu.rsc_memory_bound / GB,
            host.usable_ram / GB
        ),
        RejectReason::Disk => format!(
            "{}: tasks need {:.0} MB of disk space; you have {:.0} MB available",
            app.name,
            wu.rsc_disk_bound / MB,
            usable_disk / MB
        ),
        RejectReason::Bandwidth => format!(
            "{}: tasks need {:.0} KB/s download bandwidth; yours measures {:.0} KB/s",
            app.name,
            wu.rsc_bandwidth_bound / 1024.0,
            host.n_bwdown / 1024.0
        ),
        RejectReason::Deadline => format!(
            "{}: tasks would not finish within their {:.1} day deadline",
            app.name,
            wu.delay_bound / 86400.0
        ),
        RejectReason::HardAppNoCredit => format!(
            "{}: tasks are only sent to computers that have completed work before",
            app.name
        ),
        RejectReason::AppNotSelected => format!("{}: not selected in your project preferences", app.name),
        RejectReason::NoAppVersion | RejectReason::AppVersionMismatch => {
            format!("{}: no version of this application is available for your computer", app.name)
        }
        RejectReason::HrClassUnknown | RejectReason::HrClassMismatch => format!(
            "{}: remaining tasks are reserved for a different type of computer",
            app.name
        ),
        other => format!("{}: no tasks available ({:?})", app.name, other),
    }
}
