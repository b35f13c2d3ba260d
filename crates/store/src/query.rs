//! Row predicates and field updates for the result table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use volsched_core::{
    AppId, AppVersionId, HostId, ResultId, ResultOutcome, ResultRecord, ResultState, UserId,
    Workunit, WorkunitId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultOrder {
    #[default]
    IdAsc,
    IdDesc,
    NameAsc,
    CreatedAsc,
}

/// Conjunction of optional predicates over result rows. `None` fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultQuery {
    pub host_id: Option<HostId>,
    pub user_id: Option<UserId>,
    pub workunit_id: Option<WorkunitId>,
    pub state: Option<ResultState>,
    pub app_ids: Option<Vec<AppId>>,
    /// The result's workunit lists this input file.
    pub input_file: Option<String>,
    pub id_above: Option<ResultId>,
    pub name_from: Option<String>,
    pub created_before: Option<DateTime<Utc>>,
    pub order: ResultOrder,
    pub limit: Option<usize>,
}

impl ResultQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host_id: HostId) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn workunit(mut self, wu_id: WorkunitId) -> Self {
        self.workunit_id = Some(wu_id);
        self
    }

    pub fn state(mut self, state: ResultState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn apps(mut self, app_ids: Vec<AppId>) -> Self {
        self.app_ids = Some(app_ids);
        self
    }

    pub fn input_file(mut self, file: impl Into<String>) -> Self {
        self.input_file = Some(file.into());
        self
    }

    pub fn id_above(mut self, id: ResultId) -> Self {
        self.id_above = Some(id);
        self
    }

    pub fn name_from(mut self, name: impl Into<String>) -> Self {
        self.name_from = Some(name.into());
        self
    }

    pub fn created_before(mut self, t: DateTime<Utc>) -> Self {
        self.created_before = Some(t);
        self
    }

    pub fn order(mut self, order: ResultOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Evaluate the predicate against a row and its workunit.
    pub fn matches(&self, r: &ResultRecord, wu: Option<&Workunit>) -> bool {
        if self.host_id.is_some_and(|h| r.host_id != Some(h)) {
            return false;
        }
        if self.user_id.is_some_and(|u| r.user_id != Some(u)) {
            return false;
        }
        if self.workunit_id.is_some_and(|w| r.workunit_id != w) {
            return false;
        }
        if self.state.is_some_and(|s| r.server_state != s) {
            return false;
        }
        if let Some(apps) = &self.app_ids {
            if !apps.contains(&r.app_id) {
                return false;
            }
        }
        if let Some(file) = &self.input_file {
            if !wu.is_some_and(|w| w.references_file(file)) {
                return false;
            }
        }
        if self.id_above.is_some_and(|min| r.id <= min) {
            return false;
        }
        if let Some(from) = &self.name_from {
            if r.name.as_str() < from.as_str() {
                return false;
            }
        }
        if self.created_before.is_some_and(|t| r.created_at >= t) {
            return false;
        }
        true
    }
}

/// Fields to overwrite on a result row. `None` leaves the column alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultUpdate {
    pub server_state: Option<ResultState>,
    pub outcome: Option<ResultOutcome>,
    pub host_id: Option<HostId>,
    pub user_id: Option<UserId>,
    pub sent_time: Option<DateTime<Utc>>,
    pub report_deadline: Option<DateTime<Utc>>,
    pub app_version_id: Option<AppVersionId>,
}

impl ResultUpdate {
    pub fn apply(&self, r: &mut ResultRecord) {
        if let Some(s) = self.server_state {
            r.server_state = s;
        }
        if let Some(o) = self.outcome {
            r.outcome = Some(o);
        }
        if let Some(h) = self.host_id {
            r.host_id = Some(h);
        }
        if let Some(u) = self.user_id {
            r.user_id = Some(u);
        }
        if let Some(t) = self.sent_time {
            r.sent_time = Some(t);
        }
        if let Some(d) = self.report_deadline {
            r.report_deadline = Some(d);
        }
        if let Some(av) = self.app_version_id {
            r.app_version_id = av;
        }
    }
}

/// Row state an update requires. The update is applied only if the row
/// still matches, inside the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    pub state: ResultState,
    pub workunit_id: Option<WorkunitId>,
    pub host_id: Option<HostId>,
}

impl Precondition {
    pub fn in_state(state: ResultState) -> Self {
        Self { state, workunit_id: None, host_id: None }
    }

    pub fn of_workunit(mut self, wu_id: WorkunitId) -> Self {
        self.workunit_id = Some(wu_id);
        self
    }

    pub fn on_host(mut self, host_id: HostId) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn holds(&self, r: &ResultRecord) -> bool {
        r.server_state == self.state
            && self.workunit_id.map_or(true, |w| r.workunit_id == w)
            && self.host_id.map_or(true, |h| r.host_id == Some(h))
    }
}
