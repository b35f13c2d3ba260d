//! The storage contract the scheduler relies on.

use volsched_core::{AppVersionId, HrClass, ResultId, ResultRecord, Workunit, WorkunitId};

use crate::error::StoreError;
use crate::query::{Precondition, ResultQuery, ResultUpdate};

/// Row-level access to workunits and results.
///
/// Every method is one short transaction. Implementations must make
/// [`SchedulerStore::update_result`] and the `bind_*` methods atomic with
/// respect to their precondition: that is what keeps a result from being
/// sent twice when several scheduler instances race on the same job.
pub trait SchedulerStore: Send + Sync {
    fn workunit(&self, id: WorkunitId) -> Result<Option<Workunit>, StoreError>;

    fn result(&self, id: ResultId) -> Result<Option<ResultRecord>, StoreError>;

    fn find_results(&self, query: &ResultQuery) -> Result<Vec<ResultRecord>, StoreError>;

    /// Count rows matching `query`, ignoring its order and limit.
    fn count_results(&self, query: &ResultQuery) -> Result<u64, StoreError>;

    /// Apply `update` if the row still satisfies `expect`.
    ///
    /// Returns `Ok(false)` if the row is missing or the precondition failed.
    fn update_result(
        &self,
        id: ResultId,
        expect: &Precondition,
        update: &ResultUpdate,
    ) -> Result<bool, StoreError>;

    /// Record `class` as the workunit's redundancy class if it has none.
    ///
    /// Returns the class stored after the call, or `None` if the workunit is gone.
    fn bind_hr_class(&self, id: WorkunitId, class: HrClass) -> Result<Option<HrClass>, StoreError>;

    /// Record `app_version_id` as the workunit's app version if it has none.
    ///
    /// Returns the version stored after the call, or `None` if the workunit is gone.
    fn bind_app_version(
        &self,
        id: WorkunitId,
        app_version_id: AppVersionId,
    ) -> Result<Option<AppVersionId>, StoreError>;

    /// Highest result id matching `query`, if any.
    fn max_result_id(&self, query: &ResultQuery) -> Result<Option<ResultId>, StoreError> {
        let q = query.clone().order(crate::query::ResultOrder::IdDesc).limit(1);
        Ok(self.find_results(&q)?.first().map(|r| r.id))
    }
}
