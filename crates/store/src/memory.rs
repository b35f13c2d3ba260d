//! In-process implementation of [`SchedulerStore`], used by the simulator
//! and the test suites.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use volsched_core::{
    AppVersionId, HrClass, ResultId, ResultRecord, Workunit, WorkunitId, HR_UNBOUND,
};

use crate::error::StoreError;
use crate::query::{Precondition, ResultOrder, ResultQuery, ResultUpdate};
use crate::store::SchedulerStore;

#[derive(Debug, Default)]
struct Tables {
    workunits: BTreeMap<WorkunitId, Workunit>,
    results: BTreeMap<ResultId, ResultRecord>,
}

/// Tables behind a single `RwLock`; each trait call holds the lock for
/// exactly one read or one read-modify-write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
    updates: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workunit(&self, wu: Workunit) -> Result<(), StoreError> {
        self.write()?.workunits.insert(wu.id, wu);
        Ok(())
    }

    pub fn insert_result(&self, result: ResultRecord) -> Result<(), StoreError> {
        self.write()?.results.insert(result.id, result);
        Ok(())
    }

    /// Overwrite a workunit row in place (tests and the simulator use this
    /// to model outside actors such as the validator).
    pub fn modify_workunit<F: FnOnce(&mut Workunit)>(&self, id: WorkunitId, f: F) -> Result<bool, StoreError> {
        let mut t = self.write()?;
        Ok(t.workunits.get_mut(&id).map(f).is_some())
    }

    /// Simulate losing the connection: every call fails until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful conditional updates, for contention tests.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn all_results(&self) -> Result<Vec<ResultRecord>, StoreError> {
        Ok(self.read()?.results.values().cloned().collect())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.check_online()?;
        self.tables
            .read()
            .map_err(|e| StoreError::LockPoisoned(format!("tables read lock: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.check_online()?;
        self.tables
            .write()
            .map_err(|e| StoreError::LockPoisoned(format!("tables write lock: {e}")))
    }

    fn select<'a>(t: &'a Tables, query: &ResultQuery) -> Vec<&'a ResultRecord> {
        let mut rows: Vec<&ResultRecord> = t
            .results
            .values()
            .filter(|r| query.matches(r, t.workunits.get(&r.workunit_id)))
            .collect();
        match query.order {
            ResultOrder::IdAsc => {}
            ResultOrder::IdDesc => rows.reverse(),
            ResultOrder::NameAsc => rows.sort_by(|a, b| a.name.cmp(&b.name)),
            ResultOrder::CreatedAsc => rows.sort_by_key(|r| (r.created_at, r.id)),
        }
        if let Some(n) = query.limit {
            rows.truncate(n);
        }
        rows
    }
}

impl SchedulerStore for MemoryStore {
    fn workunit(&self, id: WorkunitId) -> Result<Option<Workunit>, StoreError> {
        Ok(self.read()?.workunits.get(&id).cloned())
    }

    fn result(&self, id: ResultId) -> Result<Option<ResultRecord>, StoreError> {
        Ok(self.read()?.results.get(&id).cloned())
    }

    fn find_results(&self, query: &ResultQuery) -> Result<Vec<ResultRecord>, StoreError> {
        let t = self.read()?;
        Ok(Self::select(&t, query).into_iter().cloned().collect())
    }

    fn count_results(&self, query: &ResultQuery) -> Result<u64, StoreError> {
        let t = self.read()?;
        let n = t
            .results
            .values()
            .filter(|r| query.matches(r, t.workunits.get(&r.workunit_id)))
            .count();
        Ok(n as u64)
    }

    fn update_result(
        &self,
        id: ResultId,
        expect: &Precondition,
        update: &ResultUpdate,
    ) -> Result<bool, StoreError> {
        let mut t = self.write()?;
        let Some(row) = t.results.get_mut(&id) else {
            return Ok(false);
        };
        if !expect.holds(row) {
            debug!(result_id = id, state = %row.server_state, "conditional update refused");
            return Ok(false);
        }
        update.apply(row);
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn bind_hr_class(&self, id: WorkunitId, class: HrClass) -> Result<Option<HrClass>, StoreError> {
        let mut t = self.write()?;
        Ok(t.workunits.get_mut(&id).map(|wu| {
            if wu.hr_class == HR_UNBOUND {
                wu.hr_class = class;
            }
            wu.hr_class
        }))
    }

    fn bind_app_version(
        &self,
        id: WorkunitId,
        app_version_id: AppVersionId,
    ) -> Result<Option<AppVersionId>, StoreError> {
        let mut t = self.write()?;
        Ok(t.workunits.get_mut(&id).map(|wu| {
            if wu.app_version_id == 0 {
                wu.app_version_id = app_version_id;
            }
            wu.app_version_id
        }))
    }
}
