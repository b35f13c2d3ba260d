use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use volsched_cache::{JobCache, JobEntry};
use volsched_core::{
    App, AppVersion, Config, HostInfo, HostUsage, HrType, LocalityMode, ResultRecord, ResultState, SchedulerRequest,
    Workunit,
};
use volsched_dispatch::{Catalog, Scheduler, WorkGenerator};
use volsched_store::{MemoryStore, SchedulerStore};

pub const PLATFORM: &str = "x86_64-pc-linux-gnu";
pub const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Linux/Intel host, one CPU at 1 GFLOPS, 4 GB RAM, no history.
pub fn host(id: u64, user_id: u64) -> HostInfo {
    HostInfo {
        id,
        user_id,
        os_name: "Linux".into(),
        p_vendor: "GenuineIntel".into(),
        p_model: String::new(),
        p_ncpus: 1,
        p_fpops: 1e9,
        n_gpus: 0,
        usable_ram: 4.0 * GB,
        usable_disk: 100.0 * GB,
        n_bwdown: 0.0,
        total_credit: 0.0,
        error_rate: 0.0,
        avg_turnaround: 0.0,
        results_today: 0,
    }
}

pub fn request(host: HostInfo) -> SchedulerRequest {
    SchedulerRequest {
        host,
        platforms: vec![PLATFORM.into()],
        prefs: Default::default(),
        work_req_seconds: 1e7,
        estimated_delay: 0.0,
        in_progress: vec![],
        reports_in_progress: true,
        files_held: vec![],
    }
}

pub fn app(id: u64) -> App {
    App {
        id,
        name: format!("app{id}"),
        beta: false,
        hard: false,
        non_cpu_intensive: false,
        locality: LocalityMode::None,
        hr_type: HrType::None,
        homogeneous_app_version: false,
    }
}

pub fn version_for(app: &App) -> AppVersion {
    AppVersion {
        id: app.id * 100,
        app_id: app.id,
        platform: PLATFORM.into(),
        version_num: 1,
        plan_class: None,
        usage: HostUsage::default(),
    }
}

/// 100 s of work on the default host, one-day deadline, 100 MB RAM.
pub fn workunit(id: u64, app_id: u64) -> Workunit {
    Workunit {
        id,
        name: format!("wu_{id}"),
        app_id,
        rsc_memory_bound: 1e8,
        rsc_disk_bound: 1e6,
        rsc_bandwidth_bound: 0.0,
        rsc_fpops_est: 1e11,
        delay_bound: 86400.0,
        hr_class: 0,
        app_version_id: 0,
        error_mask: 0,
        canonical_result_id: 0,
        input_files: vec![],
        target_host: None,
        target_user: None,
    }
}

pub fn unsent(id: u64, wu: &Workunit) -> ResultRecord {
    ResultRecord {
        id,
        name: format!("{}_r{id}", wu.name),
        workunit_id: wu.id,
        app_id: wu.app_id,
        server_state: ResultState::Unsent,
        outcome: None,
        host_id: None,
        user_id: None,
        created_at: Utc::now() - Duration::hours(1),
        sent_time: None,
        report_deadline: None,
        app_version_id: 0,
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<JobCache>,
    pub catalog: Arc<Catalog>,
    pub scheduler: Scheduler,
}

impl Fixture {
    pub fn new(apps: Vec<App>, config: Config) -> Self {
        let versions = apps.iter().map(version_for).collect();
        let catalog = Arc::new(Catalog::new(apps, versions));
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(JobCache::new(config.cache.slots));
        let scheduler = Scheduler::new(config, Arc::clone(&cache), store.clone(), Arc::clone(&catalog)).unwrap();
        Self { store, cache, catalog, scheduler }
    }

    pub fn with_generator(mut self, generator: Arc<dyn WorkGenerator>) -> Self {
        self.scheduler = self.scheduler.with_generator(generator);
        self
    }

    /// Insert a workunit with `n` unsent results; returns the result ids.
    pub fn add_job(&self, wu: Workunit, first_result_id: u64, n: u64) -> Vec<u64> {
        let ids: Vec<u64> = (first_result_id..first_result_id + n).collect();
        for id in &ids {
            self.store.insert_result(unsent(*id, &wu)).unwrap();
        }
        self.store.insert_workunit(wu).unwrap();
        ids
    }

    /// Stage every unsent, non-locality result into the cache.
    pub fn feed(&self) -> usize {
        self.feed_with(|_| false)
    }

    pub fn feed_with<F: Fn(u64) -> bool>(&self, need_reliable: F) -> usize {
        let mut fed = 0;
        for r in self.store.all_results().unwrap() {
            if r.server_state != ResultState::Unsent || self.cache.contains_result(r.id) {
                continue;
            }
            let wu = self.store.workunit(r.workunit_id).unwrap().unwrap();
            if self.catalog.app(wu.app_id).unwrap().locality == LocalityMode::Full {
                continue;
            }
            let entry = JobEntry {
                result_id: r.id,
                result_name: r.name,
                workunit: wu,
                need_reliable: need_reliable(r.id),
                inserted_at: Utc::now(),
            };
            if self.cache.fill(entry).is_some() {
                fed += 1;
            }
        }
        fed
    }

    pub fn result(&self, id: u64) -> ResultRecord {
        self.store.result(id).unwrap().unwrap()
    }

    pub fn in_progress_count(&self) -> usize {
        self.store
            .all_results()
            .unwrap()
            .iter()
            .filter(|r| r.server_state == ResultState::InProgress)
            .count()
    }
}

pub fn config_with(max_wus_to_send: u32) -> Config {
    let mut config = Config::default();
    config.scheduler.max_wus_to_send = max_wus_to_send;
    config
}

/// Generator that records requests and reports a fixed working set.
#[derive(Default)]
pub struct RecordingGenerator {
    pub requested: Mutex<Vec<String>>,
    pub working: Vec<String>,
}

impl WorkGenerator for RecordingGenerator {
    fn request_work(&self, file: &str) {
        self.requested.lock().unwrap().push(file.to_string());
    }

    fn working_set(&self) -> Vec<String> {
        self.working.clone()
    }
}
