use std::sync::Arc;

use chrono::{Duration, Utc};

use volsched_core::{App, LocalityMode, ResultState, Workunit};
use volsched_dispatch::WorkGenerator;
use volsched_store::{MemoryStore, SchedulerStore};

use crate::helpers::{app, config_with, host, request, unsent, workunit, Fixture, RecordingGenerator};

fn locality_app(id: u64) -> App {
    let mut a = app(id);
    a.locality = LocalityMode::Full;
    a
}

fn wu_with_file(id: u64, file: &str) -> Workunit {
    let mut wu = workunit(id, 1);
    wu.input_files = vec![file.to_string()];
    wu
}

fn sent_ids(reply: &volsched_core::SchedulerReply) -> Vec<u64> {
    let mut ids: Vec<u64> = reply.jobs.iter().map(|j| j.result_id).collect();
    ids.sort();
    ids
}

#[test]
fn test_held_file_jobs_in_id_order() {
    let fx = Fixture::new(vec![locality_app(1)], config_with(2));
    for i in 1..=3 {
        fx.add_job(wu_with_file(i, "F"), i, 1);
    }

    let mut req = request(host(1, 1));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert_eq!(sent_ids(&reply), vec![1, 2]);
    assert!(reply.files_to_delete.is_empty());
    assert_eq!(fx.result(3).server_state, ResultState::Unsent);
}

#[test]
fn test_user_cursor_skips_older_jobs() {
    let fx = Fixture::new(vec![locality_app(1)], config_with(1));
    fx.add_job(wu_with_file(5, "F"), 5, 1);
    fx.add_job(wu_with_file(12, "F"), 12, 1);

    // The user already got result 10 of this file on another of their hosts.
    let wu10 = wu_with_file(10, "F");
    let mut earlier = unsent(10, &wu10);
    earlier.server_state = ResultState::InProgress;
    earlier.host_id = Some(9);
    earlier.user_id = Some(1);
    earlier.sent_time = Some(Utc::now() - Duration::hours(2));
    earlier.report_deadline = Some(Utc::now() + Duration::days(1));
    fx.store.insert_result(earlier).unwrap();
    fx.store.insert_workunit(wu10).unwrap();

    let mut req = request(host(1, 1));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert_eq!(sent_ids(&reply), vec![12]);
    assert_eq!(fx.result(5).server_state, ResultState::Unsent);
}

#[test]
fn test_exhausted_file_asks_generator_and_is_deleted() {
    let generator = Arc::new(RecordingGenerator::default());
    let fx = Fixture::new(vec![locality_app(1)], config_with(4)).with_generator(generator.clone());

    let mut req = request(host(1, 1));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert!(reply.jobs.is_empty());
    assert_eq!(reply.files_to_delete, vec!["F".to_string()]);
    assert_eq!(*generator.requested.lock().unwrap(), vec!["F".to_string()]);
}

#[test]
fn test_file_in_working_set_is_kept() {
    let generator = Arc::new(RecordingGenerator {
        working: vec!["F".into()],
        ..Default::default()
    });
    let fx = Fixture::new(vec![locality_app(1)], config_with(4)).with_generator(generator);

    let mut req = request(host(1, 1));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert!(reply.files_to_delete.is_empty());
}

#[test]
fn test_sweep_reaches_every_unheld_job() {
    let fx = Fixture::new(vec![locality_app(1)], config_with(8));
    for i in 1..=5 {
        fx.add_job(wu_with_file(i, &format!("X{i}")), i, 1);
    }

    // Whatever the random starting point, the wrap-around covers all names.
    let reply = fx.scheduler.handle_request(request(host(1, 1))).unwrap();
    assert_eq!(sent_ids(&reply), vec![1, 2, 3, 4, 5]);
    assert!(reply.files_to_delete.is_empty());
}

#[test]
fn test_aged_out_jobs_go_to_fast_hosts_first() {
    let fx = Fixture::new(vec![locality_app(1)], config_with(1));
    fx.add_job(wu_with_file(1, "F"), 1, 1);
    let old = wu_with_file(2, "Z");
    let mut stale = unsent(2, &old);
    stale.created_at = Utc::now() - Duration::days(8);
    fx.store.insert_result(stale).unwrap();
    fx.store.insert_workunit(old).unwrap();

    let mut fast = host(1, 1);
    fast.n_bwdown = 1e6;
    let mut req = request(fast);
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert_eq!(sent_ids(&reply), vec![2]);

    // A slow host holding the same file just gets the file's job.
    let mut req = request(host(2, 2));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert_eq!(sent_ids(&reply), vec![1]);
}

#[test]
fn test_locality_jobs_respect_one_per_user() {
    let fx = Fixture::new(vec![locality_app(1)], config_with(4));
    fx.add_job(wu_with_file(1, "F"), 1, 2);

    let mut req = request(host(1, 1));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert_eq!(reply.jobs.len(), 1);
    assert_eq!(fx.in_progress_count(), 1);
}

#[test]
fn test_hot_file_jobs_go_to_hosts_without_files() {
    let generator = Arc::new(RecordingGenerator {
        working: vec!["H".into()],
        ..Default::default()
    });
    let fx = Fixture::new(vec![locality_app(1)], config_with(1)).with_generator(generator.clone());
    fx.add_job(wu_with_file(1, "H"), 1, 1);
    for i in 2..=9 {
        fx.add_job(wu_with_file(i, &format!("X{i}")), i, 1);
    }

    let reply = fx.scheduler.handle_request(request(host(1, 1))).unwrap();
    assert_eq!(sent_ids(&reply), vec![1]);
    // Sampling never asks for more work.
    assert!(generator.requested.lock().unwrap().is_empty());
}

/// Generator that creates one workunit, with a single result, on request.
struct ProducingGenerator {
    store: Arc<MemoryStore>,
    wu: Workunit,
    result_id: u64,
}

impl WorkGenerator for ProducingGenerator {
    fn request_work(&self, file: &str) {
        if !self.wu.references_file(file) || self.store.result(self.result_id).unwrap().is_some() {
            return;
        }
        self.store.insert_result(unsent(self.result_id, &self.wu)).unwrap();
        self.store.insert_workunit(self.wu.clone()).unwrap();
    }

    fn working_set(&self) -> Vec<String> {
        Vec::new()
    }
}

fn producing_fixture(wait_seconds: u64) -> Fixture {
    let mut config = config_with(1);
    config.locality.wait_seconds = wait_seconds;
    let fx = Fixture::new(vec![locality_app(1)], config);
    let generator = Arc::new(ProducingGenerator {
        store: fx.store.clone(),
        wu: wu_with_file(7, "F"),
        result_id: 7,
    });
    fx.with_generator(generator)
}

#[test]
fn test_generator_wait_picks_up_new_jobs() {
    let fx = producing_fixture(1);
    let mut req = request(host(1, 1));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert_eq!(sent_ids(&reply), vec![7]);
    assert!(reply.files_to_delete.is_empty());
    assert_eq!(fx.result(7).server_state, ResultState::InProgress);
}

#[test]
fn test_no_wait_deletes_file_before_generator_catches_up() {
    let fx = producing_fixture(0);
    let mut req = request(host(1, 1));
    req.files_held = vec!["F".into()];
    let reply = fx.scheduler.handle_request(req).unwrap();
    assert_eq!(reply.files_to_delete, vec!["F".to_string()]);
}
