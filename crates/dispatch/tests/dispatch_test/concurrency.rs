use std::collections::HashMap;
use std::thread;

use rayon::prelude::*;

use volsched_cache::SlotState;
use volsched_core::{HrType, MessageCategory, ResultState};
use volsched_dispatch::redundancy::host_class;
use volsched_dispatch::SchedError;
use volsched_store::SchedulerStore;

use crate::helpers::{app, config_with, host, request, workunit, Fixture};

#[test]
fn test_parallel_requests_never_double_dispatch() {
    let fx = Fixture::new(vec![app(1)], config_with(8));
    for i in 1..=50 {
        fx.add_job(workunit(i, 1), i, 1);
    }
    assert_eq!(fx.feed(), 50);

    // 16 hosts of 16 users want up to 128 jobs between them.
    let replies: Vec<_> = (1..=16u64)
        .into_par_iter()
        .map(|i| fx.scheduler.handle_request(request(host(i, i))).unwrap())
        .collect();

    let mut seen: HashMap<u64, usize> = HashMap::new();
    for job in replies.iter().flat_map(|r| &r.jobs) {
        *seen.entry(job.result_id).or_default() += 1;
    }
    assert_eq!(seen.len(), 50, "every job should go out");
    assert!(seen.values().all(|n| *n == 1), "a result was dispatched twice");
    assert_eq!(fx.in_progress_count(), 50);
    assert_eq!(fx.store.update_count(), 50);
    assert_eq!(fx.cache.present_count(), 0);

    // Each stored host matches the reply that carried the job.
    for (i, reply) in replies.iter().enumerate() {
        for job in &reply.jobs {
            assert_eq!(fx.result(job.result_id).host_id, Some(i as u64 + 1));
        }
    }
}

#[test]
fn test_parallel_requests_racing_on_one_job() {
    let fx = Fixture::new(vec![app(1)], config_with(1));
    fx.add_job(workunit(1, 1), 1, 1);
    fx.feed();

    let sent: usize = (1..=8u64)
        .into_par_iter()
        .map(|i| fx.scheduler.handle_request(request(host(i, i))).unwrap().jobs.len())
        .sum();
    assert_eq!(sent, 1);
    assert_eq!(fx.result(1).server_state, ResultState::InProgress);
    assert_eq!(fx.cache.state(0), Some(SlotState::Empty));
}

#[test]
fn test_racing_first_binders_agree_on_class() {
    let mut fine = app(1);
    fine.hr_type = HrType::Fine;
    let fx = Fixture::new(vec![fine], config_with(1));
    fx.add_job(workunit(1, 1), 1, 2);
    fx.feed();

    // Two Linux/Intel hosts of different users bind the same class.
    thread::scope(|s| {
        let a = s.spawn(|| fx.scheduler.handle_request(request(host(1, 1))).unwrap());
        let b = s.spawn(|| fx.scheduler.handle_request(request(host(2, 2))).unwrap());
        assert_eq!(a.join().unwrap().jobs.len(), 1);
        assert_eq!(b.join().unwrap().jobs.len(), 1);
    });
    let bound = fx.store.workunit(1).unwrap().unwrap().hr_class;
    assert_eq!(Some(bound), host_class(HrType::Fine, &host(1, 1)));

    // A third result of the same workunit never goes to another class.
    let wu = fx.store.workunit(1).unwrap().unwrap();
    fx.store.insert_result(crate::helpers::unsent(3, &wu)).unwrap();
    fx.feed();
    let mut amd = host(3, 3);
    amd.p_vendor = "AuthenticAMD".into();
    let reply = fx.scheduler.handle_request(request(amd)).unwrap();
    assert!(reply.jobs.is_empty());
    assert_eq!(reply.messages_for(MessageCategory::Policy).count(), 1);
    assert_eq!(fx.result(3).server_state, ResultState::Unsent);
    assert_eq!(fx.store.workunit(1).unwrap().unwrap().hr_class, bound);
}

#[test]
fn test_store_failure_restores_claimed_slot() {
    let mut config = config_with(4);
    config.scheduler.resend_lost_results = false;
    let fx = Fixture::new(vec![app(1)], config);
    fx.add_job(workunit(1, 1), 1, 1);
    fx.feed();

    fx.store.set_offline(true);
    let outcome = fx.scheduler.handle_request(request(host(1, 1)));
    assert!(matches!(outcome, Err(SchedError::Store(_))));
    assert_eq!(fx.cache.state(0), Some(SlotState::Present));

    // Once the store is back the job goes out normally.
    fx.store.set_offline(false);
    let reply = fx.scheduler.handle_request(request(host(1, 1))).unwrap();
    assert_eq!(reply.jobs.len(), 1);
    assert_eq!(fx.cache.state(0), Some(SlotState::Empty));
}

#[test]
fn test_store_failure_during_resend_aborts_request() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    fx.add_job(workunit(1, 1), 1, 1);
    fx.feed();

    fx.store.set_offline(true);
    assert!(fx.scheduler.handle_request(request(host(1, 1))).is_err());
    assert_eq!(fx.cache.present_count(), 1);
}
