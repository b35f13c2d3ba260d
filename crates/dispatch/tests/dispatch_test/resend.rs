use chrono::{DateTime, Duration, Utc};

use volsched_core::{wu_error, ReportedJob, ResultRecord, ResultState, Workunit};

use crate::helpers::{app, config_with, host, request, unsent, workunit, Fixture};

/// Store a result already sent to `host_id` an hour before `now`, due one
/// day after sending.
fn sent_to(fx: &Fixture, id: u64, wu: Workunit, host_id: u64, now: DateTime<Utc>) -> ResultRecord {
    let mut r = unsent(id, &wu);
    r.server_state = ResultState::InProgress;
    r.host_id = Some(host_id);
    r.user_id = Some(host_id);
    r.sent_time = Some(now - Duration::hours(1));
    r.report_deadline = Some(now + Duration::hours(23));
    r.app_version_id = 100;
    fx.store.insert_result(r.clone()).unwrap();
    fx.store.insert_workunit(wu).unwrap();
    r
}

#[test]
fn test_lost_result_is_resent() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    let now = Utc::now();
    let lost = sent_to(&fx, 1, workunit(1, 1), 1, now);

    let reply = fx.scheduler.handle_request_at(request(host(1, 1)), now).unwrap();
    assert_eq!(reply.jobs.len(), 1);
    let job = &reply.jobs[0];
    assert!(job.resent);
    assert_eq!(job.result_id, 1);
    assert_eq!(job.app_version_id, 100);
    // Half the original window from now is earlier than the old deadline, so it stands.
    assert_eq!(Some(job.report_deadline), lost.report_deadline);

    let stored = fx.result(1);
    assert_eq!(stored.server_state, ResultState::InProgress);
    assert_eq!(stored.sent_time, Some(now));
    assert_eq!(stored.host_id, Some(1));
}

#[test]
fn test_lost_result_with_huge_delay_bound_keeps_its_deadline() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    let now = Utc::now();
    let mut wu = workunit(1, 1);
    wu.delay_bound = 1e13;
    let lost = sent_to(&fx, 1, wu, 1, now);

    let reply = fx.scheduler.handle_request_at(request(host(1, 1)), now).unwrap();
    assert_eq!(reply.jobs.len(), 1);
    assert!(reply.jobs[0].resent);
    assert_eq!(Some(reply.jobs[0].report_deadline), lost.report_deadline);
    assert_eq!(fx.result(1).report_deadline, lost.report_deadline);
}

#[test]
fn test_resend_counts_against_quota() {
    let fx = Fixture::new(vec![app(1)], config_with(1));
    let now = Utc::now();
    sent_to(&fx, 1, workunit(1, 1), 1, now);
    fx.add_job(workunit(2, 1), 2, 1);
    fx.feed();

    let reply = fx.scheduler.handle_request_at(request(host(1, 1)), now).unwrap();
    assert_eq!(reply.jobs.len(), 1);
    assert!(reply.jobs[0].resent);
    assert_eq!(fx.cache.present_count(), 1);
}

#[test]
fn test_unreachable_deadline_expires_result() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    let now = Utc::now();
    let mut wu = workunit(1, 1);
    wu.rsc_fpops_est = 1e14; // over a day on the test host
    sent_to(&fx, 1, wu, 1, now);

    let reply = fx.scheduler.handle_request_at(request(host(1, 1)), now).unwrap();
    assert!(reply.jobs.is_empty());
    let stored = fx.result(1);
    assert_eq!(stored.server_state, ResultState::InProgress);
    assert_eq!(stored.report_deadline, Some(now - Duration::seconds(1)));
}

#[test]
fn test_finished_workunit_expires_result() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    let now = Utc::now();
    let mut wu = workunit(1, 1);
    wu.error_mask = wu_error::CANCELLED;
    sent_to(&fx, 1, wu, 1, now);

    let reply = fx.scheduler.handle_request_at(request(host(1, 1)), now).unwrap();
    assert!(reply.jobs.is_empty());
    assert_eq!(fx.result(1).report_deadline, Some(now - Duration::seconds(1)));
}

#[test]
fn test_reported_result_is_left_alone() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    let now = Utc::now();
    let r = sent_to(&fx, 1, workunit(1, 1), 1, now);

    let mut req = request(host(1, 1));
    req.in_progress.push(ReportedJob {
        result_name: r.name.clone(),
        app_id: 1,
        report_deadline: now + Duration::hours(23),
        estimated_remaining: 50.0,
    });
    let reply = fx.scheduler.handle_request_at(req, now).unwrap();
    assert!(reply.jobs.is_empty());
    assert_eq!(fx.store.update_count(), 0);
    assert_eq!(fx.result(1), r);
}

#[test]
fn test_incomplete_report_skips_resend() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    let now = Utc::now();
    let r = sent_to(&fx, 1, workunit(1, 1), 1, now);

    let mut req = request(host(1, 1));
    req.reports_in_progress = false;
    let reply = fx.scheduler.handle_request_at(req, now).unwrap();
    assert!(reply.jobs.is_empty());
    assert_eq!(fx.result(1), r);
}

#[test]
fn test_other_hosts_results_are_not_lost() {
    let fx = Fixture::new(vec![app(1)], config_with(4));
    let now = Utc::now();
    let r = sent_to(&fx, 1, workunit(1, 1), 7, now);

    let reply = fx.scheduler.handle_request_at(request(host(1, 1)), now).unwrap();
    assert!(reply.jobs.is_empty());
    assert_eq!(fx.result(1), r);
}
