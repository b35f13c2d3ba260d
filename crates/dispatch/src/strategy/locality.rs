//! Locality scheduling for apps with large shared input files: send a host
//! jobs whose files it already holds, straight from the store.

use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use volsched_cache::JobEntry;
use volsched_core::{AppId, LocalityMode, ResultRecord, ResultState};
use volsched_store::{ResultOrder, ResultQuery};

use super::{try_direct, Strategy};
use crate::context::{RequestContext, ScanMode};
use crate::error::SchedError;
use crate::scheduler::Scheduler;

/// The upstream process that creates locality jobs on demand.
pub trait WorkGenerator: Send + Sync {
    /// Ask for more jobs that use `file`.
    fn request_work(&self, file: &str);

    /// Files jobs are currently being generated for.
    fn working_set(&self) -> Vec<String>;
}

/// No generator attached: nothing is ever produced on demand.
pub struct NoGenerator;

impl WorkGenerator for NoGenerator {
    fn request_work(&self, _file: &str) {}

    fn working_set(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Locality passes, in order:
///
/// 1. aged-out jobs of any app, only to well-connected hosts
/// 2. per held file, jobs past the user's cursor for that file
/// 3. held files with no jobs left become deletable on the host
/// 4. a sample of the generator's working set
/// 5. a name-ordered wrap-around sweep from a random start
pub struct LocalityScan;

impl Strategy for LocalityScan {
    fn name(&self) -> &'static str {
        "locality"
    }

    fn run(&self, sched: &Scheduler, ctx: &mut RequestContext) -> Result<usize, SchedError> {
        let apps = sched.catalog().apps_with_locality(LocalityMode::Full);
        if apps.is_empty() {
            return Ok(0);
        }
        let mut sent = aged_out(sched, ctx)?;

        let working_set = sched.generator().working_set();
        for file in ctx.request.files_held.clone() {
            if ctx.quota.is_met() {
                return Ok(sent);
            }
            let (n, found) = by_file(sched, ctx, &file, &apps, true)?;
            sent += n;
            if found == 0 && !working_set.contains(&file) {
                debug!(file = %file, "no jobs left for held file");
                ctx.reply.files_to_delete.push(file);
            }
        }

        if !ctx.quota.is_met() {
            let mut hot: Vec<&String> = working_set.iter().filter(|f| !ctx.request.holds_file(f)).collect();
            hot.shuffle(&mut rand::thread_rng());
            hot.truncate(sched.config().locality.hot_sample);
            for file in hot {
                if ctx.quota.is_met() {
                    break;
                }
                sent += by_file(sched, ctx, file, &apps, false)?.0;
            }
        }

        if !ctx.quota.is_met() {
            sent += sweep(sched, ctx, &apps)?;
        }
        Ok(sent)
    }
}

fn batch_size(sched: &Scheduler) -> usize {
    sched.config().locality.batch.max(1)
}

fn entry_for(sched: &Scheduler, result: &ResultRecord) -> Result<Option<JobEntry>, SchedError> {
    let Some(workunit) = sched.store().workunit(result.workunit_id)? else {
        return Ok(None);
    };
    Ok(Some(JobEntry {
        result_id: result.id,
        result_name: result.name.clone(),
        workunit,
        need_reliable: false,
        inserted_at: result.created_at,
    }))
}

fn offer(sched: &Scheduler, ctx: &mut RequestContext, result: &ResultRecord) -> Result<bool, SchedError> {
    match entry_for(sched, result)? {
        Some(entry) => try_direct(sched, ctx, &entry, ScanMode::general()),
        None => Ok(false),
    }
}

fn aged_out(sched: &Scheduler, ctx: &mut RequestContext) -> Result<usize, SchedError> {
    let cfg = &sched.config().locality;
    if ctx.host().n_bwdown < cfg.min_bandwidth {
        return Ok(0);
    }
    let cutoff = ctx.now - chrono::Duration::seconds(cfg.send_timeout_seconds);
    let q = ResultQuery::new()
        .state(ResultState::Unsent)
        .created_before(cutoff)
        .order(ResultOrder::CreatedAsc)
        .limit(batch_size(sched));
    let mut sent = 0;
    for result in sched.store().find_results(&q)? {
        if ctx.quota.is_met() {
            break;
        }
        if offer(sched, ctx, &result)? {
            sent += 1;
        }
    }
    if sent > 0 {
        info!(sent, "sent aged-out jobs");
    }
    Ok(sent)
}

/// Jobs for `file` past the user's cursor. Returns (sent, candidates seen).
fn by_file(
    sched: &Scheduler,
    ctx: &mut RequestContext,
    file: &str,
    apps: &[AppId],
    ask_generator: bool,
) -> Result<(usize, usize), SchedError> {
    let sent_q = ResultQuery::new().user(ctx.host().user_id).input_file(file).apps(apps.to_vec());
    let cursor = sched.store().max_result_id(&sent_q)?.unwrap_or(0);
    let (mut sent, mut found) = drain_file(sched, ctx, file, apps, cursor)?;

    if found == 0 && ask_generator {
        sched.generator().request_work(file);
        let wait = sched.config().locality.wait_seconds;
        if wait > 0 {
            debug!(file, wait, "waiting for generator");
            thread::sleep(Duration::from_secs(wait));
            let (s, f) = drain_file(sched, ctx, file, apps, cursor)?;
            sent += s;
            found += f;
        }
    }
    Ok((sent, found))
}

fn drain_file(
    sched: &Scheduler,
    ctx: &mut RequestContext,
    file: &str,
    apps: &[AppId],
    mut cursor: u64,
) -> Result<(usize, usize), SchedError> {
    let batch = batch_size(sched);
    let (mut sent, mut found) = (0, 0);
    while !ctx.quota.is_met() {
        let q = ResultQuery::new()
            .state(ResultState::Unsent)
            .input_file(file)
            .apps(apps.to_vec())
            .id_above(cursor)
            .order(ResultOrder::IdAsc)
            .limit(batch);
        let rows = sched.store().find_results(&q)?;
        let full = rows.len() == batch;
        for result in rows {
            if ctx.quota.is_met() {
                break;
            }
            cursor = result.id;
            found += 1;
            if offer(sched, ctx, &result)? {
                sent += 1;
            }
        }
        if !full {
            break;
        }
    }
    Ok((sent, found))
}

/// Visit unsent locality jobs by name, from a random one to the end and
/// then from the start back up to it.
fn sweep(sched: &Scheduler, ctx: &mut RequestContext, apps: &[AppId]) -> Result<usize, SchedError> {
    let store = sched.store();
    let base = ResultQuery::new().state(ResultState::Unsent).apps(apps.to_vec());
    let Some(max_id) = store.max_result_id(&base)? else {
        return Ok(0);
    };
    let start = rand::thread_rng().gen_range(0..=max_id);
    let pivot = match store.find_results(&base.clone().id_above(start).order(ResultOrder::IdAsc).limit(1))?.pop() {
        Some(r) => r.name,
        None => match store.find_results(&base.clone().order(ResultOrder::NameAsc).limit(1))?.pop() {
            Some(r) => r.name,
            None => return Ok(0),
        },
    };
    let mut sent = sweep_range(sched, ctx, &base, Some(pivot.clone()), None)?;
    if !ctx.quota.is_met() {
        sent += sweep_range(sched, ctx, &base, None, Some(&pivot))?;
    }
    Ok(sent)
}

fn sweep_range(
    sched: &Scheduler,
    ctx: &mut RequestContext,
    base: &ResultQuery,
    from: Option<String>,
    stop_at: Option<&str>,
) -> Result<usize, SchedError> {
    let batch = batch_size(sched);
    let mut next = from;
    let mut sent = 0;
    while !ctx.quota.is_met() {
        let mut q = base.clone().order(ResultOrder::NameAsc).limit(batch);
        if let Some(name) = &next {
            q = q.name_from(name.clone());
        }
        let rows = sched.store().find_results(&q)?;
        let full = rows.len() == batch;
        for result in rows {
            if ctx.quota.is_met() || stop_at.is_some_and(|s| result.name.as_str() >= s) {
                return Ok(sent);
            }
            // Smallest name after this one.
            next = Some(format!("{}\u{0}", result.name));
            if offer(sched, ctx, &result)? {
                sent += 1;
            }
        }
        if !full {
            break;
        }
    }
    Ok(sent)
}
