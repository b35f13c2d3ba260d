//! Replay a JSON scenario against an in-memory store and a shared cache,
//! with requests handled in parallel the way concurrent scheduler
//! instances would.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{error, info};

use volsched_cache::{JobCache, JobEntry};
use volsched_core::config::load_dotenv;
use volsched_core::{
    App, AppVersion, Config, LocalityMode, ResultRecord, ResultState, SchedulerReply, SchedulerRequest, Workunit,
};
use volsched_dispatch::{Catalog, Scheduler};
use volsched_store::{MemoryStore, SchedulerStore};

/// Run scheduler requests from a scenario file and report what was dispatched.
#[derive(Parser, Debug)]
#[command(name = "dispatch-sim", about = "Replay a job-dispatch scenario")]
struct Cli {
    /// Scenario file (JSON): apps, versions, workunits, results, requests
    #[arg(env = "VOLSCHED_SCENARIO")]
    scenario: PathBuf,

    /// Config profile (overrides VOLSCHED_PROFILE)
    #[arg(long)]
    profile: Option<String>,

    /// Number of times to replay the request list
    #[arg(long, default_value = "1")]
    rounds: usize,

    /// Print every reply as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    apps: Vec<App>,
    #[serde(default)]
    versions: Vec<AppVersion>,
    #[serde(default)]
    workunits: Vec<Workunit>,
    #[serde(default)]
    results: Vec<ResultRecord>,
    /// Result ids that should go to reliable hosts first.
    #[serde(default)]
    need_reliable: Vec<u64>,
    requests: Vec<SchedulerRequest>,
}

fn load_scenario(path: &PathBuf) -> Result<Scenario> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Stage unsent results into the cache, as the feeder would.
fn feed(cache: &JobCache, store: &MemoryStore, catalog: &Catalog, need_reliable: &[u64]) -> Result<usize> {
    let mut fed = 0;
    for result in store.all_results()? {
        if result.server_state != ResultState::Unsent || cache.contains_result(result.id) {
            continue;
        }
        let Some(workunit) = store.workunit(result.workunit_id)? else {
            continue;
        };
        // Full-locality jobs are dispatched from the store.
        if catalog.app(workunit.app_id).is_some_and(|a| a.locality == LocalityMode::Full) {
            continue;
        }
        let entry = JobEntry {
            result_id: result.id,
            result_name: result.name,
            workunit,
            need_reliable: need_reliable.contains(&result.id),
            inserted_at: Utc::now(),
        };
        if cache.fill(entry).is_none() {
            break;
        }
        fed += 1;
    }
    Ok(fed)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = match &cli.profile {
        Some(p) => Config::for_profile(p),
        None => Config::from_env(),
    };
    config.log_summary();

    let scenario = load_scenario(&cli.scenario)?;
    let store = Arc::new(MemoryStore::new());
    for wu in scenario.workunits {
        store.insert_workunit(wu)?;
    }
    for result in scenario.results {
        store.insert_result(result)?;
    }
    let catalog = Arc::new(Catalog::new(scenario.apps, scenario.versions));
    let cache = Arc::new(JobCache::new(config.cache.slots));
    let scheduler = Scheduler::new(config, Arc::clone(&cache), store.clone(), Arc::clone(&catalog))?;

    let mut replies: Vec<SchedulerReply> = Vec::new();
    for round in 0..cli.rounds {
        let fed = feed(&cache, &store, &catalog, &scenario.need_reliable)?;
        info!(round, fed, present = cache.present_count(), "cache filled");

        let outcomes: Vec<_> = scenario
            .requests
            .par_iter()
            .map(|req| scheduler.handle_request(req.clone()))
            .collect();
        for outcome in outcomes {
            match outcome {
                Ok(reply) => replies.push(reply),
                Err(e) => error!(error = %e, "request failed"),
            }
        }
    }

    // Each result may go out at most once as new work.
    let mut sent: HashMap<u64, usize> = HashMap::new();
    for job in replies.iter().flat_map(|r| &r.jobs).filter(|j| !j.resent) {
        *sent.entry(job.result_id).or_default() += 1;
    }
    if let Some((id, n)) = sent.iter().find(|(_, n)| **n > 1) {
        bail!("result {id} dispatched {n} times");
    }

    if cli.json {
        let report = serde_json::json!({
            "config": scheduler.config().redacted_summary(),
            "replies": replies,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    let total: usize = replies.iter().map(|r| r.jobs.len()).sum();
    let messages: usize = replies.iter().map(|r| r.messages.len()).sum();
    println!(
        "{} replies, {} jobs ({} distinct results), {} messages, {} store updates",
        replies.len(),
        total,
        sent.len(),
        messages,
        store.update_count()
    );
    Ok(())
}
