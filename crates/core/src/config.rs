use std::env;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedConfig,
    #[serde(default)]
    pub locality: LocalityConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VOLSCHED_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VOLSCHED_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            cache: CacheConfig::from_env_profiled(p),
            scheduler: SchedConfig::from_env_profiled(p),
            locality: LocalityConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject combinations the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cache.slots == 0 {
            return Err(CoreError::InvalidConfig("CACHE_SLOTS must be > 0".into()));
        }
        let frac = self.scheduler.reliable_reduced_delay_bound;
        if !(0.0..=1.0).contains(&frac) {
            return Err(CoreError::InvalidConfig(format!(
                "RELIABLE_REDUCED_DELAY_BOUND must be within [0, 1], got {frac}"
            )));
        }
        if self.scheduler.max_wus_to_send == 0 {
            return Err(CoreError::InvalidConfig("MAX_WUS_TO_SEND must be > 0".into()));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  cache:      slots={}", self.cache.slots);
        tracing::info!(
            "  scheduler:  max_wus_to_send={}, max_wus_in_progress={}, resend_lost={}",
            self.scheduler.max_wus_to_send,
            self.scheduler.max_wus_in_progress,
            self.scheduler.resend_lost_results
        );
        tracing::info!(
            "  locality:   send_timeout={}s, hot_sample={}",
            self.locality.send_timeout_seconds,
            self.locality.hot_sample
        );
    }

    /// JSON view of the effective settings, as the simulator reports them.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "cache": { "slots": self.cache.slots },
            "scheduler": self.scheduler,
            "locality": self.locality,
        })
    }
}

// ── Job cache ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub slots: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { slots: 100 }
    }
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            slots: profiled_env_parse(p, "CACHE_SLOTS", d.slots),
        }
    }
}

// ── Scheduler policy ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedConfig {
    /// Never send two results of one workunit to the same user.
    pub one_result_per_user_per_wu: bool,
    /// Never send two results of one workunit to the same host.
    pub one_result_per_host_per_wu: bool,
    /// Fraction of the delay bound used for jobs needing a reliable host
    /// when they go to one. 0 disables the reduction.
    pub reliable_reduced_delay_bound: f64,
    /// Hosts with a higher error rate are not reliable.
    pub reliable_max_error_rate: f64,
    /// Hosts with a longer average turnaround (seconds) are not reliable.
    pub reliable_max_avg_turnaround: f64,
    /// Jobs per CPU per request.
    pub max_wus_to_send: u32,
    /// Jobs per CPU a host may have in progress. 0 = unlimited.
    pub max_wus_in_progress: u32,
    /// Jobs per CPU per day. 0 = unlimited.
    pub daily_result_quota: u32,
    pub resend_lost_results: bool,
    /// Use the host's reported workload for an EDF deadline simulation.
    pub workload_sim: bool,
    /// Seconds a host should wait between requests that asked for work.
    pub min_sendwork_interval: f64,
    /// Seconds a host should wait after a request that got nothing.
    pub no_work_delay: f64,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            one_result_per_user_per_wu: true,
            one_result_per_host_per_wu: false,
            reliable_reduced_delay_bound: 0.0,
            reliable_max_error_rate: 0.001,
            reliable_max_avg_turnaround: 86400.0,
            max_wus_to_send: 8,
            max_wus_in_progress: 0,
            daily_result_quota: 0,
            resend_lost_results: true,
            workload_sim: true,
            min_sendwork_interval: 0.0,
            no_work_delay: 600.0,
        }
    }
}

impl SchedConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            one_result_per_user_per_wu: profiled_env_bool(p, "ONE_RESULT_PER_USER_PER_WU", d.one_result_per_user_per_wu),
            one_result_per_host_per_wu: profiled_env_bool(p, "ONE_RESULT_PER_HOST_PER_WU", d.one_result_per_host_per_wu),
            reliable_reduced_delay_bound: profiled_env_parse(p, "RELIABLE_REDUCED_DELAY_BOUND", d.reliable_reduced_delay_bound),
            reliable_max_error_rate: profiled_env_parse(p, "RELIABLE_MAX_ERROR_RATE", d.reliable_max_error_rate),
            reliable_max_avg_turnaround: profiled_env_parse(p, "RELIABLE_MAX_AVG_TURNAROUND", d.reliable_max_avg_turnaround),
            max_wus_to_send: profiled_env_parse(p, "MAX_WUS_TO_SEND", d.max_wus_to_send),
            max_wus_in_progress: profiled_env_parse(p, "MAX_WUS_IN_PROGRESS", d.max_wus_in_progress),
            daily_result_quota: profiled_env_parse(p, "DAILY_RESULT_QUOTA", d.daily_result_quota),
            resend_lost_results: profiled_env_bool(p, "RESEND_LOST_RESULTS", d.resend_lost_results),
            workload_sim: profiled_env_bool(p, "WORKLOAD_SIM", d.workload_sim),
            min_sendwork_interval: profiled_env_parse(p, "MIN_SENDWORK_INTERVAL", d.min_sendwork_interval),
            no_work_delay: profiled_env_parse(p, "NO_WORK_DELAY", d.no_work_delay),
        }
    }

    /// The reduced-deadline fraction, if the reduction is in effect.
    pub fn reduced_delay_fraction(&self) -> Option<f64> {
        let f = self.reliable_reduced_delay_bound;
        (f > 0.01 && f < 1.0).then_some(f)
    }
}

// ── Locality scheduling ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalityConfig {
    /// Unsent locality jobs older than this (seconds) go to any well-connected host.
    pub send_timeout_seconds: i64,
    /// Download bandwidth (bytes/sec) a host needs for aged-out jobs.
    pub min_bandwidth: f64,
    /// Seconds to wait for the generator after asking for more work. 0 = don't wait.
    pub wait_seconds: u64,
    /// Files sampled from the generator's working set.
    pub hot_sample: usize,
    /// Candidates fetched per store lookup.
    pub batch: usize,
}

impl Default for LocalityConfig {
    fn default() -> Self {
        Self {
            send_timeout_seconds: 7 * 86400,
            min_bandwidth: 100_000.0,
            wait_seconds: 0,
            hot_sample: 4,
            batch: 16,
        }
    }
}

impl LocalityConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            send_timeout_seconds: profiled_env_parse(p, "LOCALITY_SEND_TIMEOUT", d.send_timeout_seconds),
            min_bandwidth: profiled_env_parse(p, "LOCALITY_MIN_BANDWIDTH", d.min_bandwidth),
            wait_seconds: profiled_env_parse(p, "LOCALITY_WAIT_SECONDS", d.wait_seconds),
            hot_sample: profiled_env_parse(p, "LOCALITY_HOT_SAMPLE", d.hot_sample),
            batch: profiled_env_parse(p, "LOCALITY_BATCH", d.batch),
        }
    }
}
