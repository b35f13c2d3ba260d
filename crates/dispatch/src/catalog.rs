//! Applications, their versions, and which version a host should run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use volsched_core::{App, AppId, AppVersion, AppVersionId, HostInfo, HostUsage, LocalityMode, ProcType};

/// The app version picked for a host, with usage projected onto that host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChosenVersion {
    pub app_version_id: AppVersionId,
    pub usage: HostUsage,
}

/// Read-only app/version tables, loaded once and shared by all requests.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    apps: BTreeMap<AppId, App>,
    versions: BTreeMap<AppVersionId, AppVersion>,
}

impl Catalog {
    pub fn new(apps: Vec<App>, versions: Vec<AppVersion>) -> Self {
        Self {
            apps: apps.into_iter().map(|a| (a.id, a)).collect(),
            versions: versions.into_iter().map(|v| (v.id, v)).collect(),
        }
    }

    pub fn app(&self, id: AppId) -> Option<&App> {
        self.apps.get(&id)
    }

    pub fn apps(&self) -> impl Iterator<Item = &App> {
        self.apps.values()
    }

    pub fn version(&self, id: AppVersionId) -> Option<&AppVersion> {
        self.versions.get(&id)
    }

    pub fn has_beta_app(&self) -> bool {
        self.apps.values().any(|a| a.beta)
    }

    pub fn apps_with_locality(&self, mode: LocalityMode) -> Vec<AppId> {
        self.apps.values().filter(|a| a.locality == mode).map(|a| a.id).collect()
    }

    pub fn non_cpu_intensive_apps(&self) -> impl Iterator<Item = &App> {
        self.apps.values().filter(|a| a.non_cpu_intensive)
    }

    /// Whether `host` (advertising `platforms`) can execute `version`.
    pub fn can_run(version: &AppVersion, host: &HostInfo, platforms: &[String]) -> bool {
        if !platforms.iter().any(|p| *p == version.platform) {
            return false;
        }
        match version.usage.proc_type {
            ProcType::Cpu => true,
            ProcType::Gpu => host.n_gpus > 0,
        }
    }

    /// Fill in the flops `version` is expected to reach on `host`.
    pub fn resolve(version: &AppVersion, host: &HostInfo) -> ChosenVersion {
        let mut usage = version.usage.clone();
        if usage.projected_flops <= 0.0 {
            usage.projected_flops = host.p_fpops * usage.avg_ncpus.max(0.01);
        }
        ChosenVersion {
            app_version_id: version.id,
            usage,
        }
    }

    /// Fastest runnable version of `app_id` for the host; ties go to the
    /// newest version number.
    pub fn best_version(&self, app_id: AppId, host: &HostInfo, platforms: &[String]) -> Option<ChosenVersion> {
        self.versions
            .values()
            .filter(|v| v.app_id == app_id && Self::can_run(v, host, platforms))
            .map(|v| (v.version_num, Self::resolve(v, host)))
            .max_by(|(an, a), (bn, b)| {
                a.usage
                    .projected_flops
                    .total_cmp(&b.usage.projected_flops)
                    .then(an.cmp(bn))
            })
            .map(|(_, chosen)| chosen)
    }
}
