//! One scheduler instance: shared cache, store and catalog plus the ordered
//! strategies. Instances are cheap to share across threads; every request
//! gets its own [`RequestContext`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn};

use volsched_cache::JobCache;
use volsched_core::{Config, SchedulerReply, SchedulerRequest};
use volsched_store::SchedulerStore;

use crate::catalog::Catalog;
use crate::context::RequestContext;
use crate::error::SchedError;
use crate::feasibility::{CustomCheck, FilterEnv};
use crate::resend;
use crate::strategy::locality::{LocalityScan, NoGenerator, WorkGenerator};
use crate::strategy::per_app::PerAppScan;
use crate::strategy::priority::PriorityScan;
use crate::strategy::Strategy;

pub struct Scheduler {
    config: Config,
    cache: Arc<JobCache>,
    store: Arc<dyn SchedulerStore>,
    catalog: Arc<Catalog>,
    generator: Arc<dyn WorkGenerator>,
    custom: Option<Arc<dyn CustomCheck>>,
    strategies: Vec<Box<dyn Strategy>>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        cache: Arc<JobCache>,
        store: Arc<dyn SchedulerStore>,
        catalog: Arc<Catalog>,
    ) -> Result<Self, SchedError> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            store,
            catalog,
            generator: Arc::new(NoGenerator),
            custom: None,
            strategies: vec![Box::new(PerAppScan), Box::new(LocalityScan), Box::new(PriorityScan)],
        })
    }

    pub fn with_generator(mut self, generator: Arc<dyn WorkGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_custom_check(mut self, check: Arc<dyn CustomCheck>) -> Self {
        self.custom = Some(check);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &JobCache {
        &self.cache
    }

    pub fn store(&self) -> &dyn SchedulerStore {
        self.store.as_ref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn generator(&self) -> &dyn WorkGenerator {
        self.generator.as_ref()
    }

    pub fn filter_env(&self) -> FilterEnv<'_> {
        FilterEnv {
            catalog: &self.catalog,
            config: &self.config.scheduler,
            custom: self.custom.as_deref(),
        }
    }

    pub fn handle_request(&self, request: SchedulerRequest) -> Result<SchedulerReply, SchedError> {
        self.handle_request_at(request, Utc::now())
    }

    /// Fill a reply for `request` as of `now`.
    ///
    /// A storage failure aborts the request: no partial reply is returned and
    /// any claimed slot has been put back by the time the error surfaces.
    pub fn handle_request_at(&self, request: SchedulerRequest, now: DateTime<Utc>) -> Result<SchedulerReply, SchedError> {
        let mut ctx = RequestContext::new(request, &self.catalog, &self.config.scheduler, now);
        let span = info_span!("request", request_id = %ctx.request_id, host_id = ctx.host().id);
        let _enter = span.enter();
        let started = Instant::now();

        let result = self.run(&mut ctx);
        if let Err(e) = &result {
            warn!(error = %e, "request aborted");
        }
        result?;

        let reply = ctx.into_reply(&self.config.scheduler);
        info!(
            jobs = reply.jobs.len(),
            resent = reply.jobs.len() - reply.new_job_count(),
            messages = reply.messages.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "reply ready"
        );
        Ok(reply)
    }

    fn run(&self, ctx: &mut RequestContext) -> Result<(), SchedError> {
        if ctx.quota.is_met() {
            return Ok(());
        }
        resend::resend_lost(self, ctx)?;
        for strategy in &self.strategies {
            if ctx.quota.is_met() {
                break;
            }
            let sent = strategy.run(self, ctx)?;
            if sent > 0 {
                info!(strategy = strategy.name(), sent, "strategy sent jobs");
            }
        }
        Ok(())
    }
}
