//! Service wiring: package store, exchange rates, work queue and workers.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use parcelhub_infra::{
    AppConfig, ClaimService, DeliveryCostJob, PackageService,
    jobs::{
        DeliveryCostHandler, InMemoryJobStore, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobKind, JobStore,
        RegisterPackageHandler, RetryPolicy, ScheduleHandle, TaskDispatcher,
    },
    rates::{CbrRateSource, RateCache, RateError, RateProvider},
    store::PackageStore,
};

/// Request-facing services for one package store backend.
pub struct AppServices<S: PackageStore> {
    pub packages: PackageService<S>,
    pub claims: ClaimService<S>,
    pub dispatcher: TaskDispatcher,
}

/// Workers started alongside the HTTP surface.
#[derive(Debug)]
pub struct BackgroundWorkers {
    executor: JobExecutorHandle,
    schedule: Option<ScheduleHandle>,
}

impl BackgroundWorkers {
    /// Stop the periodic trigger, then drain the executor.
    pub async fn shutdown(self) {
        if let Some(schedule) = self.schedule {
            schedule.shutdown().await;
        }
        self.executor.shutdown().await;
        info!("background workers stopped");
    }
}

/// Knobs for [`build_services`] that tests override.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub cost_policy: RetryPolicy,
    pub registration_policy: RetryPolicy,
    pub concurrency: usize,
    pub time_limit: Duration,
    pub poll_interval: Duration,
    /// `None` disables the periodic cost update.
    pub cost_schedule: Option<Duration>,
    /// How long finished jobs stay queryable.
    pub job_retention: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cost_policy: RetryPolicy::fixed(config.job_max_retries, config.job_retry_delay),
            registration_policy: RetryPolicy::fixed(config.job_max_retries, Duration::from_secs(30)),
            concurrency: config.worker_concurrency,
            time_limit: config.job_time_limit,
            poll_interval: Duration::from_millis(100),
            cost_schedule: Some(config.cost_schedule_interval),
            job_retention: config.job_result_ttl,
        }
    }
}

/// Wire the services and start the job executor. Needs a running tokio runtime.
pub fn build_services<S: PackageStore>(
    store: Arc<S>,
    rates: Arc<dyn RateProvider>,
    options: WorkerOptions,
) -> (Arc<AppServices<S>>, BackgroundWorkers) {
    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new().with_retention(options.job_retention));

    let packages = PackageService::new(store.clone());
    let claims = ClaimService::new(store.clone());
    let cost_job = DeliveryCostJob::new(store, rates);

    let dispatcher = TaskDispatcher::new(job_store.clone())
        .with_cost_policy(options.cost_policy)
        .with_registration_policy(options.registration_policy);

    let executor = JobExecutor::new(job_store)
        .with_handler(
            JobKind::CalculateDeliveryCosts.type_name(),
            Arc::new(DeliveryCostHandler::new(cost_job)),
        )
        .with_handler(
            JobKind::RegisterPackage.type_name(),
            Arc::new(RegisterPackageHandler::new(packages.clone())),
        )
        .spawn(
            JobExecutorConfig::default()
                .with_name("parcelhub-worker")
                .with_max_concurrent(options.concurrency)
                .with_time_limit(options.time_limit)
                .with_poll_interval(options.poll_interval),
        );

    let schedule = options.cost_schedule.map(|period| dispatcher.spawn_cost_schedule(period));

    let services = Arc::new(AppServices {
        packages,
        claims,
        dispatcher,
    });

    (services, BackgroundWorkers { executor, schedule })
}

/// The cached exchange-rate lookup described by `config`.
pub fn build_rate_provider(config: &AppConfig) -> Result<Arc<dyn RateProvider>, RateError> {
    let source = CbrRateSource::new(&config.rate_source_url, &config.rate_currency, config.rate_timeout)?;
    let cache = RateCache::new(Arc::new(source)).with_ttl(config.rate_ttl);

    #[cfg(feature = "redis")]
    let cache = match &config.redis_url {
        Some(url) => {
            let slot = parcelhub_infra::rates::RedisRateSlot::for_currency(url, &config.rate_currency)?;
            info!(key = slot.key(), "exchange rate cached in redis");
            cache.with_slot(Arc::new(slot))
        }
        None => cache,
    };

    if cfg!(not(feature = "redis")) && config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; caching the rate in process");
    }

    Ok(Arc::new(cache))
}
