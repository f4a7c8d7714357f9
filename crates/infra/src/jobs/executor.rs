//! Job executor with retry, backoff and a per-attempt time limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::JobStore;
use super::types::{Job, JobResult, JobStatus};

/// Runs one kind of job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> JobResult;
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// Maximum concurrent jobs
    pub max_concurrent: usize,
    /// Wall-clock limit for a single attempt
    pub time_limit: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_concurrent: 4,
            time_limit: Duration::from_secs(20 * 60),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Stop claiming new jobs and wait for running ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "job executor task ended abnormally");
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub current_running: usize,
}

/// Background job executor.
///
/// Polls a job store for ready jobs, runs them with registered handlers, and
/// applies each job's retry policy to failures.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    time_limit: Duration,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            time_limit: JobExecutorConfig::default().time_limit,
        }
    }

    /// Register the handler for a job kind (see `JobKind::type_name`).
    pub fn register_handler(&mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn with_handler(mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.register_handler(kind, handler);
        self
    }

    fn get_handler(&self, job: &Job) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job.kind.type_name()).cloned()
    }

    /// Spawn the executor loop on the current tokio runtime.
    pub fn spawn(mut self, config: JobExecutorConfig) -> JobExecutorHandle {
        self.time_limit = config.time_limit;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));

        let join = tokio::spawn(executor_loop(Arc::new(self), config, shutdown_rx, stats.clone()));

        JobExecutorHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    /// Execute one claimed job and persist the outcome.
    ///
    /// Returns the error of a failed attempt.
    pub async fn execute_one(&self, job: &mut Job) -> Result<(), String> {
        let Some(handler) = self.get_handler(job) else {
            let error = format!("no handler for job kind: {}", job.kind.type_name());
            warn!(job_id = %job.id, error = %error, "no handler for job");
            job.mark_fatal(error.clone(), Utc::now());
            self.persist_dead_letter(job, &error);
            return Err(error);
        };

        let started = Utc::now();
        let outcome = run_with_limit(handler, job.clone(), self.time_limit).await;

        match outcome {
            JobResult::Success(result) => {
                job.mark_completed(result, started);
                self.persist_completed(job);
                debug!(job_id = %job.id, kind = job.kind.type_name(), "job completed successfully");
                Ok(())
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone(), started);
                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                    warn!(job_id = %job.id, attempts = job.attempt, error = %error, "job dead-lettered");
                    self.persist_dead_letter(job, &error);
                } else {
                    warn!(job_id = %job.id, attempt = job.attempt, error = %error, "job failed, retry scheduled");
                    self.store.update(job).map_err(|e| e.to_string())?;
                }
                Err(error)
            }
            JobResult::Fatal(error) => {
                job.mark_fatal(error.clone(), started);
                warn!(job_id = %job.id, error = %error, "job failed permanently");
                self.persist_dead_letter(job, &error);
                Err(error)
            }
        }
    }

    /// A lost write leaves the attempt a success; only the stored status lags.
    fn persist_completed(&self, job: &Job) {
        let Err(first) = self.store.update(job) else {
            return;
        };
        warn!(job_id = %job.id, error = %first, "failed to store completed job, retrying once");
        if let Err(e) = self.store.update(job) {
            error!(job_id = %job.id, error = %e, "completed job could not be stored");
        }
    }

    fn persist_dead_letter(&self, job: &Job, reason: &str) {
        if let Err(e) = self.store.dead_letter(job.clone(), reason.to_string()) {
            error!(job_id = %job.id, error = %e, "failed to dead-letter job");
        }
    }
}

/// Run the handler on its own task so a panic or an overrun is contained.
async fn run_with_limit(handler: Arc<dyn JobHandler>, job: Job, limit: Duration) -> JobResult {
    let task = tokio::spawn(async move { handler.handle(&job).await });
    let abort = task.abort_handle();

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => JobResult::Failure(format!("job handler crashed: {join_error}")),
        Err(_) => {
            abort.abort();
            JobResult::Failure(format!("time limit of {}s exceeded", limit.as_secs_f64()))
        }
    }
}

async fn executor_loop(
    executor: Arc<JobExecutor>,
    config: JobExecutorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, max_concurrent = config.max_concurrent, "job executor started");
    let permits = Arc::new(Semaphore::new(config.max_concurrent));

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = shutdown_rx.changed() => break,
        };

        match executor.store.claim_next(Utc::now()) {
            Ok(Some(mut job)) => {
                debug!(executor = %config.name, job_id = %job.id, kind = job.kind.type_name(), "claimed job");
                update_stats(&stats, |s| s.current_running += 1);

                let executor = executor.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let result = executor.execute_one(&mut job).await;
                    update_stats(&stats, |s| {
                        s.current_running = s.current_running.saturating_sub(1);
                        s.jobs_processed += 1;
                        match &result {
                            Ok(()) => s.jobs_succeeded += 1,
                            Err(_) => {
                                s.jobs_failed += 1;
                                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                                    s.jobs_dead_lettered += 1;
                                }
                            }
                        }
                    });
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                match executor.store.purge_finished(Utc::now()) {
                    Ok(0) => {}
                    Ok(purged) => debug!(executor = %config.name, purged, "purged finished jobs"),
                    Err(e) => warn!(executor = %config.name, error = %e, "failed to purge finished jobs"),
                }
                idle(&mut shutdown_rx, config.poll_interval).await;
            }
            Err(e) => {
                drop(permit);
                error!(executor = %config.name, error = %e, "failed to claim job");
                idle(&mut shutdown_rx, config.poll_interval).await;
            }
        }
    }

    // Wait for in-flight jobs.
    let _ = permits.acquire_many(config.max_concurrent as u32).await;
    info!(executor = %config.name, "job executor stopped");
}

async fn idle(shutdown_rx: &mut watch::Receiver<bool>, interval: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = shutdown_rx.changed() => {}
    }
}

fn update_stats(stats: &Mutex<ExecutorStats>, f: impl FnOnce(&mut ExecutorStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}
