//! Enqueueing parcel jobs and reporting their status.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use super::handlers::RegisterPackagePayload;
use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{DeadLetterEntry, Job, JobId, JobKind, JobStatus, RetryPolicy};

/// What a task handle currently reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, or waiting out a retry delay.
    Pending,
    Running,
    Succeeded { result: JsonValue },
    /// Retries exhausted.
    Failed { error: String },
}

impl From<&Job> for TaskStatus {
    fn from(job: &Job) -> Self {
        match &job.status {
            JobStatus::Pending | JobStatus::Failed { .. } => TaskStatus::Pending,
            JobStatus::Running => TaskStatus::Running,
            JobStatus::Completed => TaskStatus::Succeeded {
                result: job.result.clone().unwrap_or(JsonValue::Null),
            },
            JobStatus::DeadLettered { error, .. } => TaskStatus::Failed { error: error.clone() },
        }
    }
}

/// Front door of the work queue.
#[derive(Clone)]
pub struct TaskDispatcher {
    store: Arc<dyn JobStore>,
    cost_policy: RetryPolicy,
    registration_policy: RetryPolicy,
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            cost_policy: RetryPolicy::fixed(3, Duration::from_secs(60)),
            registration_policy: RetryPolicy::fixed(3, Duration::from_secs(30)),
        }
    }

    pub fn with_cost_policy(mut self, policy: RetryPolicy) -> Self {
        self.cost_policy = policy;
        self
    }

    pub fn with_registration_policy(mut self, policy: RetryPolicy) -> Self {
        self.registration_policy = policy;
        self
    }

    /// Queue one run of the batch delivery-cost update.
    pub fn enqueue_cost_update(&self) -> Result<JobId, JobStoreError> {
        let job = Job::new(JobKind::CalculateDeliveryCosts, JsonValue::Object(Default::default()))
            .with_retry_policy(self.cost_policy.clone());
        let id = self.store.enqueue(job)?;
        info!(task_id = %id, "delivery cost update queued");
        Ok(id)
    }

    /// Queue registration of a client-submitted package.
    pub fn enqueue_package_registration(&self, payload: &RegisterPackagePayload) -> Result<JobId, JobStoreError> {
        let payload = serde_json::to_value(payload).map_err(|e| JobStoreError::Storage(e.to_string()))?;
        let job = Job::new(JobKind::RegisterPackage, payload).with_retry_policy(self.registration_policy.clone());
        let id = self.store.enqueue(job)?;
        info!(task_id = %id, "package registration queued");
        Ok(id)
    }

    /// `None` for handles this queue never issued.
    pub fn status(&self, id: JobId) -> Result<Option<TaskStatus>, JobStoreError> {
        Ok(self.store.get(id)?.as_ref().map(TaskStatus::from))
    }

    pub fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.store.stats()
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        self.store.list_dead_letters(limit)
    }

    /// Enqueue a cost update every `period`, starting one period from now.
    pub fn spawn_cost_schedule(&self, period: Duration) -> ScheduleHandle {
        let dispatcher = self.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = period.as_secs(), "delivery cost schedule started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.enqueue_cost_update() {
                            error!(error = %e, "scheduled delivery cost update could not be queued");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("delivery cost schedule stopped");
        });

        ScheduleHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("cost_policy", &self.cost_policy)
            .field("registration_policy", &self.registration_policy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ScheduleHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ScheduleHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use chrono::Utc;

    fn dispatcher() -> (Arc<InMemoryJobStore>, TaskDispatcher) {
        let store = InMemoryJobStore::arc();
        (store.clone(), TaskDispatcher::new(store))
    }

    #[test]
    fn enqueued_cost_update_starts_pending_with_the_fixed_policy() {
        let (store, dispatcher) = dispatcher();
        let id = dispatcher.enqueue_cost_update().unwrap();

        assert_eq!(dispatcher.status(id).unwrap(), Some(TaskStatus::Pending));
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.kind, JobKind::CalculateDeliveryCosts);
        assert_eq!(job.retry_policy, RetryPolicy::fixed(3, Duration::from_secs(60)));
    }

    #[test]
    fn unknown_handles_have_no_status() {
        let (_store, dispatcher) = dispatcher();
        assert_eq!(dispatcher.status(JobId::new()).unwrap(), None);
    }

    #[test]
    fn status_follows_the_job_lifecycle() {
        let (store, dispatcher) = dispatcher();
        let id = dispatcher.enqueue_cost_update().unwrap();

        let mut job = store.claim_next(Utc::now()).unwrap().unwrap();
        assert_eq!(dispatcher.status(id).unwrap(), Some(TaskStatus::Running));

        job.mark_failed("db down".to_string(), Utc::now());
        store.update(&job).unwrap();
        assert_eq!(dispatcher.status(id).unwrap(), Some(TaskStatus::Pending));

        job.mark_running();
        job.mark_completed(serde_json::json!({"updated_packages": 2}), Utc::now());
        store.update(&job).unwrap();
        assert_eq!(
            dispatcher.status(id).unwrap(),
            Some(TaskStatus::Succeeded {
                result: serde_json::json!({"updated_packages": 2})
            })
        );
    }

    #[test]
    fn exhausted_job_reports_failed() {
        let (store, dispatcher) = dispatcher();
        let dispatcher = dispatcher.with_cost_policy(RetryPolicy::no_retry());
        let id = dispatcher.enqueue_cost_update().unwrap();

        let mut job = store.claim_next(Utc::now()).unwrap().unwrap();
        job.mark_failed("rate source down".to_string(), Utc::now());
        store.dead_letter(job, "rate source down".to_string()).unwrap();

        assert_eq!(
            dispatcher.status(id).unwrap(),
            Some(TaskStatus::Failed {
                error: "rate source down".to_string()
            })
        );
        assert_eq!(dispatcher.dead_letters(10).unwrap().len(), 1);
    }

    #[test]
    fn task_status_serializes_with_a_status_tag() {
        let json = serde_json::to_value(TaskStatus::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "error": "boom"}));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_enqueues_through_the_same_path() {
        let (store, dispatcher) = dispatcher();
        let handle = dispatcher.spawn_cost_schedule(Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(store.stats().unwrap().pending, 0);

        tokio::time::sleep(Duration::from_secs(302)).await;
        assert_eq!(store.stats().unwrap().pending, 2);

        handle.shutdown().await;
    }
}
