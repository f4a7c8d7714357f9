//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::{DeadLetterEntry, Job, JobId, JobStatus};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID. Dead-lettered jobs stay visible here.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Update a job.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the oldest pending or retriable job that is ready at `now`,
    /// marking it running.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// Record a job that exhausted its retries.
    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError>;

    /// List dead-lettered jobs, oldest first.
    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Drop completed and dead-lettered jobs whose retention window ended
    /// before `now`. Returns how many jobs were removed.
    fn purge_finished(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// How long finished jobs stay in the store unless configured otherwise.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// In-memory job store. Jobs do not survive a restart.
///
/// Finished jobs are kept for `retention` after their last update so task
/// status stays queryable, then dropped by [`JobStore::purge_finished`].
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
    retention: Duration,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self {
            jobs: RwLock::default(),
            dead_letters: RwLock::default(),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn jobs(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.read().map_err(|_| poisoned())
    }

    fn jobs_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs_mut()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs()?.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs_mut()?;
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs_mut()?;

        // Oldest ready job first (FIFO)
        let next = jobs
            .values()
            .filter(|j| (j.status == JobStatus::Pending || j.status.is_retriable()) && j.is_ready(now))
            .min_by_key(|j| (j.created_at, j.id.0))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.mark_running();
            job.clone()
        }))
    }

    fn dead_letter(&self, mut job: Job, reason: String) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs_mut()?;
        let mut dls = self.dead_letters.write().map_err(|_| poisoned())?;

        if !matches!(job.status, JobStatus::DeadLettered { .. }) {
            job.status = JobStatus::DeadLettered {
                error: reason.clone(),
                attempts: job.attempt,
            };
            job.updated_at = Utc::now();
        }

        jobs.insert(job.id, job.clone());
        dls.insert(job.id, DeadLetterEntry::new(job, reason));
        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let dls = self.dead_letters.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = dls.values().cloned().collect();
        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs()?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::DeadLettered { .. } => stats.dead_lettered += 1,
            }
        }

        Ok(stats)
    }

    fn purge_finished(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expired = |at: DateTime<Utc>| at.checked_add_signed(retention).is_some_and(|end| end <= now);

        let mut jobs = self.jobs_mut()?;
        let mut dls = self.dead_letters.write().map_err(|_| poisoned())?;

        let before = jobs.len();
        jobs.retain(|_, job| {
            let finished = matches!(job.status, JobStatus::Completed | JobStatus::DeadLettered { .. });
            !(finished && expired(job.updated_at))
        });
        dls.retain(|id, entry| jobs.contains_key(id) && !expired(entry.dead_lettered_at));

        Ok(before - jobs.len())
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(now)
    }

    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError> {
        (**self).dead_letter(job, reason)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        (**self).list_dead_letters(limit)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }

    fn purge_finished(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        (**self).purge_finished(now)
    }
}
