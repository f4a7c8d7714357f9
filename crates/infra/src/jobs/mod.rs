//! Background job system with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs are typed by kind and carry a JSON payload
//! - Retry policy is a value on the job, evaluated by the executor
//! - Jobs that exhaust their retries are dead-lettered and stay queryable
//! - Each attempt runs under a wall-clock limit
//!
//! ## Components
//!
//! - `Job`: Core job abstraction with payload and metadata
//! - `JobStore`: Persistence for jobs (in-memory)
//! - `JobExecutor`: Polling worker pool with bounded concurrency
//! - `TaskDispatcher`: Enqueue side, task status and the periodic trigger

pub mod dispatch;
pub mod executor;
pub mod handlers;
pub mod store;
pub mod types;

pub use dispatch::{ScheduleHandle, TaskDispatcher, TaskStatus};
pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler};
pub use handlers::{DeliveryCostHandler, RegisterPackageHandler, RegisterPackagePayload};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{DeadLetterEntry, Job, JobId, JobKind, JobResult, JobStatus, RetryPolicy};
