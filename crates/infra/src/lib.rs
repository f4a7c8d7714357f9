//! Infrastructure layer: storage, exchange rates, services, background jobs, config.

pub mod claim;
pub mod config;
pub mod jobs;
pub mod packages;
pub mod pricing;
pub mod rates;
pub mod store;

pub use claim::{ClaimOutcome, ClaimService};
pub use config::{AppConfig, ConfigError};
pub use packages::{PackageError, PackageService};
pub use pricing::DeliveryCostJob;
