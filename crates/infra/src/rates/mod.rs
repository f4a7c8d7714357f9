//! Exchange rate acquisition.
//!
//! - [`RateSource`]: one fetch from an external provider, may fail.
//! - [`RateSlot`]: where a fetched rate is kept until it expires.
//! - [`RateCache`]: the [`RateProvider`] the rest of the system uses; turns
//!   every failure into `None`.

use async_trait::async_trait;
use thiserror::Error;

use parcelhub_shipping::ExchangeRate;

pub mod cache;
pub mod cbr;
#[cfg(feature = "redis")]
pub mod redis_slot;

pub use cache::{InMemoryRateSlot, RateCache, RateSlot};
pub use cbr::CbrRateSource;
#[cfg(feature = "redis")]
pub use redis_slot::RedisRateSlot;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("rate request failed: {0}")]
    Http(String),

    #[error("rate source answered with HTTP {0}")]
    Status(u16),

    #[error("malformed rate document: {0}")]
    Malformed(String),

    #[error("currency {0} missing from rate document")]
    MissingCurrency(String),

    #[error("rate slot error: {0}")]
    Slot(String),
}

/// A single external rate lookup.
#[async_trait]
pub trait RateSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<ExchangeRate, RateError>;
}

/// The current rate, or `None` when none can be obtained right now.
#[async_trait]
pub trait RateProvider: Send + Sync + 'static {
    async fn current_rate(&self) -> Option<ExchangeRate>;
}

#[async_trait]
impl<P> RateProvider for std::sync::Arc<P>
where
    P: RateProvider + ?Sized,
{
    async fn current_rate(&self) -> Option<ExchangeRate> {
        (**self).current_rate().await
    }
}

/// Always returns the same rate. Handy for wiring tests and local runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub Option<ExchangeRate>);

#[async_trait]
impl RateProvider for FixedRate {
    async fn current_rate(&self) -> Option<ExchangeRate> {
        self.0
    }
}
