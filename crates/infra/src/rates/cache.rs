//! TTL cache in front of a [`RateSource`].
//!
//! No single-flight: concurrent misses may each fetch and overwrite the slot;
//! the last write wins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use parcelhub_core::{Clock, SystemClock};
use parcelhub_shipping::ExchangeRate;

use super::{RateError, RateProvider, RateSource};

/// Storage for the one cached rate.
#[async_trait]
pub trait RateSlot: Send + Sync + 'static {
    /// The stored rate if it has not expired at `now`.
    async fn load(&self, now: DateTime<Utc>) -> Result<Option<ExchangeRate>, RateError>;

    async fn store(&self, rate: ExchangeRate, now: DateTime<Utc>, ttl: Duration) -> Result<(), RateError>;
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: ExchangeRate,
    expires_at: DateTime<Utc>,
}

/// Process-local slot.
#[derive(Debug, Default)]
pub struct InMemoryRateSlot {
    cached: Mutex<Option<CachedRate>>,
}

impl InMemoryRateSlot {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateSlot for InMemoryRateSlot {
    async fn load(&self, now: DateTime<Utc>) -> Result<Option<ExchangeRate>, RateError> {
        let cached = self
            .cached
            .lock()
            .map_err(|_| RateError::Slot("rate slot mutex poisoned".to_string()))?;
        Ok(cached.filter(|c| now < c.expires_at).map(|c| c.rate))
    }

    async fn store(&self, rate: ExchangeRate, now: DateTime<Utc>, ttl: Duration) -> Result<(), RateError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| RateError::Slot(e.to_string()))?;
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| RateError::Slot("rate slot mutex poisoned".to_string()))?;
        *cached = Some(CachedRate {
            rate,
            expires_at: now + ttl,
        });
        Ok(())
    }
}

/// Cached exchange rate provider.
pub struct RateCache {
    source: Arc<dyn RateSource>,
    slot: Arc<dyn RateSlot>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RateCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self {
            source,
            slot: Arc::new(InMemoryRateSlot::new()),
            clock: Arc::new(SystemClock),
            ttl: Self::DEFAULT_TTL,
        }
    }

    pub fn with_slot(mut self, slot: Arc<dyn RateSlot>) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for RateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

#[async_trait]
impl RateProvider for RateCache {
    async fn current_rate(&self) -> Option<ExchangeRate> {
        let now = self.clock.now();
        match self.slot.load(now).await {
            Ok(Some(rate)) => {
                debug!(%rate, "exchange rate served from cache");
                return Some(rate);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "rate cache read failed; treating as a miss"),
        }

        let rate = match self.source.fetch().await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(error = %e, "exchange rate unavailable");
                return None;
            }
        };

        if let Err(e) = self.slot.store(rate, self.clock.now(), self.ttl).await {
            warn!(error = %e, "rate cache write failed");
        }
        info!(%rate, ttl_secs = self.ttl.as_secs(), "exchange rate refreshed");
        Some(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parcelhub_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        answers: Mutex<Vec<Result<ExchangeRate, RateError>>>,
    }

    impl CountingSource {
        fn new(answers: Vec<Result<ExchangeRate, RateError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answers: Mutex::new(answers),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for CountingSource {
        async fn fetch(&self) -> Result<ExchangeRate, RateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            }
        }
    }

    fn rate(v: f64) -> ExchangeRate {
        ExchangeRate::new(v).unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 5, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn cached_until_ttl_then_refetched() {
        let source = CountingSource::new(vec![Ok(rate(90.0)), Ok(rate(91.0))]);
        let clock = Arc::new(ManualClock::new(start()));
        let cache = RateCache::new(source.clone())
            .with_clock(clock.clone())
            .with_ttl(Duration::from_secs(3600));

        assert_eq!(cache.current_rate().await, Some(rate(90.0)));
        assert_eq!(source.calls(), 1);

        clock.advance(chrono::Duration::seconds(3599));
        assert_eq!(cache.current_rate().await, Some(rate(90.0)));
        assert_eq!(source.calls(), 1);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(cache.current_rate().await, Some(rate(91.0)));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn failures_are_absent_and_not_cached() {
        let source = CountingSource::new(vec![
            Err(RateError::Status(500)),
            Err(RateError::Malformed("no json".to_string())),
            Ok(rate(88.5)),
        ]);
        let cache = RateCache::new(source.clone()).with_clock(Arc::new(ManualClock::new(start())));

        assert_eq!(cache.current_rate().await, None);
        assert_eq!(cache.current_rate().await, None);
        assert_eq!(cache.current_rate().await, Some(rate(88.5)));
        assert_eq!(cache.current_rate().await, Some(rate(88.5)));
        assert_eq!(source.calls(), 3);
    }

    struct BrokenSlot;

    #[async_trait]
    impl RateSlot for BrokenSlot {
        async fn load(&self, _now: DateTime<Utc>) -> Result<Option<ExchangeRate>, RateError> {
            Err(RateError::Slot("connection refused".to_string()))
        }

        async fn store(&self, _rate: ExchangeRate, _now: DateTime<Utc>, _ttl: Duration) -> Result<(), RateError> {
            Err(RateError::Slot("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn broken_slot_degrades_to_direct_fetches() {
        let source = CountingSource::new(vec![Ok(rate(90.0))]);
        let cache = RateCache::new(source.clone()).with_slot(Arc::new(BrokenSlot));

        assert_eq!(cache.current_rate().await, Some(rate(90.0)));
        assert_eq!(cache.current_rate().await, Some(rate(90.0)));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn in_memory_slot_expires_at_the_boundary() {
        let slot = InMemoryRateSlot::new();
        slot.store(rate(90.0), start(), Duration::from_secs(10)).await.unwrap();

        let just_before = start() + chrono::Duration::seconds(9);
        let at_expiry = start() + chrono::Duration::seconds(10);
        assert_eq!(slot.load(just_before).await.unwrap(), Some(rate(90.0)));
        assert_eq!(slot.load(at_expiry).await.unwrap(), None);
    }
}
