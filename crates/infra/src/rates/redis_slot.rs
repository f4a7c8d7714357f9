//! Redis-backed rate slot, shared by every process pointing at the same Redis.
//!
//! Expiry is delegated to Redis (`SETEX`), so the `now` passed in by the cache
//! is ignored here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Commands;

use parcelhub_shipping::ExchangeRate;

use super::{RateError, RateSlot};

/// Key holding the rate for `currency`, e.g. `usd_to_rub_rate`.
pub fn rate_key(currency: &str) -> String {
    format!("{}_to_rub_rate", currency.trim().to_lowercase())
}

#[derive(Debug, Clone)]
pub struct RedisRateSlot {
    client: redis::Client,
    key: String,
}

impl RedisRateSlot {
    pub fn new(redis_url: impl AsRef<str>, key: impl Into<String>) -> Result<Self, RateError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RateError::Slot(e.to_string()))?;
        Ok(Self { client, key: key.into() })
    }

    /// Slot for `currency` under [`rate_key`].
    pub fn for_currency(redis_url: impl AsRef<str>, currency: &str) -> Result<Self, RateError> {
        Self::new(redis_url, rate_key(currency))
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RateSlot for RedisRateSlot {
    async fn load(&self, _now: DateTime<Utc>) -> Result<Option<ExchangeRate>, RateError> {
        let client = self.client.clone();
        let key = self.key.clone();

        let raw = tokio::task::spawn_blocking(move || -> redis::RedisResult<Option<String>> {
            let mut conn = client.get_connection()?;
            conn.get(&key)
        })
        .await
        .map_err(|e| RateError::Slot(e.to_string()))?
        .map_err(|e| RateError::Slot(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(raw) => {
                let rate: ExchangeRate =
                    serde_json::from_str(&raw).map_err(|e| RateError::Slot(format!("bad cached value: {e}")))?;
                Ok(Some(rate))
            }
        }
    }

    async fn store(&self, rate: ExchangeRate, _now: DateTime<Utc>, ttl: Duration) -> Result<(), RateError> {
        let client = self.client.clone();
        let key = self.key.clone();
        let payload = serde_json::to_string(&rate).map_err(|e| RateError::Slot(e.to_string()))?;
        let seconds = ttl.as_secs().max(1);

        tokio::task::spawn_blocking(move || -> redis::RedisResult<()> {
            let mut conn = client.get_connection()?;
            conn.set_ex(&key, payload, seconds)
        })
        .await
        .map_err(|e| RateError::Slot(e.to_string()))?
        .map_err(|e| RateError::Slot(e.to_string()))
    }
}
