//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Central bank daily rates, JSON flavour.
pub const DEFAULT_RATE_SOURCE_URL: &str = "https://www.cbr-xml-daily.ru/daily_json.js";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the API process and its workers need.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub url_prefix: String,
    pub rate_source_url: String,
    pub rate_currency: String,
    pub rate_timeout: Duration,
    pub rate_ttl: Duration,
    pub cost_schedule_interval: Duration,
    pub job_max_retries: u32,
    pub job_retry_delay: Duration,
    pub job_time_limit: Duration,
    pub worker_concurrency: usize,
    /// How long finished jobs stay queryable through the task status route.
    pub job_result_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            url_prefix: "/backend/api".to_string(),
            rate_source_url: DEFAULT_RATE_SOURCE_URL.to_string(),
            rate_currency: "USD".to_string(),
            rate_timeout: Duration::from_secs(10),
            rate_ttl: Duration::from_secs(3600),
            cost_schedule_interval: Duration::from_secs(300),
            job_max_retries: 3,
            job_retry_delay: Duration::from_secs(60),
            job_time_limit: Duration::from_secs(20 * 60),
            worker_concurrency: 4,
            job_result_ttl: Duration::from_secs(3600),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let url_prefix = match get("URL_PREFIX") {
            Some(prefix) => normalize_prefix(&prefix),
            None => defaults.url_prefix,
        };

        let worker_concurrency = parse_or("WORKER_CONCURRENCY", get("WORKER_CONCURRENCY"), defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            bind_addr: parse_or("BIND_ADDR", get("BIND_ADDR"), defaults.bind_addr)?,
            url_prefix,
            rate_source_url: get("RATE_SOURCE_URL").unwrap_or(defaults.rate_source_url),
            rate_currency: get("RATE_CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or(defaults.rate_currency),
            rate_timeout: positive_secs_or("RATE_TIMEOUT_SECS", get("RATE_TIMEOUT_SECS"), defaults.rate_timeout)?,
            rate_ttl: secs_or("RATE_TTL_SECS", get("RATE_TTL_SECS"), defaults.rate_ttl)?,
            cost_schedule_interval: positive_secs_or(
                "COST_SCHEDULE_SECS",
                get("COST_SCHEDULE_SECS"),
                defaults.cost_schedule_interval,
            )?,
            job_max_retries: parse_or("JOB_MAX_RETRIES", get("JOB_MAX_RETRIES"), defaults.job_max_retries)?,
            job_retry_delay: secs_or("JOB_RETRY_DELAY_SECS", get("JOB_RETRY_DELAY_SECS"), defaults.job_retry_delay)?,
            job_time_limit: positive_secs_or("JOB_TIME_LIMIT_SECS", get("JOB_TIME_LIMIT_SECS"), defaults.job_time_limit)?,
            worker_concurrency,
            job_result_ttl: positive_secs_or("JOB_RESULT_TTL_SECS", get("JOB_RESULT_TTL_SECS"), defaults.job_result_ttl)?,
        })
    }
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

fn secs_or(key: &'static str, value: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(key, value, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}

/// Like `secs_or`, for durations where zero breaks the consumer
/// (`tokio::time::interval` panics on a zero period).
fn positive_secs_or(key: &'static str, value: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let duration = secs_or(key, value, default)?;
    if duration.is_zero() {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.rate_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.job_max_retries, 3);
        assert_eq!(cfg.job_time_limit, Duration::from_secs(1200));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://localhost/parcels"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("URL_PREFIX", "api/"),
            ("RATE_CURRENCY", "eur"),
            ("RATE_TTL_SECS", "60"),
            ("WORKER_CONCURRENCY", "8"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/parcels"));
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.url_prefix, "/api");
        assert_eq!(cfg.rate_currency, "EUR");
        assert_eq!(cfg.rate_ttl, Duration::from_secs(60));
        assert_eq!(cfg.worker_concurrency, 8);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("DATABASE_URL", "  "), ("URL_PREFIX", "")]).unwrap();
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.url_prefix, "/backend/api");
    }

    #[test]
    fn root_prefix_mounts_at_root() {
        let cfg = config(&[("URL_PREFIX", "/")]).unwrap();
        assert_eq!(cfg.url_prefix, "");
    }

    #[test]
    fn invalid_numbers_are_reported_with_their_key() {
        let err = config(&[("JOB_MAX_RETRIES", "three")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JOB_MAX_RETRIES", .. }));

        let err = config(&[("WORKER_CONCURRENCY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WORKER_CONCURRENCY", .. }));
    }

    #[test]
    fn zero_durations_are_rejected_where_they_break_workers() {
        for key in [
            "COST_SCHEDULE_SECS",
            "RATE_TIMEOUT_SECS",
            "JOB_TIME_LIMIT_SECS",
            "JOB_RESULT_TTL_SECS",
        ] {
            let err = config(&[(key, "0")]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { key: k, .. } if *k == key),
                "{key}: {err}"
            );
        }

        // Zero is still a valid retry delay.
        let cfg = config(&[("JOB_RETRY_DELAY_SECS", "0")]).unwrap();
        assert_eq!(cfg.job_retry_delay, Duration::ZERO);
    }

    #[test]
    fn job_result_ttl_defaults_to_an_hour() {
        assert_eq!(config(&[]).unwrap().job_result_ttl, Duration::from_secs(3600));
        let cfg = config(&[("JOB_RESULT_TTL_SECS", "120")]).unwrap();
        assert_eq!(cfg.job_result_ttl, Duration::from_secs(120));
    }
}
