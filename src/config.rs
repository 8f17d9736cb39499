use log::info;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::batch::DEFAULT_CHUNK_SIZE;
use crate::coordinator::RetryPolicy;
use crate::error::ConfigError;
use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Bulk import is disabled when unset.
    pub admin_token: Option<String>,
    pub redis_url: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub poll_cache_ttl: Duration,
    pub batch_chunk_size: usize,
    pub retry: RetryPolicy,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            database_url: optional("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:trusty_tally.db".to_string()),
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            admin_token: optional("ADMIN_TOKEN"),
            redis_url: optional("REDIS_URL"),
            rate_limit: RateLimitConfig {
                max_votes: positive(&lookup, "VOTE_RATE_LIMIT", 10)?,
                window: seconds(&lookup, "VOTE_RATE_WINDOW_SECS", 60)?,
            },
            poll_cache_ttl: seconds(&lookup, "POLL_CACHE_TTL_SECS", 300)?,
            batch_chunk_size: positive(&lookup, "BATCH_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            retry: RetryPolicy {
                max_attempts: positive(&lookup, "VOTE_WRITE_ATTEMPTS", 3)?,
                base_delay: Duration::from_millis(at_most(
                    "VOTE_RETRY_BASE_MS",
                    positive(&lookup, "VOTE_RETRY_BASE_MS", 50)?,
                    MAX_RETRY_BASE_MS,
                )?),
            },
            sweep_interval: seconds(&lookup, "KV_SWEEP_INTERVAL_SECS", 60)?,
        })
    }
}

// Upper bound for every TTL, window and interval, so deadlines computed
// from them cannot overflow.
const MAX_PERIOD_SECS: u64 = 24 * 60 * 60;
const MAX_RETRY_BASE_MS: u64 = 60_000;

fn at_most(key: &'static str, value: u64, max: u64) -> Result<u64, ConfigError> {
    if value > max {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: format!("must be at most {}", max),
        });
    }
    Ok(value)
}

fn seconds<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = at_most(key, positive(lookup, key, default)?, MAX_PERIOD_SECS)?;
    Ok(Duration::from_secs(secs))
}

fn positive<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        info!("{} not set, using default: {}", key, default);
        return Ok(default);
    };

    let value = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;

    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".into(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.poll_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.batch_chunk_size, 100);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn overrides() {
        let config = config_from(&[
            ("VOTE_RATE_LIMIT", "25"),
            ("BATCH_CHUNK_SIZE", " 50 "),
            ("ADMIN_TOKEN", "s3cret"),
            ("DATABASE_URL", "sqlite::memory:"),
        ])
        .unwrap();

        assert_eq!(config.rate_limit.max_votes, 25);
        assert_eq!(config.batch_chunk_size, 50);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn blank_admin_token_means_disabled() {
        let config = config_from(&[("ADMIN_TOKEN", "   ")]).unwrap();
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(config_from(&[("BATCH_CHUNK_SIZE", "0")]).is_err());
        assert!(config_from(&[("VOTE_RATE_WINDOW_SECS", "soon")]).is_err());
    }

    #[test]
    fn rejects_periods_that_would_overflow() {
        let huge = u64::MAX.to_string();
        assert!(config_from(&[("POLL_CACHE_TTL_SECS", huge.as_str())]).is_err());
        assert!(config_from(&[("VOTE_RATE_WINDOW_SECS", huge.as_str())]).is_err());
        assert!(config_from(&[("KV_SWEEP_INTERVAL_SECS", "86401")]).is_err());
        assert!(config_from(&[("VOTE_RETRY_BASE_MS", huge.as_str())]).is_err());

        let day = config_from(&[("POLL_CACHE_TTL_SECS", "86400")]).unwrap();
        assert_eq!(day.poll_cache_ttl, Duration::from_secs(86_400));
    }
}
