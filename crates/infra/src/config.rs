//! Configuration loading and representation.
//!
//! Settings come from environment variables with development defaults, so a
//! bare `StockConfig::from_env()` works on a laptop and production overrides
//! only what it needs.

use std::time::Duration;

use thiserror::Error;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MAX_RETRIES: &str = "SPARESTOCK_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "SPARESTOCK_RETRY_BACKOFF_MS";
pub const ENV_TX_TIMEOUT_MS: &str = "SPARESTOCK_TX_TIMEOUT_MS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "SPARESTOCK_LOCK_TIMEOUT_MS";
pub const ENV_MAX_PAGE_SIZE: &str = "SPARESTOCK_MAX_PAGE_SIZE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for the stock engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Extra attempts after an optimistic concurrency conflict.
    pub max_retries: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Upper bound for a single read-validate-write attempt.
    pub transaction_timeout: Duration,
    /// `lock_timeout` applied to each Postgres transaction.
    pub lock_timeout: Duration,
    /// Hard cap on report page sizes.
    pub max_page_size: u32,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
            transaction_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(2),
            max_page_size: 1000,
        }
    }
}

impl StockConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (missing keys keep their defaults).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup(ENV_DATABASE_URL).filter(|url| !url.trim().is_empty());
        let max_retries = parse_or(&lookup, ENV_MAX_RETRIES, defaults.max_retries)?;
        let retry_backoff = parse_millis_or(&lookup, ENV_RETRY_BACKOFF_MS, defaults.retry_backoff)?;
        let transaction_timeout =
            parse_millis_or(&lookup, ENV_TX_TIMEOUT_MS, defaults.transaction_timeout)?;
        let lock_timeout = parse_millis_or(&lookup, ENV_LOCK_TIMEOUT_MS, defaults.lock_timeout)?;
        let max_page_size = parse_or(&lookup, ENV_MAX_PAGE_SIZE, defaults.max_page_size)?;

        if transaction_timeout.is_zero() {
            return Err(invalid(ENV_TX_TIMEOUT_MS, "0", "must be greater than zero"));
        }
        if max_page_size == 0 {
            return Err(invalid(ENV_MAX_PAGE_SIZE, "0", "must be greater than zero"));
        }

        Ok(Self {
            database_url,
            max_retries,
            retry_backoff,
            transaction_timeout,
            lock_timeout,
            max_page_size,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn parse_millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let millis = parse_or(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
