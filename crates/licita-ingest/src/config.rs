//! Ingestion configuration
//!
//! Every knob has a `DEFAULT_*` constant and can be overridden from the
//! environment (a `.env` file is honoured by the binary). Command line flags
//! override both.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "PublicWorksAI/2.0";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 2;

pub const DEFAULT_ARCHIVE_WORKERS: usize = 6;
pub const DEFAULT_ARCHIVE_RPS: f64 = 3.0;
pub const DEFAULT_ENTRY_WORKERS: usize = 4;
pub const DEFAULT_ENTRY_RPS: f64 = 100.0;

pub const DEFAULT_MONTHS_TO_CHECK: u32 = 24;
pub const DEFAULT_CHAIN_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_BULLETIN_MAX_DAYS: u32 = 7;

pub const DEFAULT_SYNDICATION_URL: &str =
    "https://contrataciondelestado.es/sindicacion/sindicacion_643/";
pub const DEFAULT_LISTING_URL: &str = "https://contrataciondelestado.es/datosabiertos/";
pub const DEFAULT_BULLETIN_URL: &str = "https://www.boe.es/datosabiertos/api/boe/sumario";

/// HTTP client settings shared by every source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    pub user_agent: String,
    /// Default per-request timeout (archive downloads)
    pub timeout_secs: u64,
    /// Timeout for HEAD existence probes
    pub probe_timeout_secs: u64,
    /// Timeout for chained feed documents
    pub feed_timeout_secs: u64,
    /// Retries after the first attempt on 429/5xx and connection errors
    pub max_retries: u32,
    /// Base of the exponential backoff, doubled after each failed attempt
    pub retry_backoff_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            feed_timeout_secs: DEFAULT_FEED_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_SECS * 1000,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Width and throughput of one worker pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PoolSettings {
    pub workers: usize,
    pub requests_per_second: f64,
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub http: HttpSettings,
    /// Outer pool: archive download and feed parsing
    pub archive_pool: PoolSettings,
    /// Inner pool: per-entry extraction and normalization
    pub entry_pool: PoolSettings,
    /// Historical window used when no previous run timestamp is known
    pub months_to_check: u32,
    pub chain_max_iterations: usize,
    pub syndication_url: String,
    pub listing_url: String,
    pub bulletin_url: String,
    /// Upper bound on daily bulletins fetched in one incremental run
    pub bulletin_max_days: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            archive_pool: PoolSettings {
                workers: DEFAULT_ARCHIVE_WORKERS,
                requests_per_second: DEFAULT_ARCHIVE_RPS,
            },
            entry_pool: PoolSettings {
                workers: DEFAULT_ENTRY_WORKERS,
                requests_per_second: DEFAULT_ENTRY_RPS,
            },
            months_to_check: DEFAULT_MONTHS_TO_CHECK,
            chain_max_iterations: DEFAULT_CHAIN_MAX_ITERATIONS,
            syndication_url: DEFAULT_SYNDICATION_URL.to_string(),
            listing_url: DEFAULT_LISTING_URL.to_string(),
            bulletin_url: DEFAULT_BULLETIN_URL.to_string(),
            bulletin_max_days: DEFAULT_BULLETIN_MAX_DAYS,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl IngestConfig {
    /// Load configuration from `LICITA_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            http: HttpSettings {
                user_agent: env_string("LICITA_USER_AGENT", DEFAULT_USER_AGENT),
                timeout_secs: env_or("LICITA_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
                probe_timeout_secs: env_or("LICITA_PROBE_TIMEOUT_SECS", DEFAULT_PROBE_TIMEOUT_SECS),
                feed_timeout_secs: env_or("LICITA_FEED_TIMEOUT_SECS", DEFAULT_FEED_TIMEOUT_SECS),
                max_retries: env_or("LICITA_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                retry_backoff_ms: env_or("LICITA_RETRY_BACKOFF_SECS", DEFAULT_RETRY_BACKOFF_SECS)
                    * 1000,
            },
            archive_pool: PoolSettings {
                workers: env_or("LICITA_ARCHIVE_WORKERS", defaults.archive_pool.workers),
                requests_per_second: env_or(
                    "LICITA_ARCHIVE_RPS",
                    defaults.archive_pool.requests_per_second,
                ),
            },
            entry_pool: PoolSettings {
                workers: env_or("LICITA_ENTRY_WORKERS", defaults.entry_pool.workers),
                requests_per_second: env_or(
                    "LICITA_ENTRY_RPS",
                    defaults.entry_pool.requests_per_second,
                ),
            },
            months_to_check: env_or("LICITA_MONTHS_TO_CHECK", DEFAULT_MONTHS_TO_CHECK),
            chain_max_iterations: env_or(
                "LICITA_CHAIN_MAX_ITERATIONS",
                DEFAULT_CHAIN_MAX_ITERATIONS,
            ),
            syndication_url: env_string("LICITA_SYNDICATION_URL", DEFAULT_SYNDICATION_URL),
            listing_url: env_string("LICITA_LISTING_URL", DEFAULT_LISTING_URL),
            bulletin_url: env_string("LICITA_BULLETIN_URL", DEFAULT_BULLETIN_URL),
            bulletin_max_days: env_or("LICITA_BULLETIN_MAX_DAYS", DEFAULT_BULLETIN_MAX_DAYS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(IngestError::Config(msg.to_string()));

        if self.http.timeout_secs == 0 || self.http.probe_timeout_secs == 0 {
            return fail("HTTP timeouts must be greater than 0");
        }
        if self.http.feed_timeout_secs == 0 {
            return fail("LICITA_FEED_TIMEOUT_SECS must be greater than 0");
        }
        for (name, pool) in [("archive", &self.archive_pool), ("entry", &self.entry_pool)] {
            if pool.workers == 0 {
                return Err(IngestError::Config(format!(
                    "{} pool needs at least one worker",
                    name
                )));
            }
            if !pool.requests_per_second.is_finite() || pool.requests_per_second <= 0.0 {
                return Err(IngestError::Config(format!(
                    "{} pool requests per second must be a positive number",
                    name
                )));
            }
        }
        if self.months_to_check == 0 {
            return fail("LICITA_MONTHS_TO_CHECK must be greater than 0");
        }
        if self.chain_max_iterations == 0 {
            return fail("LICITA_CHAIN_MAX_ITERATIONS must be greater than 0");
        }
        for url in [&self.syndication_url, &self.listing_url, &self.bulletin_url] {
            url::Url::parse(url)
                .map_err(|e| IngestError::Config(format!("invalid URL {}: {}", url, e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.archive_pool.workers, 6);
        assert_eq!(config.entry_pool.workers, 4);
        assert_eq!(config.http.retry_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = IngestConfig::default();
        config.entry_pool.workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("entry pool"));
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let mut config = IngestConfig::default();
        config.archive_pool.requests_per_second = 0.0;
        assert!(config.validate().is_err());

        config.archive_pool.requests_per_second = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_url() {
        let config = IngestConfig {
            listing_url: "not a url".to_string(),
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
