//! Typed configuration.
//!
//! [`Config`] carries process environment (connection string, telemetry),
//! loaded once at startup; fails fast if required vars are missing. The
//! database URL is wrapped in `secrecy::SecretString` to keep it out of logs.
//!
//! [`RunConfig`] carries the parameters of one add-work / do-work run. It is
//! built once (defaults, then an optional TOML file, then CLI flags),
//! validated, and passed by reference into every component constructor.

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Parameters of one run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Jurisdiction every identifier of this run belongs to.
    pub jurisdiction: String,
    /// Provenance label stamped on inserted records.
    pub tag: Option<String>,
    /// Number of concurrent executors.
    pub workers: usize,
    /// Records per transaction. 0 writes every record directly.
    pub tx_size: usize,
    /// Per-worker cap on successful lookups.
    pub work_limit: Option<usize>,
    /// Work queue prefetch is `prefetch_factor * workers`.
    pub prefetch_factor: usize,
    /// Bound of the generator channel.
    pub channel_capacity: usize,
    pub monitor_interval_secs: u64,
    pub progress_interval_secs: u64,
    /// Pause before a worker retries after a failed queue refill.
    pub retry_delay_ms: u64,
    /// Log what would be added without touching the ledger.
    pub dry_run: bool,
    /// Batched adds skip the existence check (input is known unique).
    pub skip_existing_check: bool,
    /// Drop identifiers already done in the ledger before adding.
    pub dedup_done: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            jurisdiction: "NY".to_string(),
            tag: None,
            workers: 20,
            tx_size: 0,
            work_limit: None,
            prefetch_factor: 4,
            channel_capacity: 1024,
            monitor_interval_secs: 10,
            progress_interval_secs: 1,
            retry_delay_ms: 500,
            dry_run: false,
            skip_existing_check: false,
            dedup_done: false,
        }
    }
}

impl RunConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read run config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad run config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Reject parameter combinations no run can work with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));
        if self.jurisdiction.trim().is_empty() {
            return fail("jurisdiction must not be empty");
        }
        if self.workers == 0 {
            return fail("workers must be at least 1");
        }
        if self.prefetch_factor == 0 {
            return fail("prefetch_factor must be at least 1");
        }
        if self.channel_capacity == 0 {
            return fail("channel_capacity must be at least 1");
        }
        if self.work_limit == Some(0) {
            return fail("work_limit must be at least 1 when set");
        }
        if self.monitor_interval_secs == 0 || self.progress_interval_secs == 0 {
            return fail("intervals must be at least one second");
        }
        if self.skip_existing_check && self.tx_size == 0 {
            return fail("skip_existing_check requires tx_size > 0");
        }
        Ok(())
    }

    /// Transaction size when batching is enabled.
    pub fn batch_size(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.tx_size)
    }

    /// Identifiers fetched per work queue refill.
    pub fn prefetch(&self) -> usize {
        self.prefetch_factor.saturating_mul(self.workers).max(1)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
