//! Environment-driven configuration.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::upstream::UpstreamClient;

/// Configuration error; always maps to exit code 1.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable held an unusable value.
    #[error("invalid {var}: {reason}")]
    Invalid {
        /// The offending variable.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional upstream API credential, forwarded as `Authorization`.
    pub upstream_token: Option<String>,
    /// Upstream API base URL; overridable for tests and proxies.
    pub upstream_base_url: String,
    /// Seed coordinate (`owner/name`) admitted when the store is empty.
    pub default_repo: String,
    /// Start-of-history used when an admission carries no explicit date.
    pub default_start_date: DateTime<Utc>,
    /// Reconciliation interval in hours, at least 1.
    pub monitor_interval_hours: u64,
    /// SQLite database location.
    pub database_path: String,
    /// Read-API bind address.
    pub bind_addr: SocketAddr,
    /// Reconciler worker-pool width.
    pub worker_pool_size: usize,
    /// Whether reconciliation continues from the stored checkpoint or
    /// rescans from page 1 every tick.
    pub resume_from_checkpoint: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream_token: None,
            upstream_base_url: UpstreamClient::DEFAULT_BASE_URL.to_string(),
            default_repo: "chromium/chromium".to_string(),
            default_start_date: default_start_date(),
            monitor_interval_hours: 1,
            database_path: "sqlite://gitpulse.db".to_string(),
            bind_addr: "0.0.0.0:8080".parse().expect("static addr parses"),
            worker_pool_size: 4,
            resume_from_checkpoint: true,
        }
    }
}

fn default_start_date() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2012-03-06T23:06:50Z")
        .expect("static date parses")
        .with_timezone(&Utc)
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from the environment, validating every value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.upstream_token = env_var("UPSTREAM_TOKEN");

        if let Some(val) = env_var("UPSTREAM_BASE_URL") {
            config.upstream_base_url = val;
        }

        if let Some(val) = env_var("DEFAULT_REPO") {
            config.default_repo = val;
        }

        if let Some(val) = env_var("DEFAULT_START_DATE") {
            config.default_start_date = DateTime::parse_from_rfc3339(&val)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ConfigError::invalid("DEFAULT_START_DATE", e.to_string()))?;
        }

        if let Some(val) = env_var("MONITOR_INTERVAL") {
            config.monitor_interval_hours = val
                .parse()
                .map_err(|_| ConfigError::invalid("MONITOR_INTERVAL", "not an integer"))?;
        }

        if let Some(val) = env_var("DATABASE_PATH") {
            config.database_path = val;
        }

        if let Some(val) = env_var("BIND_ADDR") {
            config.bind_addr = val
                .parse()
                .map_err(|_| ConfigError::invalid("BIND_ADDR", "not a socket address"))?;
        }

        if let Some(val) = env_var("WORKER_POOL_SIZE") {
            config.worker_pool_size = val
                .parse()
                .map_err(|_| ConfigError::invalid("WORKER_POOL_SIZE", "not an integer"))?;
        }

        if let Some(val) = env_var("RESUME_FROM_CHECKPOINT") {
            config.resume_from_checkpoint = matches!(val.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints; called by [`Config::from_env`] and
    /// again by `main` on any programmatically built configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor_interval_hours < 1 {
            return Err(ConfigError::invalid(
                "MONITOR_INTERVAL",
                "must be at least 1 hour",
            ));
        }

        if self.worker_pool_size < 1 {
            return Err(ConfigError::invalid(
                "WORKER_POOL_SIZE",
                "must be at least 1",
            ));
        }

        let slashes = self.default_repo.matches('/').count();
        let halves_ok = self
            .default_repo
            .split('/')
            .all(|part| !part.is_empty());
        if slashes != 1 || !halves_ok {
            return Err(ConfigError::invalid(
                "DEFAULT_REPO",
                format!("expected owner/name, got {:?}", self.default_repo),
            ));
        }

        Ok(())
    }

    /// The reconciliation interval as a duration.
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_hours * 3600)
    }
}
