//! Queue configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retention::parse_ttl;

/// Default task retention
pub const DEFAULT_TASKS_TTL: &str = "30 days";

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `connect` needs a database URL
    #[error("database URL is not configured (set PGQUEUE_DATABASE_URL or DATABASE_URL)")]
    MissingDatabaseUrl,

    /// TTL string could not be parsed
    #[error("invalid tasks TTL {0:?}: expected \"<amount> <unit>\", e.g. \"30 days\"")]
    InvalidTtl(String),

    /// An environment variable held an unusable value
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}

/// Queue client configuration
///
/// # Example
///
/// ```
/// use pgqueue::QueueConfig;
/// use std::time::Duration;
///
/// let config = QueueConfig::new("postgres://localhost/app")
///     .with_pool_max(10)
///     .with_tasks_ttl(Some("7 days"))
///     .with_poll_interval(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// PostgreSQL connection string (required by `QueueClient::connect`)
    pub database_url: Option<String>,

    /// Maximum pooled connections
    pub pool_max: u32,

    /// Rows older than this are deleted; `None` keeps everything
    pub tasks_ttl: Option<String>,

    /// Scheduler timer wake interval
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// How often a blocking dispatch re-checks its rows
    #[serde(with = "duration_millis")]
    pub wait_poll_interval: Duration,

    /// Upper bound for a blocking dispatch; `None` waits forever
    #[serde(default, with = "option_duration_millis")]
    pub wait_timeout: Option<Duration>,

    /// How long `shutdown` waits for an in-flight drain
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_max: 5,
            tasks_ttl: Some(DEFAULT_TASKS_TTL.to_string()),
            poll_interval: Duration::from_secs(15),
            wait_poll_interval: Duration::from_secs(5),
            wait_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Create a configuration for a database
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: Some(database_url.into()),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `PGQUEUE_DATABASE_URL` (falls back to `DATABASE_URL`)
    /// - `PGQUEUE_POOL_MAX`
    /// - `PGQUEUE_TASKS_TTL`: e.g. "30 days", or "off" to keep everything
    /// - `PGQUEUE_POLL_INTERVAL_MS`
    /// - `PGQUEUE_WAIT_POLL_INTERVAL_MS`
    /// - `PGQUEUE_WAIT_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup("PGQUEUE_DATABASE_URL").or_else(|| lookup("DATABASE_URL"));

        let tasks_ttl = match lookup("PGQUEUE_TASKS_TTL") {
            Some(ttl) if ttl.trim().eq_ignore_ascii_case("off") => None,
            Some(ttl) => Some(ttl),
            None => defaults.tasks_ttl,
        };

        let config = Self {
            database_url,
            pool_max: parse_var(&lookup, "PGQUEUE_POOL_MAX")?.unwrap_or(defaults.pool_max),
            tasks_ttl,
            poll_interval: parse_var(&lookup, "PGQUEUE_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            wait_poll_interval: parse_var(&lookup, "PGQUEUE_WAIT_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_poll_interval),
            wait_timeout: parse_var(&lookup, "PGQUEUE_WAIT_TIMEOUT_MS")?.map(Duration::from_millis),
            shutdown_timeout: defaults.shutdown_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that can be checked without a database
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ttl) = &self.tasks_ttl {
            parse_ttl(ttl)?;
        }
        if self.pool_max == 0 {
            return Err(ConfigError::InvalidValue {
                var: "pool_max".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// The database URL, required for Postgres backends
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    /// Set the database URL
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Set maximum pooled connections
    pub fn with_pool_max(mut self, max: u32) -> Self {
        self.pool_max = max.max(1);
        self
    }

    /// Set task retention (`None` disables the sweep)
    pub fn with_tasks_ttl(mut self, ttl: Option<&str>) -> Self {
        self.tasks_ttl = ttl.map(str::to_string);
        self
    }

    /// Set the scheduler timer interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the blocking dispatch re-check interval
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Set the blocking dispatch timeout
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
