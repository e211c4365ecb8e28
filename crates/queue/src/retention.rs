//! Retention sweep: age-based deletion of task rows

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument};

use crate::config::ConfigError;
use crate::persistence::{StoreError, TaskStore};

/// Deletes rows older than a fixed age, whatever their status
#[derive(Clone)]
pub struct RetentionSweep {
    store: Arc<dyn TaskStore>,
    max_age: Duration,
}

impl RetentionSweep {
    pub fn new(store: Arc<dyn TaskStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    /// Build from a TTL string such as `"30 days"`
    pub fn from_ttl(store: Arc<dyn TaskStore>, ttl: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(store, parse_ttl(ttl)?))
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Delete every row created before `now - max_age`
    ///
    /// A `max_age` reaching past the earliest representable time deletes nothing.
    #[instrument(skip(self), fields(max_age_secs = self.max_age.num_seconds()))]
    pub async fn sweep(&self) -> Result<u64, StoreError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.max_age) else {
            debug!("Retention cutoff out of range, nothing to sweep");
            return Ok(0);
        };
        let deleted = self.store.delete_older_than(cutoff).await?;

        if deleted > 0 {
            info!(deleted, %cutoff, "Swept expired tasks");
        } else {
            debug!(%cutoff, "No expired tasks");
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for RetentionSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweep")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// Parse a `"<amount> <unit>"` TTL
///
/// Units may be singular or plural: seconds, minutes, hours, days, weeks,
/// months (30 days) and years (365 days). Short forms `s`, `m`, `h`, `d`,
/// `w` are accepted too.
pub fn parse_ttl(ttl: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidTtl(ttl.to_string());

    let trimmed = ttl.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = trimmed.split_at(split);

    let amount: i64 = amount.parse().map_err(|_| invalid())?;
    let unit = unit.trim().to_ascii_lowercase();
    let unit = unit.strip_suffix('s').filter(|u| u.len() > 1).unwrap_or(unit.as_str());

    let seconds_per_unit = match unit {
        "s" | "sec" | "second" => 1,
        "m" | "min" | "minute" => 60,
        "h" | "hour" => 60 * 60,
        "d" | "day" => 24 * 60 * 60,
        "w" | "week" => 7 * 24 * 60 * 60,
        "month" => 30 * 24 * 60 * 60,
        "y" | "year" => 365 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    amount
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)
}
