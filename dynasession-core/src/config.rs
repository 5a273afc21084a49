//! Session store configuration.

use crate::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of the environment variables read by [`SessionConfig::from_env`].
pub const ENV_PREFIX: &str = "DYNAMO_DB_SESSION_";

/// Largest number of keys DynamoDB accepts in one `BatchWriteItem` call.
pub const MAX_BATCH_SIZE: usize = 25;

/// Immutable settings shared by every session store component.
///
/// Construct once (from defaults, a TOML document or the environment) and
/// hand it to the store as an `Arc<SessionConfig>`.
///
/// # Example
///
/// ```
/// use dynasession_core::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_table_name("web_sessions")
///     .with_locking(true)
///     .with_lock_expiry_time(Duration::from_secs(2));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.lock_expiry_time(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the backing table.
    pub table_name: String,

    /// Name of the partition key attribute.
    pub table_key: String,

    /// Use strongly consistent reads.
    pub consistent_read: bool,

    /// Select the pessimistic lock strategy instead of last-write-wins.
    pub enable_locking: bool,

    /// Time after which a held lock may be stolen, in milliseconds.
    pub lock_expiry_time_ms: u64,

    /// Pause between lock acquisition attempts, in milliseconds.
    pub lock_retry_delay_ms: u64,

    /// Upper bound on time spent waiting for a lock, in milliseconds.
    pub lock_max_wait_time_ms: u64,

    /// Sessions not updated for this long are garbage collected.
    pub max_age_secs: Option<u64>,

    /// Sessions created longer ago than this are garbage collected.
    pub max_stale_secs: Option<u64>,

    /// Keys deleted per garbage collection batch.
    pub gc_batch_size: usize,

    /// Re-raise store errors instead of falling back to an empty session.
    pub raise_errors: bool,

    /// AWS region override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom endpoint, e.g. DynamoDB Local.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            table_name: "sessions".to_string(),
            table_key: "session_id".to_string(),
            consistent_read: true,
            enable_locking: false,
            lock_expiry_time_ms: 500,
            lock_retry_delay_ms: 500,
            lock_max_wait_time_ms: 1000,
            max_age_secs: None,
            max_stale_secs: None,
            gc_batch_size: MAX_BATCH_SIZE,
            raise_errors: false,
            region: None,
            endpoint_url: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| SessionError::Config(format!("invalid TOML: {e}")))
    }

    /// Overlay `DYNAMO_DB_SESSION_*` environment variables on the defaults.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Overlay values produced by `lookup` onto `self`.
    ///
    /// `lookup` receives the full variable name, e.g. `DYNAMO_DB_SESSION_TABLE_NAME`.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("TABLE_NAME") {
            self.table_name = v;
        }
        if let Some(v) = get("TABLE_KEY") {
            self.table_key = v;
        }
        if let Some(v) = get("CONSISTENT_READ") {
            self.consistent_read = parse_env("CONSISTENT_READ", &v)?;
        }
        if let Some(v) = get("ENABLE_LOCKING") {
            self.enable_locking = parse_env("ENABLE_LOCKING", &v)?;
        }
        if let Some(v) = get("LOCK_EXPIRY_TIME_MS") {
            self.lock_expiry_time_ms = parse_env("LOCK_EXPIRY_TIME_MS", &v)?;
        }
        if let Some(v) = get("LOCK_RETRY_DELAY_MS") {
            self.lock_retry_delay_ms = parse_env("LOCK_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("LOCK_MAX_WAIT_TIME_MS") {
            self.lock_max_wait_time_ms = parse_env("LOCK_MAX_WAIT_TIME_MS", &v)?;
        }
        if let Some(v) = get("MAX_AGE_SECS") {
            self.max_age_secs = Some(parse_env("MAX_AGE_SECS", &v)?);
        }
        if let Some(v) = get("MAX_STALE_SECS") {
            self.max_stale_secs = Some(parse_env("MAX_STALE_SECS", &v)?);
        }
        if let Some(v) = get("GC_BATCH_SIZE") {
            self.gc_batch_size = parse_env("GC_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("RAISE_ERRORS") {
            self.raise_errors = parse_env("RAISE_ERRORS", &v)?;
        }
        if let Some(v) = get("REGION") {
            self.region = Some(v);
        }
        if let Some(v) = get("ENDPOINT_URL") {
            self.endpoint_url = Some(v);
        }

        Ok(self)
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(SessionError::Config("table_name must not be empty".into()));
        }
        if self.table_key.trim().is_empty() {
            return Err(SessionError::Config("table_key must not be empty".into()));
        }
        if self.enable_locking && self.lock_retry_delay_ms == 0 {
            return Err(SessionError::Config("lock_retry_delay_ms must be positive".into()));
        }
        if self.gc_batch_size == 0 {
            return Err(SessionError::Config("gc_batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn lock_expiry_time(&self) -> Duration {
        Duration::from_millis(self.lock_expiry_time_ms)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn lock_max_wait_time(&self) -> Duration {
        Duration::from_millis(self.lock_max_wait_time_ms)
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    pub fn max_stale(&self) -> Option<Duration> {
        self.max_stale_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    #[must_use]
    pub fn with_table_key(mut self, table_key: impl Into<String>) -> Self {
        self.table_key = table_key.into();
        self
    }

    #[must_use]
    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = consistent_read;
        self
    }

    #[must_use]
    pub fn with_locking(mut self, enable_locking: bool) -> Self {
        self.enable_locking = enable_locking;
        self
    }

    #[must_use]
    pub fn with_lock_expiry_time(mut self, expiry: Duration) -> Self {
        self.lock_expiry_time_ms = duration_ms(expiry);
        self
    }

    #[must_use]
    pub fn with_lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn with_lock_max_wait_time(mut self, max_wait: Duration) -> Self {
        self.lock_max_wait_time_ms = duration_ms(max_wait);
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_secs = Some(max_age.as_secs());
        self
    }

    #[must_use]
    pub fn with_max_stale(mut self, max_stale: Duration) -> Self {
        self.max_stale_secs = Some(max_stale.as_secs());
        self
    }

    #[must_use]
    pub fn with_gc_batch_size(mut self, batch_size: usize) -> Self {
        self.gc_batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_raise_errors(mut self, raise_errors: bool) -> Self {
        self.raise_errors = raise_errors;
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SessionError::Config(format!("{ENV_PREFIX}{name}={value:?}: {e}")))
}
