//! Queue configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

pub const ENV_MAX_RETRIES: &str = "IDWALLET_QUEUE_MAX_RETRIES";
pub const ENV_BASE_DELAY_MS: &str = "IDWALLET_QUEUE_BASE_DELAY_MS";
pub const ENV_BACKUP_TTL_SECS: &str = "IDWALLET_QUEUE_BACKUP_TTL_SECS";
pub const ENV_BACKGROUND_DELAY_MS: &str = "IDWALLET_QUEUE_BACKGROUND_DELAY_MS";

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retry ceiling per item.
    pub max_retries: u32,
    /// Backoff base; the n-th retry waits `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Optional cap on a single backoff delay.
    pub max_delay: Option<Duration>,
    /// Expiry of each item's backup-cache mirror.
    pub backup_ttl: Duration,
    /// Delay before a `background` enqueue kicks off a pass.
    pub background_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: None,
            backup_ttl: Duration::from_secs(24 * 60 * 60),
            background_delay: Duration::from_millis(100),
        }
    }
}

impl QueueConfig {
    /// Defaults overlaid with `IDWALLET_QUEUE_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_var::<u32>(&lookup, ENV_MAX_RETRIES) {
            config.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, ENV_BASE_DELAY_MS) {
            config.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, ENV_BACKUP_TTL_SECS) {
            config.backup_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, ENV_BACKGROUND_DELAY_MS) {
            config.background_delay = Duration::from_millis(v);
        }

        config
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_backup_ttl(mut self, backup_ttl: Duration) -> Self {
        self.backup_ttl = backup_ttl;
        self
    }

    pub fn with_background_delay(mut self, background_delay: Duration) -> Self {
        self.background_delay = background_delay;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::exponential(self.max_retries, self.base_delay);
        match self.max_delay {
            Some(cap) => policy.with_max_delay(cap),
            None => policy,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable queue setting");
            None
        }
    }
}
