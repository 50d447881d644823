//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::BackoffPolicy;
use crate::domain::QueueError;

/// Construction-time settings for a `Queue`.
///
/// Backend connection parameters are not here; they belong to the store's
/// own constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of concurrent workers spawned by `start`
    pub workers: usize,

    /// Retries after the first failed attempt (total attempts = max_retries + 1)
    pub max_retries: u32,

    /// Sleep after `pop` reports nothing to do
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Upper bound on the sleep after deferring a not-yet-due task
    #[serde(with = "duration_millis")]
    pub max_defer_sleep: Duration,

    /// Delay between handler attempts
    pub backoff: BackoffPolicy,

    /// Per-subscriber event buffer
    pub subscriber_capacity: usize,

    /// Terminal tasks kept in history (oldest evicted first)
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 3,
            poll_interval: Duration::from_millis(500),
            max_defer_sleep: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
            subscriber_capacity: 64,
            history_limit: 1000,
        }
    }
}

impl QueueConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_defer_sleep(mut self, max: Duration) -> Self {
        self.max_defer_sleep = max;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.workers == 0 {
            return Err(QueueError::InvalidConfig(
                "workers must be a positive integer".to_string(),
            ));
        }
        if self.subscriber_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "subscriber_capacity must be a positive integer".to_string(),
            ));
        }
        Ok(())
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
