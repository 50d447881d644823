//! Backoff policy: decides the delay between handler attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::duration_millis;

/// Exponential backoff, capped.
///
/// `next_delay` never decreases as `attempts` grows: each step multiplies by
/// `multiplier` (clamped to >= 1.0) until `max_delay` is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    pub multiplier: f64,

    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    /// Same delay after every failure.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to sleep after the `attempts`-th failed attempt (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    ///
    /// With the defaults (100ms, x2, cap 2s): 100ms, 200ms, 400ms, 800ms, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = self.multiplier.max(1.0);
        let secs = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
        let cap = self.max_delay.max(self.base_delay);

        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(secs)
    }
}
