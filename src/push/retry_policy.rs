//! Reconnect policy for the push channel.
//!
//! Implements capped exponential backoff with optional jitter and a hard
//! bound on consecutive attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::ConnectionSettings;

/// Reconnect policy implementing capped exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failed reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub multiplier: f64,
    /// Upper bound of the random extra delay added to each wait.
    pub jitter: Duration,
}

impl ReconnectPolicy {
    pub fn new(config: &ConnectionSettings) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            initial_delay: config.initial_backoff,
            max_delay: config.max_backoff,
            multiplier: config.backoff_multiplier,
            jitter: config.backoff_jitter,
        }
    }

    /// Base delay before reconnect attempt `attempt` (1-based), without jitter.
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Delay to wait before reconnect attempt `attempt`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter.is_zero() {
            return base;
        }
        let extra_ms = rand::rng().random_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(extra_ms)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&ConnectionSettings::default())
    }
}
