//! Backoff policy: decides when a failed task may be redispatched.

use rand::Rng;
use std::time::Duration;

use crate::config::RedispatcherConfig;

/// Exponential backoff with jitter, keyed on the task's attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,

    /// Fraction of the delay that may be randomised away, in `[0, 1]`.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &RedispatcherConfig) -> Self {
        Self {
            base_delay: config.backoff_base(),
            multiplier: config.backoff_multiplier,
            max_delay: config.backoff_max(),
            jitter: config.backoff_jitter,
        }
    }

    /// Un-jittered delay: `base_delay * multiplier^(attempt - 1)`, capped at
    /// `max_delay`. Attempt 0 (never failed) is ready immediately.
    ///
    /// Example with base=100ms, multiplier=2.0:
    /// - attempt 1: 100ms
    /// - attempt 2: 200ms
    /// - attempt 3: 400ms
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        // powi overflows to +inf for large attempts; min() clamps that too
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay in `[delay * (1 - jitter), delay]`.
    pub fn next_delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        if delay.is_zero() || self.jitter <= 0.0 {
            return delay;
        }
        let factor = rng.gen_range((1.0 - self.jitter)..=1.0);
        delay.mul_f64(factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RedispatcherConfig::default())
    }
}
