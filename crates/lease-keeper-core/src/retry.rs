//! # Renewal Retry Policy
//!
//! Decides whether a failed visibility-change call is retried and how long to
//! wait first. Throttling gets a longer base delay than other failures; both
//! grow exponentially with optional jitter.

use crate::config::ExtensionSettings;
use lease_keeper_runtime::QueueError;
use rand::Rng;
use std::time::Duration;

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Retry policy for renewal calls
///
/// # Examples
///
/// ```rust
/// use lease_keeper_core::retry::RenewalRetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 2 attempts in total, 500ms after throttling, 200ms otherwise
/// let policy = RenewalRetryPolicy::default();
/// assert!(policy.should_retry(1));
/// assert!(!policy.should_retry(2));
/// ```
#[derive(Debug, Clone)]
pub struct RenewalRetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,

    /// Base delay after a throttling error
    pub throttle_delay: Duration,

    /// Base delay after any other retryable error
    pub retry_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay
    pub jitter_percent: f64,
}

impl Default for RenewalRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            throttle_delay: Duration::from_millis(500),
            retry_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
            jitter_percent: 0.25,
        }
    }
}

impl RenewalRetryPolicy {
    /// Policy from the extension settings
    pub fn from_settings(settings: &ExtensionSettings) -> Self {
        let policy = Self {
            max_attempts: settings.max_attempts.max(1),
            throttle_delay: Duration::from_millis(settings.throttle_backoff_ms),
            retry_delay: Duration::from_millis(settings.retry_backoff_ms),
            ..Self::default()
        };

        if settings.retry_jitter_percent > 0.0 {
            policy.with_jitter(settings.retry_jitter_percent)
        } else {
            policy
        }
    }

    /// Enable jitter with the given range (0.0 to 1.0)
    pub fn with_jitter(mut self, percent: f64) -> Self {
        self.use_jitter = true;
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Check if another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the retry following failed attempt `attempts_made`
    ///
    /// `attempts_made` counts from 1; the first retry waits the base delay.
    pub fn delay_for(&self, error: &QueueError, attempts_made: u32) -> Duration {
        let base = if error.is_throttling() {
            self.throttle_delay
        } else {
            self.retry_delay
        };

        let exponent = attempts_made.saturating_sub(1) as i32;
        let delay_secs = (base.as_secs_f64() * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        let delay_secs = if self.use_jitter {
            Self::add_jitter(delay_secs, self.jitter_percent)
        } else {
            delay_secs
        };

        Duration::from_secs_f64(delay_secs)
    }

    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }
}
