//! Exponential backoff for batch retries.

use rand::Rng;
use std::time::Duration;

/// Backoff policy applied to unprocessed batch requests.
///
/// The delay before retry `n` (zero-based) is
/// `min(base_delay * growth_factor^n, max_delay)`, shifted by up to
/// `jitter * delay` in either direction.
///
/// ```rust
/// use dynamodb_mapper::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     jitter: 0.0,
///     ..Default::default()
/// };
/// assert_eq!(policy.delay(1), Duration::from_millis(200));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Submissions per chunk, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of the delay before jitter.
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub growth_factor: f64,
    /// Fraction of the delay used as random spread, between 0 and 1.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            growth_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry`, starting at zero.
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay = (self.base_delay.as_secs_f64() * self.growth_factor.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let jitter = self.jitter.clamp(0.0, 1.0);
        let offset = if jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0) * jitter * delay
        } else {
            0.0
        };
        Duration::try_from_secs_f64((delay + offset).max(0.0)).unwrap_or(self.max_delay)
    }
}
