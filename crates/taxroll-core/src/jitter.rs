//! Randomised pauses between requests to the portal.
//!
//! The session warmer sleeps for a uniformly random duration after every
//! successful warm-up so that the detail request does not follow the
//! landing-page request with machine-like regularity.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use taxroll_core::jitter::JitterConfig;
//!
//! let config = JitterConfig::from_millis(10, 250);
//! let delay = config.sample();
//! assert!(delay >= Duration::from_millis(10));
//! assert!(delay < Duration::from_millis(250));
//! ```

use std::time::Duration;

use rand::Rng;

/// Uniform delay range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterConfig {
    pub min: Duration,
    pub max: Duration,
}

impl JitterConfig {
    /// Create a range; `min` and `max` are swapped if given in reverse.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw one delay from the range.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        if max_ms <= min_ms {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min_ms..max_ms))
    }

    /// Sleep for one sampled delay.
    pub async fn pause(&self) {
        let delay = self.sample();
        if delay.is_zero() {
            return;
        }
        tracing::debug!(sleep_ms = %delay.as_millis(), "Jitter pause");
        tokio::time::sleep(delay).await;
    }
}

impl Default for JitterConfig {
    /// 10–250ms, the pause the portal tolerates without rate limiting.
    fn default() -> Self {
        Self::from_millis(10, 250)
    }
}
