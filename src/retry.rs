//! Transient transport-failure retry policy with exponential backoff.
//!
//! Only applies to requests for which no HTTP response was received at all.
//! Any response carrying a status code is terminal as far as this policy is
//! concerned, as are timeouts and caller-initiated cancellations.

use crate::error::TransportFailure;
use std::time::Duration;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial try
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable jitter on computed delays.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

/// Decides whether and how long to wait before re-issuing a failed request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy with the given configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a policy with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Computed as `base_delay * multiplier^(attempt - 1)`, capped at
    /// `max_delay`, with optional jitter of up to 25%.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = self.config.base_delay.as_millis() as f64
            * self.config.multiplier.powi(exponent as i32);
        let capped = base.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            capped * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Whether the failed request should be re-issued.
    ///
    /// `attempt` is the number of retries already performed. Only pure
    /// connection failures are eligible; a timeout means the server had the
    /// request long enough that blind replay is unsafe.
    #[must_use]
    pub fn should_retry(&self, failure: &TransportFailure, attempt: u32) -> bool {
        attempt < self.config.max_retries && failure.is_retryable()
    }

    /// Maximum number of retries.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}
