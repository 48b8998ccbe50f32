//! Retry/backoff policy shared by every API client request

use std::time::Duration;

/// Default attempts for 5xx/network failures (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default base delay before the first retry
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default attempts when the API answers 429/420
pub const DEFAULT_RATE_LIMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts for transient failures, first try included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Attempts for rate-limited responses, first try included
    pub rate_limit_attempts: u32,
    /// Wait used when a rate-limited response carries no usable hint
    pub default_rate_limit_wait: Duration,
    /// Upper bound on a single rate-limit wait
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            rate_limit_attempts: DEFAULT_RATE_LIMIT_ATTEMPTS,
            default_rate_limit_wait: Duration::from_secs(60),
            max_rate_limit_wait: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * multiplier^(retry-1)`, capped
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Clamp a server-provided rate-limit hint
    pub fn rate_limit_wait(&self, hint: Option<Duration>) -> Duration {
        hint.unwrap_or(self.default_rate_limit_wait)
            .min(self.max_rate_limit_wait)
    }
}
