//! Retry policy for provider calls
//!
//! Which failures get retried is decided by `PluginError::is_retryable`; this
//! module only owns the attempt ceiling and the exponentially growing delay.

use std::time::Duration;

/// Default number of attempts (first try plus retries)
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay before the first retry, in milliseconds
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Attempt ceiling and backoff curve for retryable provider failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay before retrying after the given zero-based attempt: base * 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether another attempt is allowed after the given zero-based attempt
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_ceiling_respected() {
        let policy = RetryPolicy::new(3, 100);
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
        assert!(!policy.allows_retry(10));
    }

    #[test]
    fn test_backoff_monotonically_increasing() {
        let policy = RetryPolicy::new(5, 250);
        let delays: Vec<Duration> = (0..4).map(|a| policy.delay_for(a)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0], "backoff must grow: {:?}", delays);
        }
        assert_eq!(delays[0], Duration::from_millis(250));
        assert_eq!(delays[1], Duration::from_millis(500));
        assert_eq!(delays[2], Duration::from_millis(1000));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let policy = RetryPolicy::new(0, 100);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.allows_retry(0));
    }
}
