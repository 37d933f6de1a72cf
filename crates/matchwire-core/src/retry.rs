//! Bounded retry policy.
//!
//! Backoff is linear in the attempt number: the n-th automatic retry waits
//! `base_delay * n`. With the defaults that is 2 s, 4 s, 6 s, then nothing.

use std::time::Duration;

/// Default number of automatic retries before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for the first retry.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Retry bookkeeping for connection attempts.
///
/// `attempts` counts automatic retries scheduled since the last successful
/// connection (or the last manual reset). It never exceeds `max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY)
    }
}

impl RetryPolicy {
    /// Create a policy with zero attempts used.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { attempts: 0, max_attempts, base_delay }
    }

    /// Automatic retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retry bound.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once no further automatic retry will be scheduled.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay before the next automatic retry, or `None` if the
    /// bound is reached. The delay is computed from the count BEFORE it is
    /// incremented.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let delay = self.base_delay.saturating_mul(self.attempts + 1);
        self.attempts += 1;
        Some(delay)
    }

    /// Forget all failures (successful connect or manual reconnect).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
