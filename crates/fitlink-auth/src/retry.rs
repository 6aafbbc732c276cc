//! Capped exponential backoff for user-triggered retries

use std::time::Duration;

/// Delays double from `base` and never exceed `cap`: 1s, 2s, 4s, 8s, 10s, 10s...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Retries allowed after the first attempt
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap,
            max_retries,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|delay| delay.min(self.cap))
            .unwrap_or(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 5)
    }
}

/// Retry bookkeeping for a "not authenticated" screen with a manual retry button.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    retries: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn exhausted(&self) -> bool {
        self.retries >= self.policy.max_retries
    }

    /// Returns the delay to wait before the next attempt and counts it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.retries);
        self.retries = self.retries.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_large_retry_saturates_at_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_state() {
        let mut state = RetryState::new(RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            2,
        ));
        assert_eq!(state.next_delay(), Duration::from_secs(1));
        assert_eq!(state.next_delay(), Duration::from_secs(2));
        assert!(state.exhausted());

        state.reset();
        assert_eq!(state.retries(), 0);
        assert!(!state.exhausted());
    }
}
