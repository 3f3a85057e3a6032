//! Exponential retry backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential backoff: `min(initial * 2^retry_count, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBackoff {
    initial: Duration,
    max: Duration,
}

impl RetryBackoff {
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    #[must_use]
    pub const fn initial(&self) -> Duration {
        self.initial
    }

    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Delay before a job that has been retried `retry_count` times may run again.
    #[must_use]
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exponent = u32::try_from(retry_count).unwrap_or(0);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// `delay_for` as a chrono duration, for timestamp arithmetic.
    #[must_use]
    pub fn chrono_delay_for(&self, retry_count: i32) -> chrono::Duration {
        chrono::Duration::from_std(self.delay_for(retry_count)).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_doubling_and_capped() {
        let backoff = RetryBackoff::new(Duration::from_millis(1000), Duration::from_millis(30_000));
        let delays: Vec<u128> = (0..=5)
            .map(|retry| backoff.delay_for(retry).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn test_is_monotonic_and_never_exceeds_cap() {
        let backoff = RetryBackoff::default();
        let mut previous = Duration::ZERO;
        for retry in 0..64 {
            let delay = backoff.delay_for(retry);
            assert!(delay >= previous);
            assert!(delay <= backoff.max());
            previous = delay;
        }
        assert_eq!(backoff.delay_for(40), backoff.max());
    }

    #[test]
    fn test_negative_count_uses_initial() {
        let backoff = RetryBackoff::default();
        assert_eq!(backoff.delay_for(-3), backoff.initial());
    }
}
