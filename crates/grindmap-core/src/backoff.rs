//! Exponential retry backoff with jitter.
//!
//! `delay(n) = min(base * 2^n, max) + jitter`, where jitter is drawn
//! uniformly from `[0, jitter)`. Jitter spreads out retries of jobs that
//! failed together so they don't hit the target site in lockstep.

use std::time::Duration;

/// Retry delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter. `Duration::ZERO` disables it.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    /// 1s base, 30s cap, up to 1s of jitter.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic part of the delay: `min(base * 2^attempt_index, max)`.
    ///
    /// Saturates at `max_delay` instead of overflowing for large indices.
    pub fn capped_delay(&self, attempt_index: u32) -> Duration {
        2u32.checked_pow(attempt_index)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Full delay before retry number `attempt_index` (0-based), jitter included.
    pub fn delay(&self, attempt_index: u32) -> Duration {
        self.capped_delay(attempt_index) + self.random_jitter()
    }

    fn random_jitter(&self) -> Duration {
        let max_nanos = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(fastrand::u64(..max_nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_documented_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..12u32 {
            let floor = Duration::from_millis((1000u64 << attempt).min(30_000));
            for _ in 0..50 {
                let d = policy.delay(attempt);
                assert!(d >= floor, "attempt {attempt}: {d:?} < {floor:?}");
                assert!(
                    d < floor + Duration::from_millis(1000),
                    "attempt {attempt}: {d:?} too large"
                );
            }
        }
    }

    #[test]
    fn test_capped_delay_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.capped_delay(0), Duration::from_secs(1));
        assert_eq!(policy.capped_delay(1), Duration::from_secs(2));
        assert_eq!(policy.capped_delay(2), Duration::from_secs(4));
        assert_eq!(policy.capped_delay(4), Duration::from_secs(16));
        assert_eq!(policy.capped_delay(5), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_attempt_index_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.capped_delay(40), Duration::from_secs(30));
        assert_eq!(policy.capped_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_no_jitter_is_deterministic() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(3), Duration::from_millis(50));
    }
}
