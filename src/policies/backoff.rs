//! # Backoff between retry attempts.
//!
//! [`BackoffPolicy`] turns a failed-attempt index into a delay:
//! - [`BackoffPolicy::first`] delay after the first failure (`initial_delay`);
//! - [`BackoffPolicy::factor`] growth after every further failure (`backoff_factor`);
//! - [`BackoffPolicy::max`] cap (`max_delay`).
//!
//! The delay after failed attempt `n` (0-indexed) is `min(first × factor^n, max)`,
//! then jitter is applied. The base never depends on a previous jittered value,
//! so randomization cannot make delays drift downwards.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use ctrlvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub first: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0`; `1.0` keeps the delay constant).
    pub factor: f64,
    /// Randomization applied on top of the computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 2.0`, `max = 60s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay of `wait` between attempts.
    pub fn constant(wait: Duration) -> Self {
        Self {
            first: wait,
            max: wait,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay to wait after the failed attempt `attempt` (0-indexed).
    ///
    /// Values that overflow, are not finite or exceed [`BackoffPolicy::max`]
    /// clamp to `max`. A `first` larger than `max` is clamped as well.
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = Duration::try_from_secs_f64(secs).map_or(self.max, |d| d.min(self.max));

        self.jitter.apply(base, self.first.min(self.max), self.max)
    }

    /// Sum of the delays taken before `attempts` attempts have all been made.
    ///
    /// `attempts` invocations sleep `attempts - 1` times. Only meaningful without jitter.
    pub fn total_delay(&self, attempts: u32) -> Duration {
        (0..attempts.saturating_sub(1)).map(|i| self.next(i)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_sequence_is_first_times_factor_pow_n() {
        let policy = exp(100, 30_000, 2.0);
        let seq: Vec<_> = (0..5).map(|i| policy.next(i).as_millis()).collect();
        assert_eq!(seq, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn test_factor_one_is_constant() {
        let policy = BackoffPolicy::constant(Duration::from_millis(500));
        for attempt in 0..10 {
            assert_eq!(policy.next(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn test_capped_at_max() {
        let policy = exp(100, 1_000, 3.0);
        assert_eq!(policy.next(1), Duration::from_millis(300));
        assert_eq!(policy.next(2), Duration::from_millis(900));
        assert_eq!(policy.next(3), Duration::from_secs(1));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_uncapped_policy_saturates_instead_of_panicking() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(1),
            max: Duration::MAX,
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(63), Duration::from_secs(1 << 63));
        assert_eq!(policy.next(64), Duration::MAX);
        assert_eq!(policy.next(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_first_above_max_is_clamped() {
        let policy = exp(10_000, 5_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_total_delay_skips_last_attempt() {
        let policy = exp(100, 250, 2.0);
        // sleeps after attempts 0, 1, 2: 100 + 200 + 250
        assert_eq!(policy.total_delay(4), Duration::from_millis(550));
        assert_eq!(policy.total_delay(1), Duration::ZERO);
        assert_eq!(policy.total_delay(0), Duration::ZERO);
    }

    #[test]
    fn test_equal_jitter_stays_within_half_and_base() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..exp(100, 30_000, 2.0)
        };
        for attempt in 0..12 {
            let base = (100.0 * 2.0f64.powi(attempt as i32)).min(30_000.0) as u64;
            let delay = policy.next(attempt);
            assert!(delay >= Duration::from_millis(base / 2), "attempt {attempt}: {delay:?}");
            assert!(delay <= Duration::from_millis(base), "attempt {attempt}: {delay:?}");
        }
    }
}
