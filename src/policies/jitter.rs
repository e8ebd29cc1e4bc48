//! # Randomization of backoff delays.
//!
//! [`JitterPolicy`] spreads retries of many controllers that failed together
//! (e.g. every sensor on a bus that just lost power).
//!
//! | Policy         | Delay                                   |
//! |----------------|-----------------------------------------|
//! | `None`         | `base`                                  |
//! | `Full`         | uniform in `[0, base]`                  |
//! | `Equal`        | `base/2 + uniform[0, base/2]`           |
//! | `Decorrelated` | uniform in `[floor, min(base × 3, max)]`|
//!
//! Only `None` keeps the documented delay sequence exact; every other policy
//! may wait less than the un-jittered base.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a computed backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delays.
    #[default]
    None,
    /// Uniform in `[0, base]`.
    Full,
    /// Half fixed, half random.
    Equal,
    /// Uniform between the initial delay and three times the current base.
    Decorrelated,
}

impl JitterPolicy {
    /// Applies the jitter to `base`.
    ///
    /// `floor` and `max` only matter for [`JitterPolicy::Decorrelated`].
    pub fn apply(&self, base: Duration, floor: Duration, max: Duration) -> Duration {
        let base_ms = saturating_millis(base);
        match self {
            JitterPolicy::None => base,
            JitterPolicy::Full => Duration::from_millis(random_between(0, base_ms)),
            JitterPolicy::Equal => {
                let half = base_ms / 2;
                Duration::from_millis(half + random_between(0, half))
            }
            JitterPolicy::Decorrelated => {
                let floor_ms = saturating_millis(floor);
                let upper = base_ms
                    .saturating_mul(3)
                    .min(saturating_millis(max))
                    .max(floor_ms);
                Duration::from_millis(random_between(floor_ms, upper))
            }
        }
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn random_between(lo: u64, hi: u64) -> u64 {
    if lo >= hi {
        return lo;
    }
    rand::rng().random_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d, Duration::ZERO, MAX), d);
    }

    #[test]
    fn full_never_exceeds_base() {
        let d = Duration::from_millis(1000);
        for _ in 0..100 {
            assert!(JitterPolicy::Full.apply(d, Duration::ZERO, MAX) <= d);
        }
        assert_eq!(
            JitterPolicy::Full.apply(Duration::ZERO, Duration::ZERO, MAX),
            Duration::ZERO
        );
    }

    #[test]
    fn huge_delays_saturate_instead_of_wrapping() {
        let huge = Duration::MAX;
        for _ in 0..20 {
            let d = JitterPolicy::Equal.apply(huge, Duration::ZERO, huge);
            assert!(d >= Duration::from_millis(u64::MAX / 2));
        }
        let d = JitterPolicy::Decorrelated.apply(huge, Duration::from_secs(1), huge);
        assert!(d >= Duration::from_secs(1));
    }

    #[test]
    fn decorrelated_respects_floor_and_cap() {
        let floor = Duration::from_millis(100);
        for _ in 0..100 {
            let d = JitterPolicy::Decorrelated.apply(Duration::from_secs(20), floor, MAX);
            assert!(d >= floor);
            assert!(d <= MAX);
        }
    }
}
