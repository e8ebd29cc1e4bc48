//! # Retry policy for fallible operations.
//!
//! [`RetryPolicy`] bundles the attempt budget with a [`BackoffPolicy`].
//! Which errors are worth retrying is decided by the error type through
//! [`Retryable`], or by a predicate passed to [`retry_when`](crate::ops::retry_when).
//!
//! ```text
//! RetryPolicy { max_attempts: 3, backoff: first=1s factor=2 max=60s }
//!   attempt 1 ─ Err(retryable) ─► sleep 1s
//!   attempt 2 ─ Err(retryable) ─► sleep 2s
//!   attempt 3 ─ Err(retryable) ─► RetryError::Exhausted { attempts: 3 }
//! ```

use std::io;
use std::time::Duration;

use crate::error::StepError;
use crate::policies::backoff::BackoffPolicy;

/// How many times to try, and how long to wait in between.
///
/// `Copy` on purpose: [`retry`](crate::ops::retry) takes its own copy when the
/// attempt sequence starts, so the policy cannot change mid-sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations allowed (always `>= 1`).
    max_attempts: u32,
    /// Delay schedule between attempts.
    backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    /// Three attempts with [`BackoffPolicy::default`].
    fn default() -> Self {
        Self::new(3, BackoffPolicy::default())
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` below 1 is raised to 1.
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// `tries` attempts with a constant `wait` between them.
    ///
    /// This is the shape used by `try_initialize(tries, wait)`.
    pub fn fixed(tries: u32, wait: Duration) -> Self {
        Self::new(tries, BackoffPolicy::constant(wait))
    }

    /// Single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, BackoffPolicy::constant(Duration::ZERO))
    }

    /// Total invocations allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay schedule.
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Returns a copy with a different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns a copy with a different backoff.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Classifies errors into the retryable set.
pub trait Retryable {
    /// `true` when another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for StepError {
    fn is_retryable(&self) -> bool {
        StepError::is_retryable(self)
    }
}

impl Retryable for io::Error {
    /// Timeouts, connection failures and interrupts are transient.
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, BackoffPolicy::default()).max_attempts(), 1);
        assert_eq!(RetryPolicy::once().with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn fixed_policy_has_constant_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff().next(0), Duration::from_secs(5));
        assert_eq!(policy.backoff().next(7), Duration::from_secs(5));
    }

    #[test]
    fn io_errors_are_classified() {
        assert!(io::Error::from(io::ErrorKind::ConnectionRefused).is_retryable());
        assert!(io::Error::from(io::ErrorKind::TimedOut).is_retryable());
        assert!(!io::Error::from(io::ErrorKind::PermissionDenied).is_retryable());
    }
}
