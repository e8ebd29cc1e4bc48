//! # Bounded retry with exponential backoff.
//!
//! Runs a zero-argument fallible operation up to [`RetryPolicy::max_attempts`] times.
//!
//! ## Flow
//! ```text
//! loop {
//!   ├─► attempt += 1
//!   ├─► op().await
//!   │     ├─ Ok(v)                      ─► return Ok(v)
//!   │     ├─ Err(e), not retryable      ─► return Rejected { attempt, e }
//!   │     ├─ Err(e), attempt == max     ─► error!, return Exhausted { attempts, e }
//!   │     └─ Err(e), retryable          ─► warn!(attempt, delay)
//!   │                                      notify(e, attempt, delay)
//!   │                                      sleep(backoff.next(attempt - 1))
//! }
//! ```
//!
//! ## Rules
//! - Non-retryable errors return immediately and never trigger a sleep.
//! - The delay is always honored in full; it is a timer await, so other tasks on
//!   the same scheduler keep running while this one is suspended.
//! - The policy is copied when the sequence starts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time;

use crate::error::RetryError;
use crate::policies::{RetryPolicy, Retryable};

/// Retries `op` while it fails with a [`Retryable`] error.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use ctrlvisor::{ops::retry, RetryPolicy, StepError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
/// let mut calls = 0;
/// let value = retry(&policy, || {
///     calls += 1;
///     let n = calls;
///     async move {
///         if n < 2 { Err(StepError::transient("not ready")) } else { Ok(n) }
///     }
/// })
/// .await
/// .unwrap();
/// assert_eq!(value, 2);
/// # }
/// ```
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    retry_notify(policy, op, |e: &E| e.is_retryable(), |_, _, _| {}).await
}

/// Like [`retry`], with the retryable set given as a predicate.
pub async fn retry_when<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    op: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    retry_notify(policy, op, is_retryable, |_, _, _| {}).await
}

/// Full form: `notify(error, attempt, delay)` runs before every backoff sleep.
///
/// `attempt` is 1-based. The lifecycle uses the hook to publish
/// `InitAttemptFailed`/`BackoffScheduled` events.
pub async fn retry_notify<T, E, F, Fut, P, N>(
    policy: &RetryPolicy,
    mut op: F,
    mut is_retryable: P,
    mut notify: N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    N: FnMut(&E, u32, Duration),
    E: Display,
{
    let policy = *policy;
    let max_attempts = policy.max_attempts();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if !is_retryable(&err) {
            tracing::debug!(attempt, error = %err, "non-retryable error; not retrying");
            return Err(RetryError::Rejected {
                attempt,
                error: err,
            });
        }
        if attempt >= max_attempts {
            tracing::error!(attempts = attempt, error = %err, "all attempts failed");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.backoff().next(attempt - 1);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed; retrying"
        );
        notify(&err, attempt, delay);
        time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::policies::BackoffPolicy;
    use crate::JitterPolicy;
    use std::cell::Cell;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            BackoffPolicy {
                first: Duration::from_millis(100),
                max: Duration::from_millis(350),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
        )
    }

    /// Operation failing `fail_times` times with a transient error, then succeeding.
    fn flaky<'a>(
        calls: &'a Cell<u32>,
        fail_times: u32,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, StepError>> + 'a {
        move || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            std::future::ready(if n <= fail_times {
                Err(StepError::transient(format!("fail #{n}")))
            } else {
                Ok(n)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_failures_with_k_plus_one_calls() {
        for k in 0..4 {
            let calls = Cell::new(0);
            let res = retry(&policy(5), flaky(&calls, k)).await;
            assert_eq!(res.unwrap(), k + 1);
            assert_eq!(calls.get(), k + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_max_attempts() {
        for k in [3, 4, 10] {
            let calls = Cell::new(0);
            let err = retry(&policy(3), flaky(&calls, k)).await.unwrap_err();
            assert_eq!(calls.get(), 3);
            assert_eq!(err.attempts(), 3);
            assert!(matches!(
                err,
                RetryError::Exhausted { last: StepError::Transient { ref reason }, .. } if reason == "fail #3"
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_is_a_plain_call() {
        let calls = Cell::new(0);
        let started = Instant::now();
        let err = retry(&RetryPolicy::once(), flaky(&calls, 1))
            .await
            .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert_eq!(err.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_propagates_immediately() {
        let calls = Cell::new(0);
        let started = Instant::now();
        let err = retry(&policy(5), || {
            calls.set(calls.get() + 1);
            std::future::ready(Err::<(), _>(StepError::fatal("wrong wiring")))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert!(matches!(err, RetryError::Rejected { attempt: 1, .. }));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_follow_capped_sequence_and_are_honored() {
        let calls = Cell::new(0);
        let mut seen = Vec::new();
        let started = Instant::now();
        let _ = retry_notify(
            &policy(5),
            flaky(&calls, 10),
            |e: &StepError| e.is_retryable(),
            |_, attempt, delay| seen.push((attempt, delay.as_millis())),
        )
        .await;

        assert_eq!(seen, vec![(1, 100), (2, 200), (3, 350), (4, 350)]);
        assert!(started.elapsed() >= policy(5).backoff().total_delay(5));
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_defines_retryable_set() {
        let calls = Cell::new(0);
        let err = retry_when(
            &policy(4),
            || {
                calls.set(calls.get() + 1);
                std::future::ready(Err::<(), _>(calls.get()))
            },
            |n: &u32| *n < 2,
        )
        .await
        .unwrap_err();
        assert_eq!(calls.get(), 2);
        assert_eq!(err.into_inner(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleep_does_not_block_sibling_tasks() {
        let sibling = tokio::spawn(async {
            time::sleep(Duration::from_millis(10)).await;
            Instant::now()
        });
        let calls = Cell::new(0);
        let started = Instant::now();
        let _ = retry(&policy(2), flaky(&calls, 5)).await;
        let sibling_done = sibling.await.unwrap();
        assert!(sibling_done - started < Duration::from_millis(100));
    }
}
