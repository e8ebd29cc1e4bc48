//! # Bounded operations.
//!
//! Caps the wall-clock duration of a single operation.
//!
//! ## Outcomes
//! ```text
//! op finishes before deadline            ─► Ok(op output), unchanged (errors included)
//! deadline hit, budget has a fallback    ─► warn!, Ok(fallback)
//! deadline hit, no fallback              ─► Err(TimedOut { after })
//! ```
//!
//! ## Cancellation
//! On timeout the operation future is dropped before `with_timeout` returns, so
//! nothing it owns outlives the call. [`with_timeout_token`] additionally hands
//! the operation a child [`CancellationToken`] that is cancelled when the call
//! returns, for work the operation spawned elsewhere (e.g. offloaded blocking code).
//! Cancellation is cooperative: an operation that never yields runs to completion
//! before the deadline can be observed.

use std::future::Future;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::TimedOut;

/// Time budget for one operation, with an optional value to use on timeout.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationBudget<T> {
    timeout: Duration,
    fallback: Option<T>,
}

impl<T> OperationBudget<T> {
    /// Budget without fallback: a timeout is reported as [`TimedOut`].
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            fallback: None,
        }
    }

    /// Returns a budget that yields `value` instead of failing on timeout.
    pub fn with_fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// The deadline relative to the start of the operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The fallback value, if any.
    pub fn fallback(&self) -> Option<&T> {
        self.fallback.as_ref()
    }

    fn expire(self) -> Result<T, TimedOut> {
        match self.fallback {
            Some(value) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "operation timed out; returning fallback"
                );
                Ok(value)
            }
            None => Err(TimedOut {
                after: self.timeout,
            }),
        }
    }
}

/// Runs `op` within `budget`.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use ctrlvisor::ops::{with_timeout, OperationBudget};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let slow = async {
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     21.5_f64
/// };
/// let budget = OperationBudget::new(Duration::from_millis(10)).with_fallback(f64::NAN);
/// let reading = with_timeout(slow, budget).await.unwrap();
/// assert!(reading.is_nan());
/// # }
/// ```
pub async fn with_timeout<F>(op: F, budget: OperationBudget<F::Output>) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    match time::timeout(budget.timeout, op).await {
        Ok(out) => Ok(out),
        Err(_elapsed) => budget.expire(),
    }
}

/// Runs the operation built by `op` within `budget`, passing it a child of `parent`.
///
/// The child token is cancelled whenever this function returns (deadline or not);
/// cancelling `parent` reaches the operation as well.
pub async fn with_timeout_token<F, Fut>(
    parent: &CancellationToken,
    budget: OperationBudget<Fut::Output>,
    op: F,
) -> Result<Fut::Output, TimedOut>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future,
{
    let child = parent.child_token();
    let _cancel_on_return = child.clone().drop_guard();
    with_timeout(op(child), budget).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn finish_after(ms: u64, value: u32) -> u32 {
        time::sleep(Duration::from_millis(ms)).await;
        value
    }

    #[tokio::test(start_paused = true)]
    async fn early_result_is_returned_unchanged() {
        let out = with_timeout(finish_after(10, 7), OperationBudget::new(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(out, 7);

        let budget = OperationBudget::new(Duration::from_secs(1)).with_fallback(Err("fallback"));
        let out = with_timeout(async { Err::<u32, _>("boom") }, budget).await.unwrap();
        assert_eq!(out, Err("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_is_replaced_by_fallback() {
        let budget = OperationBudget::new(Duration::from_millis(50)).with_fallback(0);
        let out = with_timeout(finish_after(500, 99), budget).await.unwrap();
        assert_eq!(out, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_fallback_is_reported() {
        let err = with_timeout(finish_after(500, 99), OperationBudget::new(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TimedOut {
                after: Duration::from_millis(50)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_operation_is_dropped_before_return() {
        struct Resource(Arc<AtomicBool>);
        impl Drop for Resource {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let res = Resource(released.clone());
        let op = async move {
            let _held = res;
            time::sleep(Duration::from_secs(10)).await;
        };
        let _ = with_timeout(op, OperationBudget::new(Duration::from_millis(5))).await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn token_variant_cancels_spawned_work() {
        let parent = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let res = with_timeout_token(&parent, OperationBudget::new(Duration::from_millis(20)), |token| async move {
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = tx.send(());
            });
            time::sleep(Duration::from_secs(10)).await;
        })
        .await;

        assert!(res.is_err());
        assert!(rx.await.is_ok());
        assert!(!parent.is_cancelled());
    }
}
