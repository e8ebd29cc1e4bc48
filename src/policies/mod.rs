//! Retry policies.
//!
//! This module groups the knobs that control **how often** an operation is
//! retried and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`RetryPolicy`]  attempt budget + backoff (used by [`retry`](crate::ops::retry))
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//! - [`Retryable`]    which errors belong to the retryable set
//!
//! ## Defaults
//! - `RetryPolicy::default()` → 3 attempts, first=1s, factor=2.0, max=60s.
//! - `JitterPolicy::None`, so delays follow the exact documented sequence.

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::{RetryPolicy, Retryable};
