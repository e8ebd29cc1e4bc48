//! Resilience primitives usable on their own or through the lifecycle.
//!
//! - [`retry`], [`retry_when`], [`retry_notify`]: bounded retry with exponential backoff.
//! - [`with_timeout`], [`with_timeout_token`]: cap an operation's wall-clock duration,
//!   optionally substituting a fallback value.
//!
//! Both suspend only on timers, so they never stall other tasks on the scheduler.

mod retry;
mod timeout;

pub use retry::{retry, retry_notify, retry_when};
pub use timeout::{OperationBudget, with_timeout, with_timeout_token};
