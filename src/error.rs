//! Error types used by the ctrlvisor runtime, its primitives and controllers.
//!
//! - [`StepError`] errors returned by individual controller steps.
//! - [`TimedOut`] a bounded operation exceeded its budget without a fallback.
//! - [`RetryError`] a retried operation gave up (exhausted or rejected).
//! - [`SchedulerError`] failures of the scheduler bridge.
//! - [`RuntimeError`] lifecycle/supervisor failures surfaced to the owner.
//!
//! All types provide `as_label` (stable snake_case label for logs/metrics) where it
//! makes sense, and [`StepError::is_retryable`] decides what backoff retries.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by controller steps.
///
/// Returned from `initialize`, `run_loop`, `run_finally` (both variants).
/// `Transient` and `Timeout` are retryable, the others are not.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Transient failure (sensor not powered yet, connection refused...).
    #[error("transient failure: {reason}")]
    Transient {
        /// The underlying error message.
        reason: String,
    },

    /// Non-recoverable failure (should not be retried).
    #[error("fatal failure (no retry): {reason}")]
    Fatal {
        /// The underlying error message.
        reason: String,
    },

    /// Step exceeded its time budget.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// Step panicked; the panic was contained.
    #[error("step panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Step observed a stop request and bailed out.
    #[error("step cancelled")]
    Canceled,
}

impl StepError {
    /// Shorthand for [`StepError::Transient`].
    pub fn transient(reason: impl Into<String>) -> Self {
        StepError::Transient {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`StepError::Fatal`].
    pub fn fatal(reason: impl Into<String>) -> Self {
        StepError::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use ctrlvisor::StepError;
    /// use std::time::Duration;
    ///
    /// let err = StepError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "step_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StepError::Transient { .. } => "step_transient",
            StepError::Fatal { .. } => "step_fatal",
            StepError::Timeout { .. } => "step_timeout",
            StepError::Panicked { .. } => "step_panicked",
            StepError::Canceled => "step_canceled",
        }
    }

    /// Indicates whether the error is safe to retry.
    ///
    /// Returns `true` for [`StepError::Transient`] and [`StepError::Timeout`].
    ///
    /// # Example
    /// ```
    /// use ctrlvisor::StepError;
    ///
    /// assert!(StepError::transient("no ack").is_retryable());
    /// assert!(!StepError::fatal("bad wiring").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Transient { .. } | StepError::Timeout { .. })
    }
}

impl From<TimedOut> for StepError {
    fn from(e: TimedOut) -> Self {
        StepError::Timeout { timeout: e.after }
    }
}

/// A bounded operation did not finish within its budget and had no fallback.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation timed out after {after:?}")]
pub struct TimedOut {
    /// The configured budget.
    pub after: Duration,
}

/// # Failure of a retried operation.
///
/// Wraps the most recent error together with the attempt it came from.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts performed (equals `max_attempts`).
        attempts: u32,
        /// Error of the final attempt.
        last: E,
    },

    /// An attempt failed with an error outside the retryable set.
    #[error("attempt {attempt} failed with a non-retryable error: {error}")]
    Rejected {
        /// 1-based attempt that produced the error.
        attempt: u32,
        /// The error, unchanged.
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Rejected { attempt, .. } => *attempt,
        }
    }

    /// Returns the underlying error.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Rejected { error, .. } => error,
        }
    }

    /// Borrows the underlying error.
    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Rejected { error, .. } => error,
        }
    }
}

/// # Errors produced by the scheduler bridge.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// No scheduler is driving the calling context.
    #[error("no active scheduler in the calling context")]
    NoActiveScheduler,

    /// The scheduler handle was closed and must not be reused.
    #[error("scheduler handle is closed")]
    Closed,

    /// A blocking drive was requested from inside a running scheduler.
    #[error("cannot block on a scheduler from inside a running scheduler")]
    NestedBlocking,

    /// The scheduler could not be built.
    #[error("failed to build scheduler: {reason}")]
    Build {
        /// The underlying I/O error message.
        reason: String,
    },

    /// A background or offloaded task panicked or was aborted.
    #[error("task join failed: {reason}")]
    Join {
        /// Panic or cancellation details.
        reason: String,
    },

    /// A blocking drive exceeded its timeout.
    #[error("blocking drive timed out after {after:?}")]
    TimedOut {
        /// The configured timeout.
        after: Duration,
    },
}

impl SchedulerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedulerError::NoActiveScheduler => "scheduler_inactive",
            SchedulerError::Closed => "scheduler_closed",
            SchedulerError::NestedBlocking => "scheduler_nested_blocking",
            SchedulerError::Build { .. } => "scheduler_build",
            SchedulerError::Join { .. } => "scheduler_join",
            SchedulerError::TimedOut { .. } => "scheduler_timeout",
        }
    }
}

impl From<TimedOut> for SchedulerError {
    fn from(e: TimedOut) -> Self {
        SchedulerError::TimedOut { after: e.after }
    }
}

/// # Errors produced by controller lifecycles and the supervisor.
///
/// `InitializationFailed` is the one lifecycle failure handed to the owner;
/// iteration and cleanup failures are contained and never show up here.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Every initialization attempt failed; the controller ended in `Stopped`.
    #[error("controller {controller} failed to initialize after {attempts} attempts: {reason}")]
    InitializationFailed {
        /// Controller display name.
        controller: String,
        /// Attempts performed.
        attempts: u32,
        /// Last error.
        reason: StepError,
    },

    /// The controller implements neither variant of a required step.
    #[error("controller {controller} implements no variant of step `{step}`")]
    MissingCapability {
        /// Controller display name.
        controller: String,
        /// Step name (`initialize` or `run_loop`).
        step: &'static str,
    },

    /// The controller already reached `Stopped`, or was registered after its
    /// supervisor shut down; create a new instance instead.
    #[error("controller {controller} is stopped and cannot be restarted")]
    AlreadyStopped {
        /// Controller display name.
        controller: String,
    },

    /// Another caller is already driving this controller's loop.
    #[error("controller {controller} is already being driven")]
    AlreadyRunning {
        /// Controller display name.
        controller: String,
    },

    /// Scheduler bridge failure.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Shutdown grace period was exceeded; some controllers did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Controllers that did not reach `Stopped`.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use ctrlvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InitializationFailed { .. } => "runtime_init_failed",
            RuntimeError::MissingCapability { .. } => "runtime_missing_capability",
            RuntimeError::AlreadyStopped { .. } => "runtime_already_stopped",
            RuntimeError::AlreadyRunning { .. } => "runtime_already_running",
            RuntimeError::Scheduler(e) => e.as_label(),
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// Renders a panic payload caught by `catch_unwind` or a `JoinError`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_converts_to_retryable_step_error() {
        let err: StepError = TimedOut {
            after: Duration::from_millis(50),
        }
        .into();
        assert_eq!(
            err,
            StepError::Timeout {
                timeout: Duration::from_millis(50)
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn retry_error_keeps_attempt_count() {
        let err = RetryError::Exhausted {
            attempts: 4,
            last: StepError::transient("nope"),
        };
        assert_eq!(err.attempts(), 4);
        assert!(err.to_string().contains("4 attempts"));
        assert_eq!(err.into_inner(), StepError::transient("nope"));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("sensor gone"));
        let fixed: Box<dyn std::any::Any + Send> = Box::new("bad reading");
        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(owned.as_ref()), "sensor gone");
        assert_eq!(panic_message(fixed.as_ref()), "bad reading");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[test]
    fn scheduler_error_bubbles_through_runtime_error() {
        let err: RuntimeError = SchedulerError::NestedBlocking.into();
        assert_eq!(err.as_label(), "scheduler_nested_blocking");
    }
}
