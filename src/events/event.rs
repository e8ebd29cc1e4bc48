//! # Lifecycle events emitted by controllers and the supervisor.
//!
//! [`EventKind`] falls into four groups:
//! - **Initialization**: starting, failed attempts, backoff, final failure
//! - **Running**: activation, iteration failures, step timeouts
//! - **Stopping**: stop requests, cleanup failures, deactivation
//! - **Runtime**: shutdown signals, grace outcome, subscriber trouble
//!
//! Every [`Event`] carries a process-wide monotonic `seq`, so consumers can
//! restore the publication order after fan-out.
//!
//! ## Example
//! ```rust
//! use ctrlvisor::{Event, EventKind, StepError};
//!
//! let ev = Event::new(EventKind::IterationFailed)
//!     .with_controller("boiler-pid")
//!     .with_iteration(12)
//!     .with_error(&StepError::transient("sensor busy"));
//!
//! assert_eq!(ev.kind, EventKind::IterationFailed);
//! assert_eq!(ev.controller.as_deref(), Some("boiler-pid"));
//! assert_eq!(ev.error_kind, Some("step_transient"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::controllers::ControllerId;
use crate::error::StepError;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Initialization ===
    /// `start()` moved the controller to `Initializing`.
    ControllerStarting,

    /// One initialization attempt failed.
    ///
    /// Sets: `attempt`, `reason`, `error_kind`.
    InitAttemptFailed,

    /// The next initialization attempt is scheduled.
    ///
    /// Sets: `attempt` (the failed one), `delay_ms`.
    BackoffScheduled,

    /// Initialization gave up; the controller went straight to `Stopped`.
    ///
    /// Sets: `attempt` (total attempts), `reason`, `error_kind`.
    InitializationFailed,

    // === Running ===
    /// Initialization succeeded; the controller is `Running`.
    ///
    /// Sets: `elapsed_ms` (time spent in initialization, retries and waits included).
    ControllerRunning,

    /// A loop iteration failed; the loop continues.
    ///
    /// Sets: `iteration`, `reason`, `error_kind`.
    IterationFailed,

    /// A step exceeded its budget (always followed by the step's failure event).
    ///
    /// Sets: `step`, `timeout_ms`.
    StepTimedOut,

    // === Stopping ===
    /// First external stop of a lifecycle (`Lifecycle::stop` or supervisor shutdown).
    StopRequested,

    /// The cleanup step failed; the controller still reaches `Stopped`.
    ///
    /// Sets: `reason`, `error_kind`.
    CleanupFailed,

    /// The controller reached `Stopped` after cleanup.
    ///
    /// Sets: `iteration` (total iterations), `elapsed_ms` (since the stop request, if any).
    ControllerStopped,

    // === Runtime ===
    /// OS signal or explicit shutdown observed by the supervisor.
    ShutdownRequested,

    /// All controllers stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some controllers did not stop in time.
    GraceExceeded,

    /// A subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `controller` (subscriber name), `reason`.
    SubscriberOverflow,

    /// A subscriber panicked while handling an event.
    ///
    /// Sets: `controller` (subscriber name), `reason`.
    SubscriberPanicked,
}

impl EventKind {
    /// Short stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ControllerStarting => "controller_starting",
            EventKind::InitAttemptFailed => "init_attempt_failed",
            EventKind::BackoffScheduled => "backoff_scheduled",
            EventKind::InitializationFailed => "initialization_failed",
            EventKind::ControllerRunning => "controller_running",
            EventKind::IterationFailed => "iteration_failed",
            EventKind::StepTimedOut => "step_timed_out",
            EventKind::StopRequested => "stop_requested",
            EventKind::CleanupFailed => "cleanup_failed",
            EventKind::ControllerStopped => "controller_stopped",
            EventKind::ShutdownRequested => "shutdown_requested",
            EventKind::AllStoppedWithin => "all_stopped_within",
            EventKind::GraceExceeded => "grace_exceeded",
            EventKind::SubscriberOverflow => "subscriber_overflow",
            EventKind::SubscriberPanicked => "subscriber_panicked",
        }
    }
}

/// Runtime event with optional metadata.
///
/// Which optional fields are set depends on the [`EventKind`].
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Controller (or subscriber) name.
    pub controller: Option<Arc<str>>,
    /// Controller identity.
    pub controller_id: Option<ControllerId>,
    /// Step the event refers to (`initialize`, `run_loop`, `run_finally`).
    pub step: Option<&'static str>,
    /// Attempt number (1-based).
    pub attempt: Option<u32>,
    /// Loop iteration number (1-based).
    pub iteration: Option<u64>,
    /// Backoff delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Step budget in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Elapsed time in milliseconds (activation/deactivation).
    pub elapsed_ms: Option<u64>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Stable error label, see [`StepError::as_label`].
    pub error_kind: Option<&'static str>,
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            controller: None,
            controller_id: None,
            step: None,
            attempt: None,
            iteration: None,
            delay_ms: None,
            timeout_ms: None,
            elapsed_ms: None,
            reason: None,
            error_kind: None,
        }
    }

    /// Attaches a controller name.
    #[inline]
    pub fn with_controller(mut self, name: impl Into<Arc<str>>) -> Self {
        self.controller = Some(name.into());
        self
    }

    /// Attaches a controller identity.
    #[inline]
    pub fn with_id(mut self, id: ControllerId) -> Self {
        self.controller_id = Some(id);
        self
    }

    /// Attaches the step name.
    #[inline]
    pub fn with_step(mut self, step: &'static str) -> Self {
        self.step = Some(step);
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches an iteration number.
    #[inline]
    pub fn with_iteration(mut self, n: u64) -> Self {
        self.iteration = Some(n);
        self
    }

    /// Attaches a backoff delay.
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(millis(d));
        self
    }

    /// Attaches a step budget.
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(millis(d));
        self
    }

    /// Attaches an elapsed duration.
    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(millis(d));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a step error (message and label).
    #[inline]
    pub fn with_error(mut self, err: &StepError) -> Self {
        self.reason = Some(err.to_string().into());
        self.error_kind = Some(err.as_label());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_controller(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_controller(subscriber)
            .with_reason(info)
    }
}
