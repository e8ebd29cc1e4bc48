//! # Lifecycle: drives one controller from initialization to cleanup.
//!
//! ```text
//! run()
//!   ├─► start()                      (idempotent, serialized)
//!   │     ├─► ControllerStarting
//!   │     ├─► retry(initialize, init_tries, init_wait)
//!   │     │     ├─► InitAttemptFailed per failed attempt
//!   │     │     └─► BackoffScheduled before each retry
//!   │     ├─► ok:  iteration_count = 0, running = true, Running, ControllerRunning
//!   │     └─► err: Stopped, InitializationFailed → RuntimeError::InitializationFailed
//!   ├─► while running {
//!   │     ├─► run_loop step (bounded by step_timeout)
//!   │     ├─► iteration_count += 1
//!   │     ├─► error → log, IterationFailed, continue (optional failure cap)
//!   │     └─► sleep(sample_interval) or stop request
//!   │   }
//!   └─► Stopping → run_finally (exactly once) → Stopped, ControllerStopped
//! ```
//!
//! ## Rules
//! - No two steps of one controller ever run at the same time.
//! - A failing iteration never ends the loop by itself; the running flag does.
//! - `stop()` never aborts a step in flight: it clears the flag and cancels the
//!   context token, which wakes the sample-interval pause.
//! - Health checks only read shared state, so they never wait on the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, broadcast};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::config::LifecycleParams;
use super::state::{LifecycleState, Shared};
use super::step::{Step, run_step};
use crate::bridge::{SchedulerBridge, offload_blocking};
use crate::controllers::{
    ControllerId, ControllerRef, DispatchTable, HealthReport, StepContext, Variant,
};
use crate::error::{RetryError, RuntimeError, StepError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::metrics::MetricsSink;
use crate::ops::retry_notify;

/// Budget for a cooperative health check driven from a blocking caller.
const BLOCKING_HEALTH_BUDGET: Duration = Duration::from_secs(5);

/// Bus capacity for lifecycles created outside a supervisor.
const STANDALONE_BUS_CAPACITY: usize = 256;

/// Runs one controller. Share it behind an `Arc` to stop or query it while `run()` is pending.
pub struct Lifecycle {
    controller: ControllerRef,
    dispatch: DispatchTable,
    params: LifecycleParams,
    ctx: StepContext,
    bus: Bus,
    bridge: SchedulerBridge,
    init_lock: Mutex<()>,
    driving: AtomicBool,
    stop_called: AtomicBool,
    created_at: Instant,
}

impl Lifecycle {
    /// Creates a standalone lifecycle (own bus, own cancellation scope).
    ///
    /// Fails with [`RuntimeError::MissingCapability`] if the controller has no
    /// variant of `initialize` or `run_loop`.
    pub fn new(controller: ControllerRef, params: LifecycleParams) -> Result<Self, RuntimeError> {
        Self::attach(
            controller,
            params,
            Bus::new(STANDALONE_BUS_CAPACITY),
            CancellationToken::new(),
            None,
            SchedulerBridge::default(),
        )
    }

    pub(crate) fn attach(
        controller: ControllerRef,
        params: LifecycleParams,
        bus: Bus,
        token: CancellationToken,
        metrics: Option<Arc<dyn MetricsSink>>,
        bridge: SchedulerBridge,
    ) -> Result<Self, RuntimeError> {
        let name: Arc<str> = Arc::from(controller.name());
        let dispatch = DispatchTable::resolve(controller.capabilities(), &name)?;
        let ctx = StepContext::new(ControllerId::next(), name, Arc::new(Shared::new()), token, metrics);

        tracing::debug!(
            parent: ctx.span(),
            initialize = dispatch.initialize.as_str(),
            run_loop = dispatch.run_loop.as_str(),
            run_finally = dispatch.run_finally.as_str(),
            health = dispatch.health.as_str(),
            "dispatch resolved"
        );

        Ok(Self {
            controller,
            dispatch,
            params,
            ctx,
            bus,
            bridge,
            init_lock: Mutex::new(()),
            driving: AtomicBool::new(false),
            stop_called: AtomicBool::new(false),
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> ControllerId {
        self.ctx.id()
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn state(&self) -> LifecycleState {
        self.ctx.shared().state()
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn params(&self) -> &LifecycleParams {
        &self.params
    }

    /// Completed loop iterations since initialization (failed ones included).
    pub fn iteration_count(&self) -> u64 {
        self.ctx.shared().iterations()
    }

    pub fn is_initialized(&self) -> bool {
        self.ctx.shared().is_initialized()
    }

    /// Current value of the running flag.
    pub fn is_running(&self) -> bool {
        self.ctx.shared().is_running()
    }

    /// Receiver for this lifecycle's events (published from now on).
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Initializes the controller, at most once.
    ///
    /// - `Uninitialized`: retries `initialize` per `init_tries`/`init_wait`.
    /// - `Running`: no-op.
    /// - `Stopping`/`Stopped`: [`RuntimeError::AlreadyStopped`].
    ///
    /// Concurrent callers wait for the first one and share its outcome state.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let _serial = self.init_lock.lock().await;
        match self.state() {
            LifecycleState::Uninitialized => self.initialize().await,
            LifecycleState::Initializing | LifecycleState::Running => Ok(()),
            LifecycleState::Stopping | LifecycleState::Stopped => Err(self.already_stopped()),
        }
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        let shared = self.ctx.shared();
        let began = Instant::now();
        shared.advance(LifecycleState::Initializing);
        self.bus.publish(self.ctx.event(EventKind::ControllerStarting));
        tracing::info!(parent: self.ctx.span(), tries = self.params.init_tries, "initializing");

        let attempts = AtomicU32::new(0);
        let (this, counter) = (self, &attempts);
        let attempt = move || async move {
            let n = counter.fetch_add(1, Ordering::AcqRel) + 1;
            let res = run_step(
                &this.controller,
                &this.dispatch,
                Step::Initialize,
                &this.ctx,
                None,
                &this.bus,
            )
            .await;
            if let Err(e) = &res {
                this.bus.publish(
                    this.ctx
                        .event(EventKind::InitAttemptFailed)
                        .with_step(Step::Initialize.as_str())
                        .with_attempt(n)
                        .with_error(e),
                );
            }
            res
        };
        let retryable = |e: &StepError| !matches!(e, StepError::Fatal { .. } | StepError::Canceled);
        let notify = |_: &StepError, n: u32, delay: Duration| {
            self.bus.publish(
                self.ctx
                    .event(EventKind::BackoffScheduled)
                    .with_attempt(n)
                    .with_delay(delay),
            );
        };

        let policy = self.params.init_policy();
        let outcome = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(RetryError::Rejected {
                attempt: attempts.load(Ordering::Acquire),
                error: StepError::Canceled,
            }),
            res = retry_notify(&policy, attempt, retryable, notify) => res,
        };

        match outcome {
            Ok(()) => {
                shared.mark_initialized();
                shared.set_running(!self.ctx.is_cancelled() && shared.stop_requested_at().is_none());
                shared.advance(LifecycleState::Running);

                let elapsed = began.elapsed();
                tracing::info!(
                    parent: self.ctx.span(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "activated"
                );
                self.bus.publish(
                    self.ctx
                        .event(EventKind::ControllerRunning)
                        .with_elapsed(elapsed),
                );
                Ok(())
            }
            Err(err) => {
                let attempts = err.attempts();
                let reason = err.into_inner();
                shared.record_error(&reason);
                shared.set_running(false);
                shared.advance(LifecycleState::Stopped);

                if reason == StepError::Canceled {
                    tracing::info!(parent: self.ctx.span(), attempts, "initialization cancelled by stop request");
                } else {
                    tracing::error!(parent: self.ctx.span(), attempts, error = %reason, "initialization failed");
                }
                self.bus.publish(
                    self.ctx
                        .event(EventKind::InitializationFailed)
                        .with_attempt(attempts)
                        .with_error(&reason),
                );
                Err(RuntimeError::InitializationFailed {
                    controller: self.name().to_string(),
                    attempts,
                    reason,
                })
            }
        }
    }

    /// Starts (if needed), runs the loop until the running flag clears, then cleans up.
    ///
    /// Returns [`RuntimeError::AlreadyRunning`] if another caller is driving this
    /// lifecycle, and [`RuntimeError::AlreadyStopped`] once it has stopped.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        if self.driving.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyRunning {
                controller: self.name().to_string(),
            });
        }
        let _driving = DrivingGuard(&self.driving);

        if self.state().is_winding_down() {
            return Err(self.already_stopped());
        }
        self.start().await?;
        self.iterate().await;
        self.wind_down().await;
        Ok(())
    }

    async fn iterate(&self) {
        let shared = self.ctx.shared();
        let budget = self.params.step_budget();
        let cap = self.params.failure_cap();
        let mut consecutive: u32 = 0;

        while shared.is_running() {
            let res = run_step(&self.controller, &self.dispatch, Step::Loop, &self.ctx, budget, &self.bus).await;
            let iteration = shared.bump_iterations();

            match res {
                Ok(()) => consecutive = 0,
                Err(StepError::Canceled) if self.ctx.is_cancelled() => {
                    tracing::debug!(parent: self.ctx.span(), iteration, "iteration cut short by stop request");
                }
                Err(e) => {
                    consecutive = consecutive.saturating_add(1);
                    shared.record_error(&e);
                    tracing::error!(parent: self.ctx.span(), iteration, error = %e, "loop iteration failed");
                    self.bus.publish(
                        self.ctx
                            .event(EventKind::IterationFailed)
                            .with_step(Step::Loop.as_str())
                            .with_iteration(iteration)
                            .with_error(&e),
                    );
                    if cap.is_some_and(|max| consecutive >= max) {
                        tracing::error!(
                            parent: self.ctx.span(),
                            consecutive,
                            "too many consecutive failures; leaving loop"
                        );
                        shared.set_running(false);
                    }
                }
            }

            if !shared.is_running() {
                break;
            }
            self.pause().await;
        }
    }

    async fn pause(&self) {
        let interval = self.params.sample_interval;
        if interval.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        tokio::select! {
            _ = time::sleep(interval) => {}
            _ = self.ctx.cancelled() => {}
        }
    }

    async fn wind_down(&self) {
        let shared = self.ctx.shared();
        shared.set_running(false);
        shared.advance(LifecycleState::Stopping);

        // cleanup gets its own scope: a stop request must not cancel it
        let cleanup_ctx = self.ctx.scoped(CancellationToken::new());
        if let Err(e) = run_step(&self.controller, &self.dispatch, Step::Finally, &cleanup_ctx, None, &self.bus).await {
            shared.record_error(&e);
            tracing::error!(parent: self.ctx.span(), error = %e, "cleanup failed");
            self.bus.publish(
                self.ctx
                    .event(EventKind::CleanupFailed)
                    .with_step(Step::Finally.as_str())
                    .with_error(&e),
            );
        }

        shared.advance(LifecycleState::Stopped);
        let iterations = shared.iterations();
        let mut ev = self.ctx.event(EventKind::ControllerStopped).with_iteration(iterations);
        match shared.stop_requested_at() {
            Some(at) => {
                let elapsed = at.elapsed();
                tracing::info!(
                    parent: self.ctx.span(),
                    iterations,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "deactivated"
                );
                ev = ev.with_elapsed(elapsed);
            }
            None => tracing::error!(parent: self.ctx.span(), iterations, "deactivated unexpectedly"),
        }
        self.bus.publish(ev);
    }

    /// Requests the loop to end.
    ///
    /// Calls the controller's `pre_stop` hook (first call only), clears the
    /// running flag and wakes the pause between iterations. Returns immediately;
    /// the loop exits after the step in flight and cleanup follows.
    pub fn stop(&self) {
        if !self.stop_called.swap(true, Ordering::AcqRel) {
            self.ctx.shared().note_stop_request();
            if let Err(payload) =
                std::panic::catch_unwind(AssertUnwindSafe(|| self.controller.pre_stop()))
            {
                tracing::warn!(
                    parent: self.ctx.span(),
                    panic = %panic_message(payload.as_ref()),
                    "pre_stop hook panicked"
                );
            }
            tracing::info!(parent: self.ctx.span(), state = %self.state(), "stop requested");
            self.bus.publish(self.ctx.event(EventKind::StopRequested));
        }
        self.ctx.shared().set_running(false);
        self.ctx.token().cancel();
    }

    /// Reports health without waiting on the loop.
    ///
    /// The default answer is `initialized && running`; a controller health step
    /// refines it, and identity/state are always re-applied afterwards.
    pub async fn health_check(&self) -> HealthReport {
        let base = self.base_report();
        match self.dispatch.health {
            Variant::Absent => base,
            Variant::Cooperative => {
                let fallback = base.clone();
                match AssertUnwindSafe(self.controller.health_check(base)).catch_unwind().await {
                    Ok(report) => self.stamp(report),
                    Err(payload) => fallback.unhealthy(format!(
                        "health check panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                }
            }
            Variant::Blocking => {
                let fallback = base.clone();
                let controller = Arc::clone(&self.controller);
                match offload_blocking(move || controller.health_check_blocking(base)) {
                    Ok(handle) => match handle.await {
                        Ok(report) => self.stamp(report),
                        Err(e) => fallback.unhealthy(format!("health check failed: {e}")),
                    },
                    Err(_) => self.health_check_blocking(),
                }
            }
        }
    }

    /// [`health_check`](Self::health_check) for callers outside any scheduler.
    ///
    /// A cooperative health step is driven through the scheduler bridge; if that
    /// is impossible (e.g. called from inside a scheduler) the state-based report
    /// is returned.
    pub fn health_check_blocking(&self) -> HealthReport {
        let base = self.base_report();
        match self.dispatch.health {
            Variant::Absent => base,
            Variant::Blocking => {
                let fallback = base.clone();
                match std::panic::catch_unwind(AssertUnwindSafe(|| {
                    self.controller.health_check_blocking(base)
                })) {
                    Ok(report) => self.stamp(report),
                    Err(payload) => fallback.unhealthy(format!(
                        "health check panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                }
            }
            Variant::Cooperative => {
                let fallback = base.clone();
                match self
                    .bridge
                    .run_blocking(self.controller.health_check(base), Some(BLOCKING_HEALTH_BUDGET))
                {
                    Ok(report) => self.stamp(report),
                    Err(e) => {
                        tracing::debug!(parent: self.ctx.span(), error = %e, "health step not driven");
                        fallback
                    }
                }
            }
        }
    }

    /// Drives [`run`](Self::run) to completion from a thread with no scheduler.
    pub fn run_blocking(&self) -> Result<(), RuntimeError> {
        self.bridge.run_blocking(self.run(), None)?
    }

    fn base_report(&self) -> HealthReport {
        let shared = self.ctx.shared();
        let state = shared.state();
        let initialized = shared.is_initialized();
        let running = shared.is_running();

        let message = match state {
            LifecycleState::Uninitialized => "not started",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running if running => "running",
            LifecycleState::Running | LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped if !initialized => "failed to initialize",
            LifecycleState::Stopped => "stopped",
        };

        let mut report = HealthReport::new(
            self.id(),
            self.name(),
            state,
            initialized && running,
            message,
        )
        .with_detail("state", state)
        .with_detail("iterations", shared.iterations())
        .with_detail("uptime_ms", self.created_at.elapsed().as_millis());
        if let Some(err) = shared.last_error() {
            report = report.with_detail("last_error", err);
        }
        report
    }

    fn stamp(&self, mut report: HealthReport) -> HealthReport {
        report.controller = self.name().to_string();
        report.id = self.id();
        report.state = self.state();
        report
    }

    fn already_stopped(&self) -> RuntimeError {
        RuntimeError::AlreadyStopped {
            controller: self.name().to_string(),
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("iterations", &self.iteration_count())
            .finish()
    }
}

struct DrivingGuard<'a>(&'a AtomicBool);

impl Drop for DrivingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
