//! # Supervisor: owns the controllers of one process.
//!
//! ```text
//! register(controller) ──► Lifecycle (dispatch resolved, child token, shared bus)
//!
//! run():
//!   listener: Bus.subscribe() ──► SubscriberSet::emit()        (only with subscribers)
//!   JoinSet ◄── lifecycle.run()  per registered controller
//!   loop select {
//!     register() while running        → spawn into the JoinSet
//!     all lifecycles returned         → Ok
//!     shutdown() / OS signal          → stop every lifecycle
//!                                     → wait up to cfg.grace
//!                                        ├─ all Stopped → AllStoppedWithin, Ok
//!                                        └─ otherwise   → GraceExceeded, Err(stuck)
//!   }
//! ```
//!
//! A controller that fails to initialize is logged and reported as
//! `InitializationFailed`; the others keep running. Once shutdown was requested,
//! `register()` fails with `AlreadyStopped`.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use ctrlvisor::{Config, ControllerFn, PrometheusMetrics, Supervisor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metrics = Arc::new(PrometheusMetrics::new());
//!     let sup = Supervisor::builder(Config::default())
//!         .with_metrics(metrics.clone())
//!         .build();
//!
//!     sup.register(
//!         ControllerFn::new("heartbeat")
//!             .on_initialize(|_| async { Ok(()) })
//!             .on_loop(|_| async { Ok(()) })
//!             .arc(),
//!     )?;
//!
//!     sup.run().await?; // until SIGINT/SIGTERM
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::builder::SupervisorBuilder;
use super::config::{Config, LifecycleParams};
use super::lifecycle::Lifecycle;
use super::shutdown::wait_for_shutdown_signal;
use super::state::LifecycleState;
use crate::bridge::SchedulerBridge;
use crate::controllers::{ControllerRef, SystemHealth};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::metrics::MetricsSink;
use crate::subscribers::{Subscribe, SubscriberSet};

type Joined = (Arc<Lifecycle>, Result<(), RuntimeError>);

#[derive(Default)]
struct Registered {
    lifecycles: Vec<Arc<Lifecycle>>,
    /// Set while `run()` is driving: late registrations go through it.
    live: Option<mpsc::UnboundedSender<Arc<Lifecycle>>>,
}

/// Registers controllers, runs them concurrently and shuts them down together.
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    controllers: RwLock<Registered>,
    token: CancellationToken,
    bridge: SchedulerBridge,
    started_at: Instant,
}

impl Supervisor {
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        subscribers: Vec<Arc<dyn Subscribe>>,
        metrics: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        Self {
            bus: Bus::new(cfg.bus_capacity_clamped()),
            bridge: SchedulerBridge::new(cfg.scheduler.clone()),
            cfg,
            subscribers,
            metrics,
            controllers: RwLock::new(Registered::default()),
            token: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Receiver for every event published by this supervisor and its controllers.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Registers a controller with the default lifecycle params from [`Config`].
    pub fn register(&self, controller: ControllerRef) -> Result<Arc<Lifecycle>, RuntimeError> {
        self.register_with(controller, self.cfg.lifecycle)
    }

    /// Registers a controller with its own lifecycle params.
    ///
    /// Fails with [`RuntimeError::MissingCapability`] when the controller lacks
    /// both variants of `initialize` or `run_loop`, and with
    /// [`RuntimeError::AlreadyStopped`] once shutdown was requested. A controller
    /// registered while [`run`](Self::run) is pending starts right away.
    pub fn register_with(
        &self,
        controller: ControllerRef,
        params: LifecycleParams,
    ) -> Result<Arc<Lifecycle>, RuntimeError> {
        let lifecycle = Arc::new(Lifecycle::attach(
            controller,
            params,
            self.bus.clone(),
            self.token.child_token(),
            self.metrics.clone(),
            self.bridge.clone(),
        )?);

        let mut registered = self.write();
        if self.token.is_cancelled() {
            return Err(RuntimeError::AlreadyStopped {
                controller: lifecycle.name().to_string(),
            });
        }
        registered.lifecycles.push(Arc::clone(&lifecycle));
        if let Some(live) = &registered.live {
            let _ = live.send(Arc::clone(&lifecycle));
        }
        tracing::info!(controller = lifecycle.name(), id = %lifecycle.id(), "controller registered");
        Ok(lifecycle)
    }

    pub fn controllers(&self) -> Vec<Arc<Lifecycle>> {
        self.read().lifecycles.clone()
    }

    /// Runs every registered controller until they all exit, or until a
    /// shutdown is requested and the grace period plays out.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let listener = Listener::spawn(&self.bus, &self.subscribers);

        let (live, mut late) = mpsc::unbounded_channel();
        let mut set: JoinSet<Joined> = JoinSet::new();
        {
            let mut registered = self.write();
            for lc in &registered.lifecycles {
                spawn_lifecycle(&mut set, Arc::clone(lc));
            }
            registered.live = Some(live);
        }
        tracing::info!(controllers = set.len(), "supervisor running");

        let res = self.drive(&mut set, &mut late).await;
        self.write().live = None;
        if let Some(listener) = listener {
            listener.finish().await;
        }
        res
    }

    /// [`run`](Self::run) for callers on a thread without a scheduler.
    pub fn run_blocking(&self) -> Result<(), RuntimeError> {
        self.bridge.run_blocking(self.run(), None)?
    }

    /// Stops every controller; a pending [`run`](Self::run) then waits up to `grace`.
    pub fn shutdown(&self) {
        let controllers = {
            let registered = self.write();
            if self.token.is_cancelled() {
                return;
            }
            self.token.cancel();
            registered.lifecycles.clone()
        };
        tracing::info!("shutdown requested");
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        for lc in controllers {
            lc.stop();
        }
    }

    /// Aggregated health of every registered controller.
    pub async fn health(&self) -> SystemHealth {
        let controllers = self.controllers();
        let reports = join_all(controllers.iter().map(|lc| lc.health_check())).await;
        SystemHealth::from_reports(reports, self.started_at.elapsed())
    }

    /// [`health`](Self::health) for blocking callers.
    pub fn health_blocking(&self) -> SystemHealth {
        let reports = self
            .controllers()
            .iter()
            .map(|lc| lc.health_check_blocking())
            .collect();
        SystemHealth::from_reports(reports, self.started_at.elapsed())
    }

    async fn drive(&self, set: &mut JoinSet<Joined>, late: &mut Late) -> Result<(), RuntimeError> {
        let signal = wait_for_shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.wait_all_with_grace(set, late).await,
                signal = &mut signal => {
                    tracing::info!(signal = signal.as_str(), "termination signal received");
                    self.shutdown();
                    return self.wait_all_with_grace(set, late).await;
                }
                Some(lc) = late.recv() => {
                    tracing::debug!(controller = lc.name(), "starting controller registered while running");
                    spawn_lifecycle(set, lc);
                }
                joined = set.join_next() => match joined {
                    Some(joined) => report_exit(joined),
                    None => {
                        tracing::info!("all controllers exited");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn wait_all_with_grace(
        &self,
        set: &mut JoinSet<Joined>,
        late: &mut Late,
    ) -> Result<(), RuntimeError> {
        // registered between the last poll and the cancellation
        while let Ok(lc) = late.try_recv() {
            spawn_lifecycle(set, lc);
        }
        let grace = self.cfg.grace;
        match time::timeout(grace, join_all_lifecycles(set)).await {
            Ok(()) => {
                tracing::info!("all controllers stopped within grace");
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                let stuck: Vec<String> = self
                    .controllers()
                    .iter()
                    .filter(|lc| lc.state() != LifecycleState::Stopped)
                    .map(|lc| lc.name().to_string())
                    .collect();
                tracing::error!(grace_ms = grace.as_millis() as u64, ?stuck, "grace period exceeded");
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_elapsed(grace)
                        .with_reason(stuck.join(", ")),
                );
                set.abort_all();
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registered> {
        self.controllers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registered> {
        self.controllers.write().unwrap_or_else(|p| p.into_inner())
    }
}

type Late = mpsc::UnboundedReceiver<Arc<Lifecycle>>;

fn spawn_lifecycle(set: &mut JoinSet<Joined>, lc: Arc<Lifecycle>) {
    set.spawn(async move {
        let res = lc.run().await;
        (lc, res)
    });
}

async fn join_all_lifecycles(set: &mut JoinSet<Joined>) {
    while let Some(joined) = set.join_next().await {
        report_exit(joined);
    }
}

fn report_exit(joined: Result<Joined, JoinError>) {
    match joined {
        Ok((_, Ok(()))) => {}
        Ok((lc, Err(RuntimeError::InitializationFailed { attempts, reason, .. }))) => {
            tracing::warn!(
                controller = lc.name(),
                attempts,
                error = %reason,
                "controller never started; others keep running"
            );
        }
        Ok((lc, Err(e))) => {
            tracing::warn!(controller = lc.name(), error = %e, "controller was not driven");
        }
        Err(e) => tracing::error!(error = %e, "controller task aborted"),
    }
}

/// Forwards bus events to the subscriber set while the supervisor runs.
struct Listener {
    done: CancellationToken,
    handle: JoinHandle<()>,
}

impl Listener {
    fn spawn(bus: &Bus, subscribers: &[Arc<dyn Subscribe>]) -> Option<Self> {
        if subscribers.is_empty() {
            return None;
        }
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(subscribers.to_vec(), bus.clone());
        let done = CancellationToken::new();
        let finished = done.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = finished.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(ev);
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        });
        Some(Self { done, handle })
    }

    /// Flushes what is already on the bus, then drains subscriber queues.
    async fn finish(self) {
        self.done.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::{ControllerFn, HealthStatus};
    use crate::error::StepError;
    use crate::metrics::PrometheusMetrics;
    use std::time::Duration;

    fn cfg() -> Config {
        Config {
            grace: Duration::from_secs(5),
            lifecycle: LifecycleParams::default()
                .with_init(2, Duration::from_millis(10))
                .with_sample_interval(Duration::from_millis(10)),
            ..Config::default()
        }
    }

    fn idle(name: &'static str) -> ControllerRef {
        ControllerFn::new(name)
            .on_initialize(|_| async { Ok(()) })
            .on_loop(|_| async { Ok(()) })
            .arc()
    }

    fn one_shot(name: &'static str) -> ControllerRef {
        ControllerFn::new(name)
            .on_initialize(|_| async { Ok(()) })
            .on_loop(|ctx| async move {
                ctx.stop();
                Ok(())
            })
            .arc()
    }

    #[test]
    fn register_rejects_incomplete_controllers() {
        let sup = Supervisor::builder(cfg()).build();
        let half = ControllerFn::new("no-init").on_loop(|_| async { Ok(()) }).arc();
        assert!(matches!(
            sup.register(half),
            Err(RuntimeError::MissingCapability { step: "initialize", .. })
        ));
        assert!(sup.controllers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initialization_does_not_affect_siblings() {
        let metrics = Arc::new(PrometheusMetrics::new());
        let sup = Supervisor::builder(cfg()).with_metrics(metrics.clone()).build();
        let broken = ControllerFn::new("dead-sensor")
            .on_initialize(|_| async { Err(StepError::transient("i2c nack")) })
            .on_loop(|_| async { Ok(()) })
            .arc();
        let dead = sup.register(broken).unwrap();
        let alive = sup.register(one_shot("thermostat")).unwrap();

        let mut rx = sup.events();
        sup.run().await.unwrap();

        assert_eq!(dead.state(), LifecycleState::Stopped);
        assert!(!dead.is_initialized());
        assert_eq!(alive.state(), LifecycleState::Stopped);
        assert_eq!(alive.iteration_count(), 1);

        let mut init_failed = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::InitializationFailed {
                init_failed.push(ev.controller.unwrap().to_string());
            }
        }
        assert_eq!(init_failed, vec!["dead-sensor".to_string()]);
        assert_eq!(
            metrics.counter(
                "controller_init_attempts_failed_total",
                &[("controller", "dead-sensor")]
            ),
            2
        );
        assert_eq!(
            metrics.gauge_value("controller_running", &[("controller", "thermostat")]),
            Some(0.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything_within_grace() {
        let sup = Supervisor::builder(cfg()).build();
        let a = sup.register(idle("fan")).unwrap();
        let b = sup.register(idle("pump")).unwrap();

        let runner = tokio::spawn({
            let sup = Arc::clone(&sup);
            async move { sup.run().await }
        });
        while a.iteration_count() < 2 || b.iteration_count() < 2 {
            time::sleep(Duration::from_millis(1)).await;
        }

        let health = sup.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.controllers.len(), 2);

        let mut rx = sup.events();
        sup.shutdown();
        runner.await.unwrap().unwrap();

        assert_eq!(a.state(), LifecycleState::Stopped);
        assert_eq!(b.state(), LifecycleState::Stopped);
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(kinds.first(), Some(&EventKind::ShutdownRequested));
        assert_eq!(kinds.last(), Some(&EventKind::AllStoppedWithin));
        assert_eq!(sup.health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_controller_is_reported_after_grace() {
        let sup = Supervisor::builder(Config {
            grace: Duration::from_secs(1),
            ..cfg()
        })
        .build();
        let stubborn = ControllerFn::new("stubborn")
            .on_initialize(|_| async { Ok(()) })
            .on_loop(|_| async {
                // ignores stop requests
                time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .arc();
        let stuck = sup.register(stubborn).unwrap();
        let polite = sup.register(idle("polite")).unwrap();

        let runner = tokio::spawn({
            let sup = Arc::clone(&sup);
            async move { sup.run().await }
        });
        while stuck.state() != LifecycleState::Running || polite.iteration_count() < 1 {
            time::sleep(Duration::from_millis(1)).await;
        }
        sup.shutdown();

        match runner.await.unwrap() {
            Err(RuntimeError::GraceExceeded { grace, stuck }) => {
                assert_eq!(grace, Duration::from_secs(1));
                assert_eq!(stuck, vec!["stubborn".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(polite.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn controller_registered_while_running_is_driven_and_stopped() {
        let sup = Supervisor::builder(cfg()).build();
        let first = sup.register(idle("first")).unwrap();

        let runner = tokio::spawn({
            let sup = Arc::clone(&sup);
            async move { sup.run().await }
        });
        while first.iteration_count() < 1 {
            time::sleep(Duration::from_millis(1)).await;
        }

        let late = sup.register(idle("late")).unwrap();
        while late.iteration_count() < 1 {
            time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(late.state(), LifecycleState::Running);

        sup.shutdown();
        runner.await.unwrap().unwrap();
        assert_eq!(first.state(), LifecycleState::Stopped);
        assert_eq!(late.state(), LifecycleState::Stopped);
    }

    #[test]
    fn register_after_shutdown_is_rejected() {
        let sup = Supervisor::builder(cfg()).build();
        sup.shutdown();
        assert!(matches!(
            sup.register(idle("too-late")),
            Err(RuntimeError::AlreadyStopped { controller }) if controller == "too-late"
        ));
        assert!(sup.controllers().is_empty());
    }

    #[test]
    fn runs_from_a_plain_thread() {
        let sup = Supervisor::builder(cfg()).build();
        let lc = sup.register(one_shot("batch")).unwrap();
        sup.run_blocking().unwrap();
        assert_eq!(lc.state(), LifecycleState::Stopped);

        let health = sup.health_blocking();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.unhealthy().collect::<Vec<_>>(), vec!["batch"]);
    }
}
