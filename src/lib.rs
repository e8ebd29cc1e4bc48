//! # ctrlvisor
//!
//! **Ctrlvisor** is a concurrency runtime for long-lived *controllers*: units
//! of work with an `initialize` → `run_loop` → `run_finally` lifecycle that
//! drive sensors, outputs and other devices.
//!
//! Each step may be written cooperatively (`async`) or as plain blocking code.
//! The runtime resolves which variant to call once, at registration, and runs
//! blocking steps on a bounded worker pool so they never stall the scheduler.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  Controller  │   │  Controller  │   │  Controller  │
//!     │ (cooperative)│   │  (blocking)  │   │   (mixed)    │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - register(): resolve Capabilities into a DispatchTable          │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (per-subscriber queues, started by run())        │
//! │  - shutdown(): stop all, wait up to Config::grace                 │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │  Lifecycle   │   │  Lifecycle   │   │  Lifecycle   │   │
//!     │ init→loop→fin│   │ init→loop→fin│   │ init→loop→fin│   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ run_step()       │ run_step()       │                 │
//!      ├─ cooperative ──► await on the scheduler thread        │
//!      └─ blocking ─────► offload_blocking() worker pool       │
//!      │                  │                  │                 │
//!      ▼                  ▼                  ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                  (capacity: Config::bus_capacity)                 │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  supervisor listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                         ┌─────────┼─────────┐
//!                         ▼         ▼         ▼
//!                      metrics    sub2      subN
//! ```
//!
//! ### Lifecycle
//! ```text
//! Uninitialized ──start()──► Initializing
//!   retry_notify(initialize, init_tries, init_wait)
//!     ├─ Ok  ──► Running, ControllerRunning
//!     └─ Err ──► Stopped, InitializationFailed (no cleanup)
//!
//! Running:
//! while running {
//!   ├─► run_loop (bounded by step_timeout, panics contained)
//!   │     ├─ Ok  ──► iterations += 1
//!   │     └─ Err ──► IterationFailed, maybe trip max_consecutive_failures
//!   └─► sleep(sample_interval), cut short by stop()
//! }
//!
//! Stopping ──► run_finally ──► Stopped, ControllerStopped
//! ```
//!
//! ## Features
//! | Area               | Description                                                  | Key types / traits                              |
//! |--------------------|--------------------------------------------------------------|-------------------------------------------------|
//! | **Controllers**    | Step trait with cooperative and blocking variants.           | [`Controller`], [`ControllerFn`], [`Capabilities`] |
//! | **Lifecycle**      | Init with retry, paced loop, guaranteed cleanup.             | [`Lifecycle`], [`LifecycleState`]               |
//! | **Supervision**    | Group controllers, isolate failures, graceful shutdown.      | [`Supervisor`], [`SystemHealth`]                |
//! | **Resilience**     | Retry with backoff and bounded operations, usable alone.     | [`ops`], [`RetryPolicy`], [`BackoffPolicy`]     |
//! | **Scheduler bridge** | Blocking callers drive cooperative code and vice versa.    | [`SchedulerBridge`], [`offload_blocking`]       |
//! | **Subscriber API** | Hook into lifecycle events (metrics, custom subscribers).    | [`Subscribe`], [`MetricsSubscriber`]            |
//! | **Errors**         | Typed errors for steps, retries and the runtime.             | [`StepError`], [`RetryError`], [`RuntimeError`] |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ctrlvisor::{
//!     Config, ControllerFn, LifecycleParams, PrometheusMetrics, StepError, Supervisor,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metrics = Arc::new(PrometheusMetrics::new());
//!     let sup = Supervisor::builder(Config::default())
//!         .with_metrics(metrics.clone())
//!         .build();
//!
//!     let params = LifecycleParams::default()
//!         .with_init(5, Duration::from_secs(1))
//!         .with_sample_interval(Duration::from_millis(500))
//!         .with_step_timeout(Duration::from_secs(2));
//!
//!     sup.register_with(
//!         ControllerFn::new("thermometer")
//!             .on_initialize(|_ctx| async { Ok(()) })
//!             .on_loop(|ctx| async move {
//!                 if ctx.is_cancelled() {
//!                     return Err(StepError::Canceled);
//!                 }
//!                 // read the sensor...
//!                 Ok(())
//!             })
//!             .arc(),
//!         params,
//!     )?;
//!
//!     sup.run().await?; // until SIGINT/SIGTERM
//!     Ok(())
//! }
//! ```
mod bridge;
mod controllers;
mod core;
mod error;
mod events;
mod metrics;
pub mod ops;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use bridge::{
    SchedulerBridge, SchedulerHandle, TaskHandle, acquire_scheduler, offload_blocking,
    spawn_if_active,
};
pub use controllers::{
    BoxStepFuture, Capabilities, Controller, ControllerFn, ControllerId, ControllerRef,
    DispatchTable, HealthReport, HealthStatus, StepContext, StepSet, SystemHealth, Variant,
};
pub use core::{
    Config, Lifecycle, LifecycleParams, LifecycleState, SchedulerConfig, Supervisor,
    SupervisorBuilder,
};
pub use error::{RetryError, RuntimeError, SchedulerError, StepError, TimedOut};
pub use events::{Bus, Event, EventKind};
pub use metrics::{Labels, MetricKey, MetricsSink, PrometheusMetrics, Sample};
pub use ops::{OperationBudget, retry, retry_notify, retry_when, with_timeout, with_timeout_token};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy, Retryable};
pub use subscribers::{MetricsSubscriber, Subscribe, SubscriberSet};
