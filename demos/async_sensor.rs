//! # Example: async_sensor
//!
//! A cooperative controller that polls a flaky sensor.
//!
//! Demonstrates how to:
//! - Build a controller from async closures with [`ControllerFn`].
//! - Retry initialization (`with_init`) and bound each loop step (`with_step_timeout`).
//! - Read lifecycle metrics from [`PrometheusMetrics`] after shutdown.
//!
//! ## Flow
//! ```text
//! Supervisor::run()
//!     ├─► initialize: fails twice (sensor "warming up"), succeeds on attempt 3
//!     ├─► run_loop every 200ms: every 4th read times out
//!     ├─► after ~3s a helper task calls Supervisor::shutdown()
//!     └─► run_finally: "sensor powered down", AllStoppedWithin
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example async_sensor
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use ctrlvisor::{
    Config, ControllerFn, Event, EventKind, LifecycleParams, PrometheusMetrics, StepError,
    Subscribe, Supervisor,
};

/// Prints a line per failure-related event.
struct Console;

#[async_trait::async_trait]
impl Subscribe for Console {
    async fn on_event(&self, ev: &Event) {
        match ev.kind {
            EventKind::InitAttemptFailed
            | EventKind::IterationFailed
            | EventKind::StepTimedOut
            | EventKind::ControllerRunning
            | EventKind::ControllerStopped => {
                println!(
                    "[event] {:<20} controller={:?} reason={:?}",
                    ev.kind.as_str(),
                    ev.controller.as_deref(),
                    ev.reason.as_deref()
                );
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(PrometheusMetrics::new());
    let sup = Supervisor::builder(Config::default())
        .with_subscriber(Arc::new(Console))
        .with_metrics(metrics.clone())
        .build();

    let warmups = Arc::new(AtomicU32::new(0));
    let reads = Arc::new(AtomicU32::new(0));

    let sensor = ControllerFn::new("sensor")
        .on_initialize(move |_ctx| {
            let warmups = Arc::clone(&warmups);
            async move {
                if warmups.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(StepError::transient("warming up"));
                }
                println!("[sensor] ready");
                Ok(())
            }
        })
        .on_loop(move |ctx| {
            let reads = Arc::clone(&reads);
            async move {
                let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
                let latency = if n % 4 == 0 { 500 } else { 20 };
                tokio::select! {
                    _ = ctx.cancelled() => return Err(StepError::Canceled),
                    _ = tokio::time::sleep(Duration::from_millis(latency)) => {}
                }
                println!("[sensor] read #{n}: {:.1}°C", 20.0 + f64::from(n % 7) * 0.3);
                Ok(())
            }
        })
        .on_finally(|_ctx| async {
            println!("[sensor] powered down");
            Ok(())
        })
        .arc();

    let params = LifecycleParams::default()
        .with_init(5, Duration::from_millis(300))
        .with_sample_interval(Duration::from_millis(200))
        .with_step_timeout(Duration::from_millis(100));
    let lifecycle = sup.register_with(sensor, params)?;

    let stopper = Arc::clone(&sup);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        println!("[main] requesting shutdown");
        stopper.shutdown();
    });

    sup.run().await?;

    println!(
        "[main] state={} iterations={}",
        lifecycle.state(),
        lifecycle.iteration_count()
    );
    println!(
        "[main] init attempts failed={} timeouts={}",
        metrics.counter(
            "controller_init_attempts_failed_total",
            &[("controller", "sensor")]
        ),
        metrics.counter(
            "controller_timeouts_total",
            &[("controller", "sensor"), ("step", "run_loop")]
        ),
    );
    if let Ok(text) = metrics.encode_text() {
        print!("{text}");
    }
    Ok(())
}
