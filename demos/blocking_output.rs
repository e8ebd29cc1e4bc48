//! # Example: blocking_output
//!
//! A controller written as plain blocking code, driven from `main` without
//! an async runtime.
//!
//! Demonstrates how to:
//! - Provide blocking step variants with [`ControllerFn`].
//! - Drive a [`Lifecycle`] with `run_blocking()` from an ordinary thread.
//! - Stop from inside a loop step via `StepContext::stop()`.
//! - Query health from a blocking caller.
//!
//! ## Flow
//! ```text
//! main thread ──► Lifecycle::run_blocking()
//!     ├─► initialize_blocking: "pin 17 configured"
//!     ├─► run_loop_blocking ×5 on the worker pool (toggle the output)
//!     │     └─ 5th toggle calls ctx.stop()
//!     └─► run_finally_blocking: "output released"
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example blocking_output
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use ctrlvisor::{ControllerFn, HealthReport, Lifecycle, LifecycleParams};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    static LEVEL: AtomicBool = AtomicBool::new(false);
    static TOGGLES: AtomicU32 = AtomicU32::new(0);

    let relay = ControllerFn::new("relay")
        .on_initialize_blocking(|_ctx| {
            println!("[relay] pin 17 configured");
            Ok(())
        })
        .on_loop_blocking(|ctx| {
            std::thread::sleep(Duration::from_millis(50));
            let level = !LEVEL.fetch_xor(true, Ordering::SeqCst);
            let n = TOGGLES.fetch_add(1, Ordering::SeqCst) + 1;
            println!("[relay] toggle #{n}: {}", if level { "HIGH" } else { "LOW" });
            if n >= 5 {
                ctx.stop();
            }
            Ok(())
        })
        .on_finally_blocking(|_ctx| {
            LEVEL.store(false, Ordering::SeqCst);
            println!("[relay] output released");
            Ok(())
        })
        .on_health(|report: HealthReport| {
            report.with_detail("level", LEVEL.load(Ordering::SeqCst))
        })
        .arc();

    let params = LifecycleParams::default().with_sample_interval(Duration::from_millis(100));
    let lifecycle = Lifecycle::new(relay, params)?;

    lifecycle.run_blocking()?;

    let health = lifecycle.health_check_blocking();
    println!(
        "[main] state={} iterations={} healthy={} message={:?}",
        lifecycle.state(),
        lifecycle.iteration_count(),
        health.healthy,
        health.message
    );
    Ok(())
}
