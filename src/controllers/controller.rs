//! # The controller contract.
//!
//! A controller is a long-running unit (sensor poller, PID loop, output driver)
//! made of up to four steps, each available as a cooperative (`async`) or a
//! blocking variant:
//!
//! | step          | cooperative      | blocking                  | required |
//! |---------------|------------------|---------------------------|----------|
//! | initialize    | `initialize`     | `initialize_blocking`     | yes      |
//! | loop body     | `run_loop`       | `run_loop_blocking`       | yes      |
//! | cleanup       | `run_finally`    | `run_finally_blocking`    | no       |
//! | health        | `health_check`   | `health_check_blocking`   | no       |
//!
//! [`Controller::capabilities`] says which ones exist; only those are ever called.
//! Blocking variants run on the worker pool and must not await anything.
//!
//! Steps take `&self`: the lifecycle never runs two steps of the same controller
//! at once, but health checks may overlap any step, so mutable state lives
//! behind a lock or in atomics.
//!
//! # Example
//! ```rust
//! use async_trait::async_trait;
//! use ctrlvisor::{Capabilities, Controller, StepContext, StepError, StepSet};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct Counter(AtomicU32);
//!
//! #[async_trait]
//! impl Controller for Counter {
//!     fn name(&self) -> &str { "counter" }
//!     fn capabilities(&self) -> Capabilities { Capabilities::cooperative(StepSet::CORE) }
//!
//!     async fn initialize(&self, _ctx: &StepContext) -> Result<(), StepError> { Ok(()) }
//!
//!     async fn run_loop(&self, ctx: &StepContext) -> Result<(), StepError> {
//!         if self.0.fetch_add(1, Ordering::Relaxed) == 9 {
//!             ctx.stop();
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::capability::Capabilities;
use super::context::StepContext;
use super::health::HealthReport;
use crate::error::StepError;

fn not_provided(step: &str) -> StepError {
    StepError::fatal(format!("{step} is not provided by this controller"))
}

#[async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Display name used in logs, events, metrics and health reports.
    fn name(&self) -> &str;

    /// Steps this controller implements.
    fn capabilities(&self) -> Capabilities;

    async fn initialize(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Err(not_provided("initialize"))
    }

    /// One loop iteration. Call [`StepContext::stop`] to end the loop.
    async fn run_loop(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Err(not_provided("run_loop"))
    }

    /// Release resources; runs exactly once after the loop exits.
    async fn run_finally(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Refine the state-based `report`. Must not wait on the loop.
    async fn health_check(&self, report: HealthReport) -> HealthReport {
        report
    }

    fn initialize_blocking(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Err(not_provided("initialize_blocking"))
    }

    fn run_loop_blocking(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Err(not_provided("run_loop_blocking"))
    }

    fn run_finally_blocking(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    fn health_check_blocking(&self, report: HealthReport) -> HealthReport {
        report
    }

    /// Called synchronously by `stop()` before the running flag is cleared.
    fn pre_stop(&self) {}
}

/// Shared handle to a controller.
pub type ControllerRef = Arc<dyn Controller>;
