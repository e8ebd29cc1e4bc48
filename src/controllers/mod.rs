//! Controller contract and the pieces a controller author touches.
//!
//! - [`Controller`] step trait (cooperative and blocking variants) + [`ControllerRef`]
//! - [`Capabilities`] / [`StepSet`] declared steps, resolved into a [`DispatchTable`]
//! - [`StepContext`] identity, running flag, cancellation and metrics for a step
//! - [`HealthReport`] / [`SystemHealth`] health data
//! - [`ControllerFn`] closure-backed controller

mod capability;
mod context;
mod controller;
mod controller_fn;
mod health;

pub use capability::{Capabilities, DispatchTable, StepSet, Variant};
pub use context::{ControllerId, StepContext};
pub use controller::{Controller, ControllerRef};
pub use controller_fn::{BoxStepFuture, ControllerFn};
pub use health::{HealthReport, HealthStatus, SystemHealth};
