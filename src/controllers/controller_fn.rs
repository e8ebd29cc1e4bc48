//! # Closure-backed controller (`ControllerFn`)
//!
//! [`ControllerFn`] assembles a controller from closures, one per step. Its
//! [`capabilities`](Controller::capabilities) are exactly the closures provided,
//! so a missing `initialize`/`run_loop` is reported at registration time.
//!
//! Cooperative closures receive an owned [`StepContext`] and return a fresh
//! future per call; blocking closures borrow it and run on the worker pool.
//!
//! ## Example
//! ```rust
//! use ctrlvisor::{Capabilities, Controller, ControllerFn, ControllerRef, StepError, StepSet};
//!
//! let relay: ControllerRef = ControllerFn::new("relay")
//!     .on_initialize_blocking(|_ctx| Ok(()))
//!     .on_loop_blocking(|ctx| {
//!         // toggle the pin...
//!         ctx.stop();
//!         Ok::<_, StepError>(())
//!     })
//!     .arc();
//!
//! assert_eq!(relay.name(), "relay");
//! assert_eq!(relay.capabilities(), Capabilities::blocking(StepSet::CORE));
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::capability::{Capabilities, StepSet};
use super::context::StepContext;
use super::controller::Controller;
use super::health::HealthReport;
use crate::error::StepError;

/// Boxed future returned by cooperative step closures.
pub type BoxStepFuture = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'static>>;

type CooperativeStep = Arc<dyn Fn(StepContext) -> BoxStepFuture + Send + Sync>;
type BlockingStep = Arc<dyn Fn(&StepContext) -> Result<(), StepError> + Send + Sync>;
type HealthStep = Arc<dyn Fn(HealthReport) -> HealthReport + Send + Sync>;

struct Steps<S> {
    initialize: Option<S>,
    run_loop: Option<S>,
    run_finally: Option<S>,
}

impl<S> Default for Steps<S> {
    fn default() -> Self {
        Self {
            initialize: None,
            run_loop: None,
            run_finally: None,
        }
    }
}

impl<S> Steps<S> {
    fn as_set(&self) -> StepSet {
        StepSet {
            initialize: self.initialize.is_some(),
            run_loop: self.run_loop.is_some(),
            run_finally: self.run_finally.is_some(),
            health: false,
        }
    }
}

/// Controller built from closures.
pub struct ControllerFn {
    name: Cow<'static, str>,
    cooperative: Steps<CooperativeStep>,
    blocking: Steps<BlockingStep>,
    health: Option<HealthStep>,
    pre_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

fn cooperative<F, Fut>(f: F) -> CooperativeStep
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxStepFuture { Box::pin(f(ctx)) })
}

impl ControllerFn {
    /// Starts an empty controller; add at least an initialize and a loop step.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            cooperative: Steps::default(),
            blocking: Steps::default(),
            health: None,
            pre_stop: None,
        }
    }

    /// Finishes the controller as a shared handle.
    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn on_initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.cooperative.initialize = Some(cooperative(f));
        self
    }

    pub fn on_loop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.cooperative.run_loop = Some(cooperative(f));
        self
    }

    pub fn on_finally<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.cooperative.run_finally = Some(cooperative(f));
        self
    }

    pub fn on_initialize_blocking<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.blocking.initialize = Some(Arc::new(f));
        self
    }

    pub fn on_loop_blocking<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.blocking.run_loop = Some(Arc::new(f));
        self
    }

    pub fn on_finally_blocking<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.blocking.run_finally = Some(Arc::new(f));
        self
    }

    /// Health refinement; plain function, so it is dispatched as a blocking step.
    pub fn on_health<F>(mut self, f: F) -> Self
    where
        F: Fn(HealthReport) -> HealthReport + Send + Sync + 'static,
    {
        self.health = Some(Arc::new(f));
        self
    }

    pub fn on_pre_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.pre_stop = Some(Arc::new(f));
        self
    }

    fn missing(&self, step: &str) -> StepError {
        StepError::fatal(format!("{} has no {step} closure", self.name))
    }

    async fn call(&self, step: Option<&CooperativeStep>, ctx: &StepContext, name: &str) -> Result<(), StepError> {
        match step {
            Some(f) => f(ctx.clone()).await,
            None => Err(self.missing(name)),
        }
    }

    fn call_blocking(&self, step: Option<&BlockingStep>, ctx: &StepContext, name: &str) -> Result<(), StepError> {
        match step {
            Some(f) => f(ctx),
            None => Err(self.missing(name)),
        }
    }
}

#[async_trait]
impl Controller for ControllerFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            cooperative: self.cooperative.as_set(),
            blocking: StepSet {
                health: self.health.is_some(),
                ..self.blocking.as_set()
            },
        }
    }

    async fn initialize(&self, ctx: &StepContext) -> Result<(), StepError> {
        self.call(self.cooperative.initialize.as_ref(), ctx, "initialize").await
    }

    async fn run_loop(&self, ctx: &StepContext) -> Result<(), StepError> {
        self.call(self.cooperative.run_loop.as_ref(), ctx, "run_loop").await
    }

    async fn run_finally(&self, ctx: &StepContext) -> Result<(), StepError> {
        match &self.cooperative.run_finally {
            Some(f) => f(ctx.clone()).await,
            None => Ok(()),
        }
    }

    fn initialize_blocking(&self, ctx: &StepContext) -> Result<(), StepError> {
        self.call_blocking(self.blocking.initialize.as_ref(), ctx, "initialize")
    }

    fn run_loop_blocking(&self, ctx: &StepContext) -> Result<(), StepError> {
        self.call_blocking(self.blocking.run_loop.as_ref(), ctx, "run_loop")
    }

    fn run_finally_blocking(&self, ctx: &StepContext) -> Result<(), StepError> {
        match &self.blocking.run_finally {
            Some(f) => f(ctx),
            None => Ok(()),
        }
    }

    fn health_check_blocking(&self, report: HealthReport) -> HealthReport {
        match &self.health {
            Some(f) => f(report),
            None => report,
        }
    }

    fn pre_stop(&self) {
        if let Some(f) = &self.pre_stop {
            f();
        }
    }
}

impl std::fmt::Debug for ControllerFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerFn")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
