//! # Identity and per-step context handed to controller steps.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::core::state::Shared;
use crate::events::{Event, EventKind};
use crate::metrics::MetricsSink;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique controller identity, rendered as `ctl-<n>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ControllerId(u64);

impl ControllerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctl-{}", self.0)
    }
}

/// What a step can see of its own lifecycle.
///
/// Cheap to clone; blocking steps receive a clone on the worker thread.
#[derive(Clone)]
pub struct StepContext {
    id: ControllerId,
    name: Arc<str>,
    shared: Arc<Shared>,
    token: CancellationToken,
    metrics: Option<Arc<dyn MetricsSink>>,
    span: Span,
}

impl StepContext {
    pub(crate) fn new(
        id: ControllerId,
        name: Arc<str>,
        shared: Arc<Shared>,
        token: CancellationToken,
        metrics: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        let span = tracing::info_span!("controller", controller = %name, id = %id);
        Self {
            id,
            name,
            shared,
            token,
            metrics,
            span,
        }
    }

    /// Same context, different cancellation scope (used for bounded steps).
    pub(crate) fn scoped(&self, token: CancellationToken) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event of `kind` tagged with this controller's name and id.
    pub(crate) fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_controller(Arc::clone(&self.name))
            .with_id(self.id)
    }

    /// Current value of the running flag.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Clears the running flag: the loop exits after the current iteration.
    pub fn stop(&self) {
        if self.shared.note_stop_request() {
            tracing::info!(parent: &self.span, "stop requested from loop step");
        }
        self.shared.set_running(false);
    }

    /// `true` once a stop was requested or the step's budget ran out.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when [`is_cancelled`](Self::is_cancelled) becomes true.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Metrics collector passed to the supervisor, if any.
    pub fn metrics(&self) -> Option<&Arc<dyn MetricsSink>> {
        self.metrics.as_ref()
    }

    /// Span carrying `controller` and `id`; every lifecycle log line is inside it.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> StepContext {
        StepContext::new(
            ControllerId::next(),
            Arc::from("fan"),
            Arc::new(Shared::new()),
            CancellationToken::new(),
            None,
        )
    }

    #[test]
    fn ids_are_unique_and_displayed_with_prefix() {
        let a = ControllerId::next();
        let b = ControllerId::next();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), format!("ctl-{}", a.get()));
    }

    #[test]
    fn stop_from_step_clears_running_flag() {
        let ctx = context();
        ctx.shared().set_running(true);
        assert!(ctx.is_running());

        ctx.stop();
        assert!(!ctx.is_running());
        assert!(ctx.shared().stop_requested_at().is_some());
        // the cancellation scope is independent of the running flag
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn scoped_context_shares_flags_but_not_token() {
        let ctx = context();
        let child = ctx.token().child_token();
        let scoped = ctx.scoped(child.clone());
        child.cancel();

        assert!(scoped.is_cancelled());
        assert!(!ctx.is_cancelled());
        scoped.shared().set_running(true);
        assert!(ctx.is_running());
    }
}
