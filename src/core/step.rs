//! # Run one controller step.
//!
//! Invokes a step in the variant chosen by the [`DispatchTable`], contains
//! panics, applies the optional budget and reports timeouts to the [`Bus`].
//!
//! ## Dispatch
//! ```text
//! Cooperative → controller.step(ctx).await          (panic → StepError::Panicked)
//! Blocking    → offload_blocking(controller.step_blocking(ctx)).await
//!                                                   (panic → JoinError → StepError::Panicked)
//! Absent      → Ok(())                              (only for run_finally)
//! ```
//!
//! ## Budget
//! - Cooperative steps get a child token; at the deadline the token is cancelled
//!   and the step future is dropped.
//! - Blocking steps cannot be dropped: the child token is cancelled and the
//!   step is awaited to completion before the timeout is reported, so the next
//!   step of the same controller never overlaps it.
//!
//! In both cases `StepTimedOut` is published and `StepError::Timeout` returned.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time;
use tracing::Instrument;

use crate::bridge::{TaskHandle, offload_blocking};
use crate::controllers::{ControllerRef, DispatchTable, StepContext, Variant};
use crate::error::{SchedulerError, StepError, panic_message};
use crate::events::{Bus, EventKind};
use crate::ops::{OperationBudget, with_timeout_token};

/// Steps driven by the lifecycle (health checks are dispatched separately).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Initialize,
    Loop,
    Finally,
}

impl Step {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Step::Initialize => "initialize",
            Step::Loop => "run_loop",
            Step::Finally => "run_finally",
        }
    }

    fn variant(self, table: &DispatchTable) -> Variant {
        match self {
            Step::Initialize => table.initialize,
            Step::Loop => table.run_loop,
            Step::Finally => table.run_finally,
        }
    }
}

/// Runs `step` once, bounded by `budget` when given.
pub(crate) async fn run_step(
    controller: &ControllerRef,
    dispatch: &DispatchTable,
    step: Step,
    ctx: &StepContext,
    budget: Option<Duration>,
    bus: &Bus,
) -> Result<(), StepError> {
    let variant = step.variant(dispatch);
    let span = ctx.span().clone();

    let Some(dur) = budget.filter(|d| !d.is_zero()) else {
        return invoke(controller, variant, step, ctx.clone())
            .instrument(span)
            .await;
    };

    let res = match variant {
        Variant::Blocking => bounded_blocking(controller, step, ctx, dur).await,
        _ => with_timeout_token(ctx.token(), OperationBudget::new(dur), |child| {
            invoke(controller, variant, step, ctx.scoped(child))
        })
        .instrument(span.clone())
        .await
        .map_err(|timed_out| Overrun(StepError::from(timed_out))),
    };

    match res {
        Ok(r) => r,
        Err(Overrun(err)) => {
            tracing::warn!(
                parent: &span,
                step = step.as_str(),
                timeout_ms = dur.as_millis() as u64,
                "step exceeded its budget"
            );
            bus.publish(
                ctx.event(EventKind::StepTimedOut)
                    .with_step(step.as_str())
                    .with_timeout(dur),
            );
            Err(err)
        }
    }
}

/// Budget overrun, kept apart from a `Timeout` the step returned itself.
struct Overrun(StepError);

async fn bounded_blocking(
    controller: &ControllerRef,
    step: Step,
    ctx: &StepContext,
    dur: Duration,
) -> Result<Result<(), StepError>, Overrun> {
    let child = ctx.token().child_token();
    let _cancel_on_return = child.clone().drop_guard();

    let mut handle = match offload(controller, step, ctx.scoped(child.clone())) {
        Ok(h) => h,
        Err(e) => return Ok(Err(e)),
    };
    match time::timeout(dur, &mut handle).await {
        Ok(joined) => Ok(joined.unwrap_or_else(|e| Err(joined_to_step(e)))),
        Err(_elapsed) => {
            child.cancel();
            tracing::debug!(step = step.as_str(), "waiting for overrunning blocking step");
            let _ = handle.await;
            Err(Overrun(StepError::Timeout { timeout: dur }))
        }
    }
}

async fn invoke(
    controller: &ControllerRef,
    variant: Variant,
    step: Step,
    ctx: StepContext,
) -> Result<(), StepError> {
    match variant {
        Variant::Cooperative => {
            let fut = match step {
                Step::Initialize => controller.initialize(&ctx),
                Step::Loop => controller.run_loop(&ctx),
                Step::Finally => controller.run_finally(&ctx),
            };
            AssertUnwindSafe(fut).catch_unwind().await.unwrap_or_else(|payload| {
                Err(StepError::Panicked {
                    info: panic_message(payload.as_ref()),
                })
            })
        }
        Variant::Blocking => match offload(controller, step, ctx) {
            Ok(handle) => handle.await.unwrap_or_else(|e| Err(joined_to_step(e))),
            Err(e) => Err(e),
        },
        Variant::Absent => Ok(()),
    }
}

fn offload(
    controller: &ControllerRef,
    step: Step,
    ctx: StepContext,
) -> Result<TaskHandle<Result<(), StepError>>, StepError> {
    let controller = Arc::clone(controller);
    offload_blocking(move || {
        let _entered = ctx.span().enter();
        match step {
            Step::Initialize => controller.initialize_blocking(&ctx),
            Step::Loop => controller.run_loop_blocking(&ctx),
            Step::Finally => controller.run_finally_blocking(&ctx),
        }
    })
    .map_err(|e| StepError::fatal(e.to_string()))
}

fn joined_to_step(err: SchedulerError) -> StepError {
    match err {
        SchedulerError::Join { reason } => StepError::Panicked { info: reason },
        other => StepError::fatal(other.to_string()),
    }
}
