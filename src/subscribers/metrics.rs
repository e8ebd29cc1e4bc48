//! # Events → metrics.
//!
//! [`MetricsSubscriber`] turns lifecycle events into counters and gauges on a
//! [`MetricsSink`]:
//!
//! | event                   | metric                                                        |
//! |-------------------------|---------------------------------------------------------------|
//! | `InitAttemptFailed`     | `controller_init_attempts_failed_total{controller}`           |
//! |                         | `controller_errors_total{component, error_type}`              |
//! | `IterationFailed`       | `controller_iterations_failed_total{controller}` + errors     |
//! | `CleanupFailed`         | `controller_errors_total{component, error_type}`              |
//! | `StepTimedOut`          | `controller_timeouts_total{controller, step}`                 |
//! | `ControllerRunning`     | `controller_running{controller} = 1`                          |
//! | `ControllerStopped`     | `controller_running{controller} = 0`                          |
//! | `InitializationFailed`  | `controller_running{controller} = 0`                          |
//! | `Subscriber*`           | `subscriber_dropped_total{subscriber, reason}`                |
//!
//! `component` is the controller name; `error_type` is the step error label.

use std::sync::Arc;

use async_trait::async_trait;

use super::Subscribe;
use crate::events::{Event, EventKind};
use crate::metrics::MetricsSink;

const UNKNOWN: &str = "unknown";

/// Feeds a [`MetricsSink`] from the event stream.
pub struct MetricsSubscriber {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsSubscriber {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    fn record_error(&self, controller: &str, ev: &Event) {
        self.sink.increment(
            "controller_errors_total",
            &[
                ("component", controller),
                ("error_type", ev.error_kind.unwrap_or(UNKNOWN)),
            ],
            1,
        );
    }

    fn running(&self, controller: &str, value: f64) {
        self.sink
            .gauge("controller_running", &[("controller", controller)], value);
    }
}

#[async_trait]
impl Subscribe for MetricsSubscriber {
    async fn on_event(&self, ev: &Event) {
        let controller = ev.controller.as_deref().unwrap_or(UNKNOWN);
        let by_controller = [("controller", controller)];

        match ev.kind {
            EventKind::InitAttemptFailed => {
                self.sink
                    .increment("controller_init_attempts_failed_total", &by_controller, 1);
                self.record_error(controller, ev);
            }
            EventKind::IterationFailed => {
                self.sink
                    .increment("controller_iterations_failed_total", &by_controller, 1);
                self.record_error(controller, ev);
            }
            EventKind::CleanupFailed => self.record_error(controller, ev),
            EventKind::StepTimedOut => self.sink.increment(
                "controller_timeouts_total",
                &[("controller", controller), ("step", ev.step.unwrap_or(UNKNOWN))],
                1,
            ),
            EventKind::ControllerRunning => self.running(controller, 1.0),
            EventKind::ControllerStopped | EventKind::InitializationFailed => {
                self.running(controller, 0.0)
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => self.sink.increment(
                "subscriber_dropped_total",
                &[("subscriber", controller), ("reason", ev.kind.as_str())],
                1,
            ),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "metrics"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::metrics::PrometheusMetrics;
    use std::time::Duration;

    #[tokio::test]
    async fn failures_and_running_gauge_are_recorded() {
        let metrics = Arc::new(PrometheusMetrics::new());
        let sub = MetricsSubscriber::new(metrics.clone());

        sub.on_event(&Event::new(EventKind::ControllerRunning).with_controller("pid-1"))
            .await;
        for i in 1..=2 {
            sub.on_event(
                &Event::new(EventKind::IterationFailed)
                    .with_controller("pid-1")
                    .with_iteration(i)
                    .with_error(&StepError::transient("no reading")),
            )
            .await;
        }
        sub.on_event(
            &Event::new(EventKind::StepTimedOut)
                .with_controller("pid-1")
                .with_step("run_loop")
                .with_timeout(Duration::from_secs(1)),
        )
        .await;
        sub.on_event(&Event::new(EventKind::ControllerStopped).with_controller("pid-1"))
            .await;

        assert_eq!(
            metrics.counter("controller_iterations_failed_total", &[("controller", "pid-1")]),
            2
        );
        assert_eq!(
            metrics.counter(
                "controller_errors_total",
                &[("component", "pid-1"), ("error_type", "step_transient")]
            ),
            2
        );
        assert_eq!(
            metrics.counter(
                "controller_timeouts_total",
                &[("controller", "pid-1"), ("step", "run_loop")]
            ),
            1
        );
        assert_eq!(
            metrics.gauge_value("controller_running", &[("controller", "pid-1")]),
            Some(0.0)
        );
    }
}
