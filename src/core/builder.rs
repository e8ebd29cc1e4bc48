use std::sync::Arc;

use super::{config::Config, supervisor::Supervisor};
use crate::metrics::MetricsSink;
use crate::subscribers::{MetricsSubscriber, Subscribe};

/// Builder for a [`Supervisor`].
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl SupervisorBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            metrics: None,
        }
    }

    /// Event subscribers; each gets its own worker and bounded queue while the supervisor runs.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Metrics sink: fed with lifecycle metrics and handed to every controller's step context.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Builds the supervisor. Needs no running scheduler; workers start in `run()`.
    pub fn build(self) -> Arc<Supervisor> {
        let mut subscribers = self.subscribers;
        if let Some(sink) = &self.metrics {
            subscribers.push(Arc::new(MetricsSubscriber::new(Arc::clone(sink))));
        }
        Arc::new(Supervisor::new_internal(self.cfg, subscribers, self.metrics))
    }
}
