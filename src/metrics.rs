//! # Metrics sink.
//!
//! The runtime only needs somewhere to put `(name, labels, value)` triples;
//! storage and exposition belong to whoever implements [`MetricsSink`].
//! [`PrometheusMetrics`] ships one backed by a [`prometheus::Registry`].
//!
//! There is no global registry: build one at startup, hand it to the
//! supervisor builder (and to controllers through their [`StepContext`]).
//!
//! ```text
//! increment/gauge(name, labels)
//!   ├─ first use of name ─► IntCounterVec/GaugeVec over the sorted label keys, registered
//!   ├─ same label keys   ─► child.inc_by / child.set
//!   └─ other label keys  ─► warn, sample dropped
//!
//! counter/gauge_value/snapshot ─► registry.gather()
//! ```
//!
//! [`StepContext`]: crate::StepContext

use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Label set, as `(key, value)` pairs.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Receiver of counters and gauges.
pub trait MetricsSink: Send + Sync + 'static {
    /// Adds `by` to a counter.
    fn increment(&self, name: &str, labels: Labels<'_>, by: u64);

    /// Sets a gauge.
    fn gauge(&self, name: &str, labels: Labels<'_>, value: f64);
}

/// Counter/gauge identity: name plus labels sorted by key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new(name: &str, labels: Labels<'_>) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.labels.iter().map(|(k, _)| k.as_str()).collect()
    }

    fn values(&self) -> Vec<&str> {
        self.labels.iter().map(|(_, v)| v.as_str()).collect()
    }
}

/// One recorded value.
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    Counter(MetricKey, u64),
    Gauge(MetricKey, f64),
}

/// A registered vec and the label keys it was created with.
struct Family<V> {
    keys: Vec<String>,
    vec: V,
}

/// [`MetricsSink`] writing into a Prometheus registry.
///
/// Counters become `IntCounterVec`s and gauges `GaugeVec`s, created the first
/// time a name is seen. A name keeps the label keys of its first sample.
pub struct PrometheusMetrics {
    registry: Registry,
    counters: Mutex<HashMap<String, Family<IntCounterVec>>>,
    gauges: Mutex<HashMap<String, Family<GaugeVec>>>,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics")
            .field("counters", &lock(&self.counters).len())
            .field("gauges", &lock(&self.gauges).len())
            .finish()
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    /// Sink over a fresh, private registry.
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Sink registering into `registry`, e.g. one shared with an HTTP exporter.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of everything in the registry.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Current counter value (0 if never incremented).
    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        let key = MetricKey::new(name, labels);
        self.samples(MetricType::COUNTER)
            .into_iter()
            .find_map(|s| match s {
                Sample::Counter(k, v) if k == key => Some(v),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str, labels: Labels<'_>) -> Option<f64> {
        let key = MetricKey::new(name, labels);
        self.samples(MetricType::GAUGE).into_iter().find_map(|s| match s {
            Sample::Gauge(k, v) if k == key => Some(v),
            _ => None,
        })
    }

    /// Every counter, then every gauge, each sorted by key.
    pub fn snapshot(&self) -> Vec<Sample> {
        let mut counters = self.samples(MetricType::COUNTER);
        let mut gauges = self.samples(MetricType::GAUGE);
        counters.sort_by(|a, b| sample_key(a).cmp(sample_key(b)));
        gauges.sort_by(|a, b| sample_key(a).cmp(sample_key(b)));
        counters.extend(gauges);
        counters
    }

    fn samples(&self, kind: MetricType) -> Vec<Sample> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_field_type() == kind)
            .flat_map(|family| family_samples(family, kind))
            .collect()
    }
}

fn family_samples(family: &MetricFamily, kind: MetricType) -> Vec<Sample> {
    family
        .get_metric()
        .iter()
        .map(|m| {
            let labels: Vec<(&str, &str)> = m
                .get_label()
                .iter()
                .map(|l| (l.get_name(), l.get_value()))
                .collect();
            let key = MetricKey::new(family.get_name(), &labels);
            match kind {
                MetricType::GAUGE => Sample::Gauge(key, m.get_gauge().get_value()),
                _ => Sample::Counter(key, m.get_counter().get_value() as u64),
            }
        })
        .collect()
}

fn sample_key(s: &Sample) -> &MetricKey {
    match s {
        Sample::Counter(k, _) | Sample::Gauge(k, _) => k,
    }
}

impl MetricsSink for PrometheusMetrics {
    fn increment(&self, name: &str, labels: Labels<'_>, by: u64) {
        let key = MetricKey::new(name, labels);
        let mut counters = lock(&self.counters);
        let res = family(&self.registry, &mut counters, &key, |opts, keys| {
            IntCounterVec::new(opts, keys)
        })
        .and_then(|f| f.vec.get_metric_with_label_values(&key.values()));
        match res {
            Ok(counter) => counter.inc_by(by),
            Err(e) => tracing::warn!(metric = name, error = %e, "counter sample dropped"),
        }
    }

    fn gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        let key = MetricKey::new(name, labels);
        let mut gauges = lock(&self.gauges);
        let res = family(&self.registry, &mut gauges, &key, |opts, keys| {
            GaugeVec::new(opts, keys)
        })
        .and_then(|f| f.vec.get_metric_with_label_values(&key.values()));
        match res {
            Ok(gauge) => gauge.set(value),
            Err(e) => tracing::warn!(metric = name, error = %e, "gauge sample dropped"),
        }
    }
}

/// Looks up the vec for `key.name`, creating and registering it on first use.
fn family<'a, V>(
    registry: &Registry,
    families: &'a mut HashMap<String, Family<V>>,
    key: &MetricKey,
    build: impl FnOnce(Opts, &[&str]) -> prometheus::Result<V>,
) -> prometheus::Result<&'a Family<V>>
where
    V: prometheus::core::Collector + Clone + 'static,
{
    let keys = key.keys();
    if !families.contains_key(&key.name) {
        let vec = build(Opts::new(key.name.as_str(), key.name.as_str()), &keys)?;
        registry.register(Box::new(vec.clone()))?;
        families.insert(
            key.name.clone(),
            Family {
                keys: keys.iter().map(|k| (*k).to_string()).collect(),
                vec,
            },
        );
    }
    let family = families
        .get(&key.name)
        .ok_or_else(|| prometheus::Error::Msg(format!("metric {} vanished", key.name)))?;
    if family.keys.iter().map(String::as_str).ne(keys.iter().copied()) {
        return Err(prometheus::Error::Msg(format!(
            "metric {} uses labels {:?}, got {:?}",
            key.name, family.keys, keys
        )));
    }
    Ok(family)
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_matter() {
        let m = PrometheusMetrics::new();
        m.increment("sensor_readings_total", &[("sensor", "t1"), ("kind", "temp")], 1);
        m.increment("sensor_readings_total", &[("kind", "temp"), ("sensor", "t1")], 2);
        assert_eq!(
            m.counter("sensor_readings_total", &[("sensor", "t1"), ("kind", "temp")]),
            3
        );
        assert_eq!(m.counter("sensor_readings_total", &[("sensor", "t2")]), 0);
    }

    #[test]
    fn gauges_keep_last_value() {
        let m = PrometheusMetrics::new();
        m.gauge("output_state", &[("output", "pump")], 1.0);
        m.gauge("output_state", &[("output", "pump")], 0.0);
        assert_eq!(m.gauge_value("output_state", &[("output", "pump")]), Some(0.0));
        assert_eq!(m.snapshot().len(), 1);
    }

    #[test]
    fn samples_land_in_the_registry_passed_in() {
        let registry = Registry::new();
        let m = PrometheusMetrics::with_registry(registry.clone());
        m.increment("controller_iterations_total", &[("controller", "fan")], 4);
        m.gauge("controller_running", &[("controller", "fan")], 1.0);

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(names, vec!["controller_iterations_total", "controller_running"]);
        assert_eq!(
            m.snapshot(),
            vec![
                Sample::Counter(
                    MetricKey::new("controller_iterations_total", &[("controller", "fan")]),
                    4
                ),
                Sample::Gauge(MetricKey::new("controller_running", &[("controller", "fan")]), 1.0),
            ]
        );
    }

    #[test]
    fn mismatched_label_keys_are_dropped() {
        let m = PrometheusMetrics::new();
        m.increment("relay_switches_total", &[("relay", "r1")], 1);
        m.increment("relay_switches_total", &[("pin", "7")], 5);
        m.increment("relay_switches_total", &[("relay", "r1"), ("pin", "7")], 5);

        assert_eq!(m.counter("relay_switches_total", &[("relay", "r1")]), 1);
        assert_eq!(m.counter("relay_switches_total", &[("pin", "7")]), 0);
        assert_eq!(m.snapshot().len(), 1);
    }

    #[test]
    fn reads_do_not_create_series() {
        let m = PrometheusMetrics::new();
        m.gauge("output_state", &[("output", "pump")], 1.0);
        assert_eq!(m.gauge_value("output_state", &[("output", "valve")]), None);
        assert_eq!(m.snapshot().len(), 1);
    }

    #[test]
    fn text_exposition_lists_samples() {
        let m = PrometheusMetrics::new();
        m.increment("controller_init_attempts_failed_total", &[("controller", "hygrometer")], 2);
        let text = m.encode_text().unwrap();
        assert!(text.contains("# TYPE controller_init_attempts_failed_total counter"));
        assert!(text.contains(r#"controller_init_attempts_failed_total{controller="hygrometer"} 2"#));
    }
}
