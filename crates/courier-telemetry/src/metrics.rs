//! Prometheus-backed metrics collector.
//!
//! Metric names are sanitized with every character outside `[A-Za-z0-9_:]`
//! mapped to `_`.
//!
//! ## Metric Types
//!
//! - **Counter** (`increment`/`decrement`): statsd counters are deltas, so
//!   they are exported as a gauge `<name>` that moves up and down
//! - **Histogram**: `<name>` with exponential buckets
//! - **Gauge**: `<name>`
//!
//! Every series is labelled by the five exchange tag keys. A key missing
//! from the call's tags is exported as an empty label. Prometheus has no
//! client-side sampling, so the sample rate is ignored.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    exponential_buckets, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use tracing::warn;

use crate::collector::MetricsCollector;
use crate::tags::TagKey;
use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    static ref LABELS: Vec<&'static str> = TagKey::ALL.iter().map(TagKey::as_str).collect();
}

/// Collector that exports to a prometheus `Registry`.
pub struct PrometheusCollector {
    registry: Registry,
    counters: Mutex<HashMap<String, GaugeVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
}

impl PrometheusCollector {
    /// Collector with its own registry.
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Collector exporting to the process-wide [`REGISTRY`].
    pub fn global() -> Self {
        Self::with_registry(REGISTRY.clone())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode this collector's registry as Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        encode_registry(&self.registry)
    }

    fn counter(&self, metric: &str) -> Option<GaugeVec> {
        self.gauge_in(&self.counters, metric)
    }

    fn gauge_vec(&self, metric: &str) -> Option<GaugeVec> {
        self.gauge_in(&self.gauges, metric)
    }

    fn gauge_in(&self, map: &Mutex<HashMap<String, GaugeVec>>, metric: &str) -> Option<GaugeVec> {
        let name = sanitize(metric);
        let mut gauges = map.lock();
        if let Some(vec) = gauges.get(&name) {
            return Some(vec.clone());
        }
        let vec = GaugeVec::new(Opts::new(name.clone(), help(metric)), LABELS.as_slice())
            .map_err(|e| warn!(metric, error = %e, "Gauge creation failed"))
            .ok()?;
        self.register(metric, Box::new(vec.clone()));
        gauges.insert(name, vec.clone());
        Some(vec)
    }

    fn histogram_vec(&self, metric: &str) -> Option<HistogramVec> {
        let name = sanitize(metric);
        let mut histograms = self.histograms.lock();
        if let Some(vec) = histograms.get(&name) {
            return Some(vec.clone());
        }
        let mut opts = HistogramOpts::new(name.clone(), help(metric));
        if let Ok(buckets) = exponential_buckets(0.5, 2.0, 16) {
            opts = opts.buckets(buckets);
        }
        let vec = HistogramVec::new(opts, LABELS.as_slice())
            .map_err(|e| warn!(metric, error = %e, "Histogram creation failed"))
            .ok()?;
        self.register(metric, Box::new(vec.clone()));
        histograms.insert(name, vec.clone());
        Some(vec)
    }

    fn register(&self, metric: &str, collector: Box<dyn prometheus::core::Collector>) {
        // Series still update locally when registration collides.
        if let Err(e) = self.registry.register(collector) {
            warn!(metric, error = %e, "Metric registration failed");
        }
    }
}

impl Default for PrometheusCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PrometheusCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusCollector")
            .field("counters", &self.counters.lock().len())
            .field("histograms", &self.histograms.lock().len())
            .field("gauges", &self.gauges.lock().len())
            .finish()
    }
}

impl MetricsCollector for PrometheusCollector {
    fn increment(&self, metric: &str, _sample_rate: f64, tags: &[String]) {
        let values = label_values(tags);
        let labels: Vec<&str> = values.iter().map(String::as_str).collect();
        if let Some(vec) = self.counter(metric) {
            vec.with_label_values(&labels).inc();
        }
    }

    fn decrement(&self, metric: &str, _sample_rate: f64, tags: &[String]) {
        let values = label_values(tags);
        let labels: Vec<&str> = values.iter().map(String::as_str).collect();
        if let Some(vec) = self.counter(metric) {
            vec.with_label_values(&labels).dec();
        }
    }

    fn histogram(&self, metric: &str, value: f64, _sample_rate: f64, tags: &[String]) {
        let values = label_values(tags);
        let labels: Vec<&str> = values.iter().map(String::as_str).collect();
        if let Some(vec) = self.histogram_vec(metric) {
            vec.with_label_values(&labels).observe(value);
        }
    }

    fn gauge(&self, metric: &str, value: f64, _sample_rate: f64, tags: &[String]) {
        let values = label_values(tags);
        let labels: Vec<&str> = values.iter().map(String::as_str).collect();
        if let Some(vec) = self.gauge_vec(metric) {
            vec.with_label_values(&labels).set(value);
        }
    }
}

/// Encode all metrics in the global registry as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    encode_registry(&REGISTRY)
}

fn encode_registry(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

fn sanitize(metric: &str) -> String {
    metric
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

fn help(metric: &str) -> String {
    format!("Exchange metric {metric}")
}

/// Label values in `TagKey::ALL` order.
fn label_values(tags: &[String]) -> Vec<String> {
    TagKey::ALL
        .iter()
        .map(|key| key.find(tags).unwrap_or_default().to_string())
        .collect()
}
