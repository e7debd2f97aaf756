//! Metrics collector abstraction.
//!
//! Collectors receive statsd-style calls: a metric name, a sample rate and
//! a list of `key:value` tags. The exchange metrics decorator talks only to
//! this trait; the backing store is pluggable.

use parking_lot::Mutex;
use std::sync::Arc;

/// Sample rate used when every call should be recorded.
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;

/// Sink for exchange metrics.
pub trait MetricsCollector: Send + Sync {
    /// Add one to a counter.
    fn increment(&self, metric: &str, sample_rate: f64, tags: &[String]);

    /// Subtract one from a counter.
    fn decrement(&self, metric: &str, sample_rate: f64, tags: &[String]);

    /// Record one observation in a distribution.
    fn histogram(&self, metric: &str, value: f64, sample_rate: f64, tags: &[String]);

    /// Set an instantaneous value.
    fn gauge(&self, metric: &str, value: f64, sample_rate: f64, tags: &[String]);
}

impl<C: MetricsCollector + ?Sized> MetricsCollector for Arc<C> {
    fn increment(&self, metric: &str, sample_rate: f64, tags: &[String]) {
        (**self).increment(metric, sample_rate, tags);
    }

    fn decrement(&self, metric: &str, sample_rate: f64, tags: &[String]) {
        (**self).decrement(metric, sample_rate, tags);
    }

    fn histogram(&self, metric: &str, value: f64, sample_rate: f64, tags: &[String]) {
        (**self).histogram(metric, value, sample_rate, tags);
    }

    fn gauge(&self, metric: &str, value: f64, sample_rate: f64, tags: &[String]) {
        (**self).gauge(metric, value, sample_rate, tags);
    }
}

/// Which collector call produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Increment,
    Decrement,
    Histogram,
    Gauge,
}

/// One recorded collector call.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub kind: MetricKind,
    pub name: String,
    /// `None` for increment and decrement
    pub value: Option<f64>,
    pub sample_rate: f64,
    pub tags: Vec<String>,
}

impl MetricSample {
    /// Value of the tag with `key`, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find_map(|tag| match tag.split_once(':') {
            Some((k, v)) if k == key => Some(v),
            _ => None,
        })
    }
}

/// In-memory collector that keeps every call, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingCollector {
    samples: Mutex<Vec<MetricSample>>,
}

impl RecordingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded calls, in call order.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    /// Recorded calls for one metric name.
    pub fn samples_named(&self, name: &str) -> Vec<MetricSample> {
        self.samples
            .lock()
            .iter()
            .filter(|sample| sample.name == name)
            .cloned()
            .collect()
    }

    /// Net counter value for `name` (increments minus decrements).
    pub fn counter(&self, name: &str) -> i64 {
        self.samples
            .lock()
            .iter()
            .filter(|sample| sample.name == name)
            .map(|sample| match sample.kind {
                MetricKind::Increment => 1,
                MetricKind::Decrement => -1,
                _ => 0,
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    fn record(
        &self,
        kind: MetricKind,
        metric: &str,
        value: Option<f64>,
        sample_rate: f64,
        tags: &[String],
    ) {
        self.samples.lock().push(MetricSample {
            kind,
            name: metric.to_string(),
            value,
            sample_rate,
            tags: tags.to_vec(),
        });
    }
}

impl MetricsCollector for RecordingCollector {
    fn increment(&self, metric: &str, sample_rate: f64, tags: &[String]) {
        self.record(MetricKind::Increment, metric, None, sample_rate, tags);
    }

    fn decrement(&self, metric: &str, sample_rate: f64, tags: &[String]) {
        self.record(MetricKind::Decrement, metric, None, sample_rate, tags);
    }

    fn histogram(&self, metric: &str, value: f64, sample_rate: f64, tags: &[String]) {
        self.record(MetricKind::Histogram, metric, Some(value), sample_rate, tags);
    }

    fn gauge(&self, metric: &str, value: f64, sample_rate: f64, tags: &[String]) {
        self.record(MetricKind::Gauge, metric, Some(value), sample_rate, tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Vec<String> {
        vec!["publishEndpoint:producer".to_string(), "publishLabel:dummy.request".to_string()]
    }

    #[test]
    fn test_records_calls_in_order() {
        let collector = RecordingCollector::new();
        collector.increment("courier.exchange.started", DEFAULT_SAMPLE_RATE, &tags());
        collector.histogram("courier.exchange.duration_ms", 4.5, DEFAULT_SAMPLE_RATE, &tags());

        let samples = collector.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].kind, MetricKind::Increment);
        assert_eq!(samples[0].value, None);
        assert_eq!(samples[1].kind, MetricKind::Histogram);
        assert_eq!(samples[1].value, Some(4.5));
        assert_eq!(samples[1].tag("publishLabel"), Some("dummy.request"));
    }

    #[test]
    fn test_counter_nets_decrements() {
        let collector = RecordingCollector::new();
        collector.increment("in_flight", DEFAULT_SAMPLE_RATE, &[]);
        collector.increment("in_flight", DEFAULT_SAMPLE_RATE, &[]);
        collector.decrement("in_flight", DEFAULT_SAMPLE_RATE, &[]);

        assert_eq!(collector.counter("in_flight"), 1);
        assert_eq!(collector.samples_named("in_flight").len(), 3);
        assert_eq!(collector.counter("other"), 0);
    }

    #[test]
    fn test_shared_through_arc() {
        let collector = Arc::new(RecordingCollector::new());
        let as_dyn: Arc<dyn MetricsCollector> = collector.clone();
        as_dyn.gauge("queue_depth", 3.0, 0.5, &[]);

        assert_eq!(collector.len(), 1);
        collector.clear();
        assert!(collector.is_empty());
    }
}
