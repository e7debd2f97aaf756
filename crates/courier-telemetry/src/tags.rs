//! Exchange metric tags and their validation.
//!
//! Tags are `key:value` strings. Only the keys relevant to an exchange's
//! direction are emitted: publish exchanges carry the publish keys, delivery
//! exchanges carry the delivery keys.

use courier_pipeline::{headers, Direction, MessageExchange};
use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::collector::MetricsCollector;

/// The recognized tag keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKey {
    DeliveryEndpoint,
    DeliveryLabel,
    DeliveryExchange,
    PublishEndpoint,
    PublishLabel,
}

impl TagKey {
    pub const ALL: [TagKey; 5] = [
        TagKey::DeliveryEndpoint,
        TagKey::DeliveryLabel,
        TagKey::DeliveryExchange,
        TagKey::PublishEndpoint,
        TagKey::PublishLabel,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            TagKey::DeliveryEndpoint => "deliveryEndpoint",
            TagKey::DeliveryLabel => "deliveryLabel",
            TagKey::DeliveryExchange => "deliveryExchange",
            TagKey::PublishEndpoint => "publishEndpoint",
            TagKey::PublishLabel => "publishLabel",
        }
    }

    /// Render a `key:value` tag.
    pub fn tag(&self, value: &str) -> String {
        format!("{}:{}", self.as_str(), value)
    }

    /// Value of this key in `tags`; `None` when absent.
    pub fn find<'a>(&self, tags: &'a [String]) -> Option<&'a str> {
        tags.iter().find_map(|tag| match tag.split_once(':') {
            Some((key, value)) if key == self.as_str() => Some(value),
            _ => None,
        })
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the tag list for one exchange as seen by one endpoint.
pub struct ExchangeTags;

impl ExchangeTags {
    /// Tags for `exchange` processed by `endpoint`.
    ///
    /// Publish: `publishEndpoint`, `publishLabel`.
    /// Deliver: `deliveryEndpoint`, `deliveryLabel`, `deliveryExchange`
    /// (from the `x-delivery-exchange` header stamped by the broker).
    /// A value that cannot be determined is left out rather than emitted empty.
    pub fn for_exchange(endpoint: &str, exchange: &MessageExchange) -> Vec<String> {
        let mut tags = Vec::with_capacity(3);
        match exchange.direction() {
            Direction::Publish => {
                tags.push(TagKey::PublishEndpoint.tag(endpoint));
                if let Some(label) = exchange.label().filter(|l| !l.is_empty()) {
                    tags.push(TagKey::PublishLabel.tag(label.as_str()));
                }
            }
            Direction::Deliver => {
                tags.push(TagKey::DeliveryEndpoint.tag(endpoint));
                if let Some(label) = exchange.label().filter(|l| !l.is_empty()) {
                    tags.push(TagKey::DeliveryLabel.tag(label.as_str()));
                }
                let delivery_exchange = exchange
                    .incoming()
                    .and_then(|message| message.header(headers::DELIVERY_EXCHANGE))
                    .filter(|value| !value.is_empty());
                if let Some(value) = delivery_exchange {
                    tags.push(TagKey::DeliveryExchange.tag(value));
                }
            }
        }
        tags
    }
}

/// A tag list that breaks the expectations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagViolation {
    #[error("tag {key} missing, expected {expected:?}")]
    Missing { key: TagKey, expected: String },

    #[error("tag {key} present but empty, expected {expected:?}")]
    Empty { key: TagKey, expected: String },

    #[error("tag {key} is {actual:?}, expected {expected:?}")]
    Mismatch {
        key: TagKey,
        expected: String,
        actual: String,
    },

    #[error("tag {key} should be absent or empty, got {actual:?}")]
    Unexpected { key: TagKey, actual: String },
}

/// Expected value per tag key. Keys without an expectation must be absent
/// or empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagExpectations {
    delivery_endpoint: Option<String>,
    delivery_label: Option<String>,
    delivery_exchange: Option<String>,
    publish_endpoint: Option<String>,
    publish_label: Option<String>,
}

impl TagExpectations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expectations for a producer's publish side.
    pub fn publish(endpoint: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new()
            .require(TagKey::PublishEndpoint, endpoint)
            .require(TagKey::PublishLabel, label)
    }

    /// Expectations for a consumer's delivery side.
    pub fn delivery(
        endpoint: impl Into<String>,
        label: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self::new()
            .require(TagKey::DeliveryEndpoint, endpoint)
            .require(TagKey::DeliveryLabel, label)
            .require(TagKey::DeliveryExchange, exchange)
    }

    #[must_use]
    pub fn require(mut self, key: TagKey, value: impl Into<String>) -> Self {
        *self.slot(key) = Some(value.into());
        self
    }

    pub fn expected(&self, key: TagKey) -> Option<&str> {
        match key {
            TagKey::DeliveryEndpoint => self.delivery_endpoint.as_deref(),
            TagKey::DeliveryLabel => self.delivery_label.as_deref(),
            TagKey::DeliveryExchange => self.delivery_exchange.as_deref(),
            TagKey::PublishEndpoint => self.publish_endpoint.as_deref(),
            TagKey::PublishLabel => self.publish_label.as_deref(),
        }
    }

    /// Check `tags` against the expectations, reporting the first violation
    /// in `TagKey::ALL` order.
    pub fn check(&self, tags: &[String]) -> Result<(), TagViolation> {
        for key in TagKey::ALL {
            let actual = key.find(tags);
            match (self.expected(key), actual) {
                (Some(expected), None) => {
                    return Err(TagViolation::Missing {
                        key,
                        expected: expected.to_string(),
                    })
                }
                (Some(expected), Some("")) => {
                    return Err(TagViolation::Empty {
                        key,
                        expected: expected.to_string(),
                    })
                }
                (Some(expected), Some(actual)) if actual != expected => {
                    return Err(TagViolation::Mismatch {
                        key,
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    })
                }
                (None, Some(actual)) if !actual.is_empty() => {
                    return Err(TagViolation::Unexpected {
                        key,
                        actual: actual.to_string(),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn slot(&mut self, key: TagKey) -> &mut Option<String> {
        match key {
            TagKey::DeliveryEndpoint => &mut self.delivery_endpoint,
            TagKey::DeliveryLabel => &mut self.delivery_label,
            TagKey::DeliveryExchange => &mut self.delivery_exchange,
            TagKey::PublishEndpoint => &mut self.publish_endpoint,
            TagKey::PublishLabel => &mut self.publish_label,
        }
    }
}

/// Collector that validates the tags of every call it receives.
#[derive(Debug)]
pub struct TagCheckingCollector {
    expectations: TagExpectations,
    calls: Mutex<usize>,
    violations: Mutex<Vec<(String, TagViolation)>>,
}

impl TagCheckingCollector {
    pub fn new(expectations: TagExpectations) -> Self {
        Self {
            expectations,
            calls: Mutex::new(0),
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Number of collector calls checked so far.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    /// Every violation seen, with the metric name that carried it.
    pub fn violations(&self) -> Vec<(String, TagViolation)> {
        self.violations.lock().clone()
    }

    /// `Ok(calls)` if no call broke the expectations, else the first violation.
    pub fn verify(&self) -> Result<usize, TagViolation> {
        match self.violations.lock().first() {
            Some((_, violation)) => Err(violation.clone()),
            None => Ok(self.calls()),
        }
    }

    fn check(&self, metric: &str, tags: &[String]) {
        *self.calls.lock() += 1;
        if let Err(violation) = self.expectations.check(tags) {
            warn!(metric, %violation, "Metric tags broke expectations");
            self.violations.lock().push((metric.to_string(), violation));
        }
    }
}

impl MetricsCollector for TagCheckingCollector {
    fn increment(&self, metric: &str, _sample_rate: f64, tags: &[String]) {
        self.check(metric, tags);
    }

    fn decrement(&self, metric: &str, _sample_rate: f64, tags: &[String]) {
        self.check(metric, tags);
    }

    fn histogram(&self, metric: &str, _value: f64, _sample_rate: f64, tags: &[String]) {
        self.check(metric, tags);
    }

    fn gauge(&self, metric: &str, _value: f64, _sample_rate: f64, tags: &[String]) {
        self.check(metric, tags);
    }
}
