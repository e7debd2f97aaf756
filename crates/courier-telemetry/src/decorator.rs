//! Exchange metrics decorator.
//!
//! Wraps a filter kind (typically the bus's publish or delivery filter) and
//! reports, per exchange:
//!
//! | Metric | Call | When |
//! |--------|------|------|
//! | `<prefix>.exchange.started` | increment | before the filter runs |
//! | `<prefix>.exchange.in_flight` | increment / decrement | around the filter |
//! | `<prefix>.exchange.duration_ms` | histogram | when the call ends |
//! | `<prefix>.exchange.completed` | increment | settled completed |
//! | `<prefix>.exchange.faulted` | increment | settled faulted |
//! | `<prefix>.exchange.unsettled` | increment | returned `Ok` but still pending |
//! | `<prefix>.exchange.failed` | increment | filter returned `Err` |
//! | `<prefix>.exchange.cancelled` | increment | dropped before settling |
//!
//! The in-flight decrement and the duration are recorded when the guard for
//! the call drops, so a call cut off by a timeout is still accounted for.

use async_trait::async_trait;
use courier_pipeline::{
    Filter, FilterDecorator, FilterInvoker, MessageExchange, PipelineResult,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::collector::{MetricsCollector, DEFAULT_SAMPLE_RATE};
use crate::tags::ExchangeTags;

/// Records exchange metrics around the wrapped filter.
#[derive(Clone)]
pub struct MetricsDecorator {
    endpoint: String,
    prefix: String,
    collector: Arc<dyn MetricsCollector>,
}

impl MetricsDecorator {
    pub fn new(endpoint: impl Into<String>, collector: Arc<dyn MetricsCollector>) -> Self {
        Self {
            endpoint: endpoint.into(),
            prefix: "courier".to_string(),
            collector,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Full metric name for `name`, e.g. `courier.exchange.started`.
    pub fn metric(&self, name: &str) -> String {
        format!("{}.exchange.{}", self.prefix, name)
    }
}

impl std::fmt::Debug for MetricsDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsDecorator")
            .field("endpoint", &self.endpoint)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FilterDecorator for MetricsDecorator {
    async fn process(
        &self,
        filter: &dyn Filter,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange> {
        let exchange_id = exchange.id();
        let tags = ExchangeTags::for_exchange(&self.endpoint, &exchange);
        let mut guard = InFlight::start(self, tags);

        let outcome = filter.process(exchange, invoker).await;

        guard.outcome = Some(match &outcome {
            Ok(settled) if settled.is_faulted() => "faulted",
            Ok(settled) if settled.is_completed() => "completed",
            Ok(_) => "unsettled",
            Err(err) => {
                debug!(
                    endpoint = %self.endpoint,
                    exchange_id = %exchange_id,
                    error = %err,
                    "Exchange failed"
                );
                "failed"
            }
        });

        outcome
    }
}

/// Open in-flight entry for one call. Closing it on drop keeps the gauge
/// balanced when the call is cancelled mid-await.
struct InFlight<'a> {
    decorator: &'a MetricsDecorator,
    tags: Vec<String>,
    started: Instant,
    outcome: Option<&'static str>,
}

impl<'a> InFlight<'a> {
    fn start(decorator: &'a MetricsDecorator, tags: Vec<String>) -> Self {
        let collector = &decorator.collector;
        collector.increment(&decorator.metric("started"), DEFAULT_SAMPLE_RATE, &tags);
        collector.increment(&decorator.metric("in_flight"), DEFAULT_SAMPLE_RATE, &tags);
        Self {
            decorator,
            tags,
            started: Instant::now(),
            outcome: None,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let decorator = self.decorator;
        let collector = &decorator.collector;
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;

        collector.decrement(&decorator.metric("in_flight"), DEFAULT_SAMPLE_RATE, &self.tags);
        collector.histogram(
            &decorator.metric("duration_ms"),
            elapsed_ms,
            DEFAULT_SAMPLE_RATE,
            &self.tags,
        );

        let outcome = self.outcome.unwrap_or_else(|| {
            debug!(endpoint = %decorator.endpoint, "Exchange cancelled before settling");
            "cancelled"
        });
        collector.increment(&decorator.metric(outcome), DEFAULT_SAMPLE_RATE, &self.tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::RecordingCollector;
    use crate::tags::{TagCheckingCollector, TagExpectations};
    use courier_pipeline::{
        headers, terminal_fn, FaultReason, FilterKind, Message, PassThrough, Pipeline,
        PipelineError,
    };
    use serde_json::json;
    use std::time::Duration;

    const SEND: FilterKind = FilterKind::new("send");

    fn pipeline(collector: Arc<dyn MetricsCollector>, fault: bool) -> Pipeline {
        Pipeline::builder()
            .filter(SEND, PassThrough)
            .decorate(SEND, MetricsDecorator::new("producer", collector))
            .build(terminal_fn(move |mut exchange: MessageExchange| async move {
                if fault {
                    exchange.fault(FaultReason::Rejected("no route".to_string()));
                } else {
                    exchange.complete();
                }
                Ok::<_, PipelineError>(exchange)
            }))
    }

    fn request() -> MessageExchange {
        MessageExchange::request(Message::new("dummy.request", json!({ "num": 13 })))
    }

    #[tokio::test]
    async fn test_completed_exchange_metrics() {
        let collector = Arc::new(RecordingCollector::new());
        let settled = pipeline(collector.clone(), false)
            .process(request())
            .await
            .unwrap();

        assert!(settled.is_completed());
        assert_eq!(collector.counter("courier.exchange.started"), 1);
        assert_eq!(collector.counter("courier.exchange.in_flight"), 0);
        assert_eq!(collector.counter("courier.exchange.completed"), 1);
        assert_eq!(collector.counter("courier.exchange.faulted"), 0);

        let durations = collector.samples_named("courier.exchange.duration_ms");
        assert_eq!(durations.len(), 1);
        assert!(durations[0].value.unwrap() >= 0.0);
        assert_eq!(durations[0].tag("publishEndpoint"), Some("producer"));
        assert_eq!(durations[0].tag("publishLabel"), Some("dummy.request"));
    }

    #[tokio::test]
    async fn test_faulted_exchange_metrics() {
        let collector = Arc::new(RecordingCollector::new());
        let settled = pipeline(collector.clone(), true)
            .process(request())
            .await
            .unwrap();

        assert!(settled.is_faulted());
        assert_eq!(collector.counter("courier.exchange.faulted"), 1);
        assert_eq!(collector.counter("courier.exchange.completed"), 0);
    }

    #[tokio::test]
    async fn test_error_counted_and_returned_unchanged() {
        let collector = Arc::new(RecordingCollector::new());
        let pipeline = Pipeline::builder()
            .filter(SEND, PassThrough)
            .decorate(
                SEND,
                MetricsDecorator::new("producer", collector.clone()).with_prefix("bus"),
            )
            .build(terminal_fn(|_exchange: MessageExchange| async move {
                Err::<MessageExchange, _>(PipelineError::terminal("broker closed"))
            }));

        let err = pipeline.process(request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Terminal { .. }));
        assert_eq!(collector.counter("bus.exchange.failed"), 1);
        assert_eq!(collector.counter("bus.exchange.in_flight"), 0);
    }

    #[tokio::test]
    async fn test_pending_exchange_not_counted_completed() {
        let collector = Arc::new(RecordingCollector::new());
        let pipeline = Pipeline::builder()
            .filter(SEND, PassThrough)
            .decorate(SEND, MetricsDecorator::new("producer", collector.clone()))
            .build(PassThrough);

        let settled = pipeline.process(request()).await.unwrap();

        assert!(!settled.is_settled());
        assert_eq!(collector.counter("courier.exchange.unsettled"), 1);
        assert_eq!(collector.counter("courier.exchange.completed"), 0);
        assert_eq!(collector.counter("courier.exchange.in_flight"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_exchange_leaves_nothing_in_flight() {
        let collector = Arc::new(RecordingCollector::new());
        let pipeline = Pipeline::builder()
            .filter(SEND, PassThrough)
            .decorate(SEND, MetricsDecorator::new("producer", collector.clone()))
            .build(terminal_fn(|exchange: MessageExchange| async move {
                std::future::pending::<()>().await;
                Ok::<_, PipelineError>(exchange)
            }));

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), pipeline.process(request())).await;

        assert!(outcome.is_err());
        assert_eq!(collector.counter("courier.exchange.started"), 1);
        assert_eq!(collector.counter("courier.exchange.in_flight"), 0);
        assert_eq!(collector.counter("courier.exchange.cancelled"), 1);
        assert_eq!(collector.counter("courier.exchange.completed"), 0);
        assert_eq!(collector.samples_named("courier.exchange.duration_ms").len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_tags_pass_validation() {
        let checker = Arc::new(TagCheckingCollector::new(TagExpectations::delivery(
            "consumer",
            "dummy.request",
            "dummy.request",
        )));
        let pipeline = Pipeline::builder()
            .filter(SEND, PassThrough)
            .decorate(SEND, MetricsDecorator::new("consumer", checker.clone()))
            .build(terminal_fn(|mut exchange: MessageExchange| async move {
                exchange.complete();
                Ok::<_, PipelineError>(exchange)
            }));

        let message = Message::new("dummy.request", json!({ "num": 13 }))
            .with_header(headers::DELIVERY_EXCHANGE, "dummy.request");
        pipeline
            .process(MessageExchange::delivery(message))
            .await
            .unwrap();

        // started, in_flight x2, duration, completed
        assert_eq!(checker.verify(), Ok(5));
    }
}
