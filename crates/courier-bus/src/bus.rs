//! # Bus Endpoint
//!
//! One named endpoint on an [`InMemoryBroker`]. Everything it sends runs
//! through the outgoing pipeline; everything routed to it runs through the
//! incoming pipeline.
//!
//! ```text
//! publish/request
//!   └─→ [user filters..] → PublishFilter → broker send (+ await reply)
//!
//! inbox
//!   ├─ Delivery → [user filters..] → DeliveryFilter → handler(label)
//!   └─ Reply    → pending request (correlation id)
//! ```
//!
//! Replies bypass the incoming pipeline: they settle the request exchange
//! that is already travelling through the producer's outgoing pipeline.

use async_trait::async_trait;
use courier_pipeline::{
    headers, DecoratorRegistry, FaultReason, Filter, FilterDecorator, FilterKind, Message,
    MessageExchange, MessageLabel, Pipeline, PipelineError, PipelineResult, TerminalHandler,
};
use courier_telemetry::{MetricsCollector, MetricsDecorator};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::broker::{Envelope, InMemoryBroker};
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::filters::{DeliveryFilter, PublishFilter};
use crate::pending::PendingRequests;

type Handler = Arc<dyn Fn(DeliveryContext) -> BoxFuture<'static, PipelineResult<()>> + Send + Sync>;

/// What a handler gets besides the typed payload.
#[derive(Clone)]
pub struct DeliveryContext {
    message: Message,
    endpoint: String,
    broker: Arc<InMemoryBroker>,
}

impl DeliveryContext {
    /// The delivered message, headers included.
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn label(&self) -> &MessageLabel {
        self.message.label()
    }

    /// Endpoint the message was delivered to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.message.header(headers::CORRELATION_ID)
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.message.header(headers::REPLY_TO)
    }

    /// Send `payload` back to the requester.
    ///
    /// # Errors
    ///
    /// `BusError::NoReplyAddress` if the message was a plain publish.
    pub async fn reply<T: Serialize>(&self, payload: &T) -> BusResult<()> {
        let Some(reply_to) = self.reply_to() else {
            return Err(BusError::NoReplyAddress {
                label: self.label().clone(),
            });
        };

        let mut reply = Message::from_payload(self.label().clone(), payload)?;
        if let Some(correlation_id) = self.correlation_id() {
            reply.set_header(headers::CORRELATION_ID, correlation_id);
        }
        reply.set_header(headers::SOURCE_ENDPOINT, self.endpoint.as_str());

        debug!(
            label = %self.label(),
            endpoint = %self.endpoint,
            reply_to,
            "Replying"
        );
        self.broker.reply(reply_to, reply).await
    }
}

impl std::fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("endpoint", &self.endpoint)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Configures and starts a [`Bus`].
pub struct BusBuilder {
    config: BusConfig,
    broker: Arc<InMemoryBroker>,
    routes: BTreeSet<MessageLabel>,
    handlers: HashMap<MessageLabel, Handler>,
    outgoing: Vec<(FilterKind, Arc<dyn Filter>)>,
    incoming: Vec<(FilterKind, Arc<dyn Filter>)>,
    decorators: DecoratorRegistry,
    metrics: Option<Arc<dyn MetricsCollector>>,
    metric_prefix: String,
    error: Option<BusError>,
}

impl BusBuilder {
    pub fn new(config: BusConfig, broker: Arc<InMemoryBroker>) -> Self {
        Self {
            config,
            broker,
            routes: BTreeSet::new(),
            handlers: HashMap::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            decorators: DecoratorRegistry::new(),
            metrics: None,
            metric_prefix: "courier".to_string(),
            error: None,
        }
    }

    /// Declare a label this bus publishes or sends requests on.
    #[must_use]
    pub fn route(mut self, label: impl Into<MessageLabel>) -> Self {
        self.routes.insert(label.into());
        self
    }

    /// Subscribe to `label` and handle its payloads as `T`.
    ///
    /// A payload that does not deserialize into `T` fails the delivery with
    /// `PipelineError::Payload`; a handler error fails it with
    /// `PipelineError::Terminal`.
    #[must_use]
    pub fn on<T, F, Fut>(mut self, label: impl Into<MessageLabel>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, DeliveryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        if self.handlers.contains_key(&label) {
            self.error.get_or_insert(BusError::DuplicateHandler { label });
            return self;
        }

        let handler = Arc::new(handler);
        let wrapped: Handler = Arc::new(move |context: DeliveryContext| {
            let handler = Arc::clone(&handler);
            async move {
                let payload: T = context.message().payload_as()?;
                handler(payload, context)
                    .await
                    .map_err(PipelineError::terminal)
            }
            .boxed()
        });
        self.handlers.insert(label, wrapped);
        self
    }

    /// Add a filter to both the outgoing and the incoming pipeline.
    #[must_use]
    pub fn filter<F>(self, kind: FilterKind, filter: F) -> Self
    where
        F: Filter + 'static,
    {
        let filter: Arc<dyn Filter> = Arc::new(filter);
        self.outgoing_filter_arc(kind, Arc::clone(&filter))
            .incoming_filter_arc(kind, filter)
    }

    #[must_use]
    pub fn outgoing_filter<F>(self, kind: FilterKind, filter: F) -> Self
    where
        F: Filter + 'static,
    {
        self.outgoing_filter_arc(kind, Arc::new(filter))
    }

    #[must_use]
    pub fn incoming_filter<F>(self, kind: FilterKind, filter: F) -> Self
    where
        F: Filter + 'static,
    {
        self.incoming_filter_arc(kind, Arc::new(filter))
    }

    #[must_use]
    pub fn outgoing_filter_arc(mut self, kind: FilterKind, filter: Arc<dyn Filter>) -> Self {
        self.outgoing.push((kind, filter));
        self
    }

    #[must_use]
    pub fn incoming_filter_arc(mut self, kind: FilterKind, filter: Arc<dyn Filter>) -> Self {
        self.incoming.push((kind, filter));
        self
    }

    /// Decorate every filter of `kind`, in both pipelines.
    #[must_use]
    pub fn decorate<D>(mut self, kind: FilterKind, decorator: D) -> Self
    where
        D: FilterDecorator + 'static,
    {
        self.decorators.register(kind, Arc::new(decorator));
        self
    }

    /// Report exchange metrics of the publish and delivery filters to
    /// `collector`. Replaces any decorator registered for those kinds.
    #[must_use]
    pub fn collect_metrics(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(collector);
        self
    }

    #[must_use]
    pub fn metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metric_prefix = prefix.into();
        self
    }

    /// Connect to the broker and start the inbox worker.
    ///
    /// # Errors
    ///
    /// Invalid configuration, a duplicate handler, or no tokio runtime.
    pub fn build(self) -> BusResult<Bus> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::Config(format!("bus must start inside a tokio runtime: {e}")))?;

        let endpoint = self.config.endpoint.clone();

        let mut decorators = self.decorators;
        if let Some(collector) = self.metrics {
            let metrics: Arc<dyn FilterDecorator> = Arc::new(
                MetricsDecorator::new(endpoint.clone(), collector)
                    .with_prefix(self.metric_prefix.clone()),
            );
            decorators.register(PublishFilter::KIND, Arc::clone(&metrics));
            decorators.register(DeliveryFilter::KIND, metrics);
        }

        let pending = PendingRequests::new();

        let outgoing = self
            .outgoing
            .into_iter()
            .fold(
                Pipeline::builder().filter(PublishFilter::KIND, PublishFilter::new(endpoint.clone())),
                |builder, (kind, filter)| builder.filter_arc(kind, filter),
            )
            .decorators(decorators.clone())
            .build(BrokerSend {
                broker: Arc::clone(&self.broker),
                pending: pending.clone(),
                request_timeout: self.config.request_timeout,
            });

        let labels: Vec<MessageLabel> = self.handlers.keys().cloned().collect();
        let incoming = self
            .incoming
            .into_iter()
            .fold(
                Pipeline::builder().filter(DeliveryFilter::KIND, DeliveryFilter::new(endpoint.clone())),
                |builder, (kind, filter)| builder.filter_arc(kind, filter),
            )
            .decorators(decorators)
            .build(HandlerDispatch {
                handlers: self.handlers,
                endpoint: endpoint.clone(),
                broker: Arc::clone(&self.broker),
            });

        let inbox = self.broker.connect(&endpoint);
        for label in labels {
            self.broker.subscribe(label, &endpoint);
        }

        let worker = runtime.spawn(run_inbox(
            endpoint.clone(),
            inbox,
            incoming.clone(),
            pending.clone(),
        ));

        info!(
            endpoint = %endpoint,
            routes = self.routes.len(),
            outgoing_filters = outgoing.len(),
            incoming_filters = incoming.len(),
            "Bus started"
        );

        Ok(Bus {
            config: self.config,
            broker: self.broker,
            routes: self.routes,
            outgoing,
            incoming,
            pending,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })
    }
}

/// A running bus endpoint.
pub struct Bus {
    config: BusConfig,
    broker: Arc<InMemoryBroker>,
    routes: BTreeSet<MessageLabel>,
    outgoing: Pipeline,
    incoming: Pipeline,
    pending: PendingRequests,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Bus {
    pub fn builder(config: BusConfig, broker: Arc<InMemoryBroker>) -> BusBuilder {
        BusBuilder::new(config, broker)
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn outgoing_pipeline(&self) -> &Pipeline {
        &self.outgoing
    }

    pub fn incoming_pipeline(&self) -> &Pipeline {
        &self.incoming
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fire-and-forget publish of `payload` on `label`.
    ///
    /// A publish nobody is subscribed to is dropped with a warning.
    pub async fn publish<T: Serialize>(
        &self,
        label: impl Into<MessageLabel>,
        payload: &T,
    ) -> BusResult<()> {
        let message = self.outgoing_message(label.into(), payload)?;
        self.send(MessageExchange::publish(message)).await?;
        Ok(())
    }

    /// Send `payload` on `label` and wait for the correlated reply.
    ///
    /// # Errors
    ///
    /// `BusError::Faulted` when nobody is subscribed to `label` or no reply
    /// arrives within `request_timeout`.
    pub async fn request<Req, Resp>(
        &self,
        label: impl Into<MessageLabel>,
        payload: &Req,
    ) -> BusResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let label = label.into();
        let message = self.outgoing_message(label.clone(), payload)?;
        let settled = self.send(MessageExchange::request(message)).await?;

        let reply = settled
            .incoming()
            .ok_or(BusError::MissingReply { label })?;
        Ok(reply.payload_as()?)
    }

    /// Disconnect from the broker, cancel pending requests and wait for
    /// in-flight deliveries to settle.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.broker.disconnect(self.endpoint());
        let cancelled = self.pending.cancel_all();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(endpoint = %self.endpoint(), error = %e, "Inbox worker ended abnormally");
            }
        }

        info!(endpoint = %self.endpoint(), cancelled, "Bus shut down");
    }

    fn outgoing_message<T: Serialize>(&self, label: MessageLabel, payload: &T) -> BusResult<Message> {
        if self.is_closed() {
            return Err(BusError::Closed {
                endpoint: self.endpoint().to_string(),
            });
        }
        if !self.routes.contains(&label) {
            return Err(BusError::UnknownRoute { label });
        }
        Ok(Message::from_payload(label, payload)?)
    }

    async fn send(&self, exchange: MessageExchange) -> BusResult<MessageExchange> {
        let label = exchange.label().cloned().unwrap_or_else(|| MessageLabel::new(""));
        let settled = self.outgoing.process(exchange).await?;

        match settled.fault_reason() {
            Some(reason) => Err(BusError::Faulted {
                label,
                reason: reason.clone(),
            }),
            None => Ok(settled),
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.broker.disconnect(&self.config.endpoint);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("endpoint", &self.config.endpoint)
            .field("routes", &self.routes)
            .field("outgoing", &self.outgoing)
            .field("incoming", &self.incoming)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Outgoing terminal: hand the message to the broker and, for requests,
/// wait for the reply.
struct BrokerSend {
    broker: Arc<InMemoryBroker>,
    pending: PendingRequests,
    request_timeout: Duration,
}

#[async_trait]
impl TerminalHandler for BrokerSend {
    async fn handle(&self, mut exchange: MessageExchange) -> PipelineResult<MessageExchange> {
        let Some(message) = exchange.out().cloned() else {
            exchange.fault(FaultReason::Rejected("nothing to publish".to_string()));
            return Ok(exchange);
        };

        if !exchange.expects_reply() {
            match self.broker.send(message).await {
                Ok(_) | Err(BusError::NoSubscribers { .. }) => exchange.complete(),
                Err(err) => return Err(PipelineError::terminal(err)),
            }
            return Ok(exchange);
        }

        let Some(correlation_id) = message.header(headers::CORRELATION_ID).map(str::to_string)
        else {
            exchange.fault(FaultReason::Rejected("request without correlation id".to_string()));
            return Ok(exchange);
        };

        let reply = self.pending.register(&correlation_id);
        let _slot = SlotGuard {
            pending: &self.pending,
            correlation_id: &correlation_id,
        };
        match self.broker.send(message).await {
            Ok(_) => {}
            Err(err @ BusError::NoSubscribers { .. }) => {
                exchange.fault(FaultReason::Rejected(err.to_string()));
                return Ok(exchange);
            }
            Err(err) => return Err(PipelineError::terminal(err)),
        }

        match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(reply)) => {
                exchange.set_incoming(reply);
                exchange.complete();
            }
            Ok(Err(_)) => {
                exchange.fault(FaultReason::Failure(
                    "request cancelled before a reply arrived".to_string(),
                ));
            }
            Err(_) => {
                warn!(
                    exchange_id = %exchange.id(),
                    correlation_id = %correlation_id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "No reply before deadline"
                );
                exchange.fault(FaultReason::Timeout(self.request_timeout));
            }
        }
        Ok(exchange)
    }
}

/// Drops the reply slot when the send settles or is abandoned.
struct SlotGuard<'a> {
    pending: &'a PendingRequests,
    correlation_id: &'a str,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.correlation_id);
    }
}

/// Incoming terminal: run the handler registered for the message label.
struct HandlerDispatch {
    handlers: HashMap<MessageLabel, Handler>,
    endpoint: String,
    broker: Arc<InMemoryBroker>,
}

#[async_trait]
impl TerminalHandler for HandlerDispatch {
    async fn handle(&self, mut exchange: MessageExchange) -> PipelineResult<MessageExchange> {
        let Some(message) = exchange.incoming().cloned() else {
            exchange.fault(FaultReason::Rejected("nothing delivered".to_string()));
            return Ok(exchange);
        };

        let Some(handler) = self.handlers.get(message.label()) else {
            exchange.fault(FaultReason::Rejected(format!(
                "no handler for label {}",
                message.label()
            )));
            return Ok(exchange);
        };

        let context = DeliveryContext {
            message,
            endpoint: self.endpoint.clone(),
            broker: Arc::clone(&self.broker),
        };
        handler(context).await?;

        exchange.complete();
        Ok(exchange)
    }
}

async fn run_inbox(
    endpoint: String,
    mut inbox: mpsc::Receiver<Envelope>,
    incoming: Pipeline,
    pending: PendingRequests,
) {
    let mut deliveries = JoinSet::new();

    loop {
        tokio::select! {
            envelope = inbox.recv() => match envelope {
                Some(Envelope::Reply(reply)) => resolve_reply(&endpoint, &pending, reply),
                Some(Envelope::Delivery(message)) => {
                    let pipeline = incoming.clone();
                    let endpoint = endpoint.clone();
                    deliveries.spawn(async move { deliver(&endpoint, &pipeline, message).await });
                }
                None => break,
            },
            Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                if let Err(e) = joined {
                    error!(endpoint = %endpoint, error = %e, "Delivery task panicked");
                }
            }
        }
    }

    while let Some(joined) = deliveries.join_next().await {
        if let Err(e) = joined {
            error!(endpoint = %endpoint, error = %e, "Delivery task panicked");
        }
    }
    debug!(endpoint = %endpoint, "Inbox closed");
}

fn resolve_reply(endpoint: &str, pending: &PendingRequests, reply: Message) {
    let Some(correlation_id) = reply.header(headers::CORRELATION_ID).map(str::to_string) else {
        warn!(endpoint, label = %reply.label(), "Reply without correlation id dropped");
        return;
    };
    pending.resolve(&correlation_id, reply);
}

async fn deliver(endpoint: &str, pipeline: &Pipeline, message: Message) {
    let exchange = MessageExchange::delivery(message);
    let exchange_id = exchange.id();

    match pipeline.process(exchange).await {
        Ok(settled) => match settled.fault_reason() {
            Some(reason) => warn!(
                endpoint,
                exchange_id = %exchange_id,
                reason = %reason,
                "Delivery faulted"
            ),
            None => debug!(endpoint, exchange_id = %exchange_id, "Delivery completed"),
        },
        Err(e) => error!(endpoint, exchange_id = %exchange_id, error = %e, "Delivery failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct DummyRequest {
        num: i64,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct DummyResponse {
        num: i64,
    }

    fn doubling_consumer(broker: &Arc<InMemoryBroker>) -> Bus {
        Bus::builder(BusConfig::new("consumer"), Arc::clone(broker))
            .on("dummy.request", |request: DummyRequest, ctx: DeliveryContext| async move {
                ctx.reply(&DummyResponse { num: request.num * 2 }).await?;
                Ok::<_, anyhow::Error>(())
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_reply() {
        let broker = Arc::new(InMemoryBroker::new());
        let _consumer = doubling_consumer(&broker);
        let producer = Bus::builder(BusConfig::new("producer"), Arc::clone(&broker))
            .route("dummy.request")
            .build()
            .unwrap();

        let response: DummyResponse = producer
            .request("dummy.request", &DummyRequest { num: 13 })
            .await
            .unwrap();

        assert_eq!(response, DummyResponse { num: 26 });
        assert_eq!(producer.pending_requests(), 0);
    }

    fn failing_consumer(broker: &Arc<InMemoryBroker>) -> BusBuilder {
        Bus::builder(BusConfig::new("consumer"), Arc::clone(broker)).on(
            "dummy.request",
            |_: DummyRequest, _ctx: DeliveryContext| async move {
                Err::<(), _>(anyhow::anyhow!("inventory offline"))
            },
        )
    }

    fn delivery(payload: serde_json::Value) -> MessageExchange {
        MessageExchange::delivery(Message::new("dummy.request", payload))
    }

    #[tokio::test]
    async fn test_handler_error_fails_delivery() {
        let broker = Arc::new(InMemoryBroker::new());
        let consumer = failing_consumer(&broker).build().unwrap();

        let err = consumer
            .incoming_pipeline()
            .process(delivery(json!({ "num": 13 })))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Terminal { .. }));
        assert!(err.to_string().contains("inventory offline"));
    }

    #[tokio::test]
    async fn test_undecodable_payload_fails_delivery() {
        let broker = Arc::new(InMemoryBroker::new());
        let consumer = doubling_consumer(&broker);

        let err = consumer
            .incoming_pipeline()
            .process(delivery(json!({ "num": "thirteen" })))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Payload { .. }));
    }

    #[tokio::test]
    async fn test_incoming_fault_tolerance_faults_failed_deliveries() {
        let broker = Arc::new(InMemoryBroker::new());
        let metrics = Arc::new(courier_telemetry::RecordingCollector::new());
        let consumer = failing_consumer(&broker)
            .incoming_filter(
                courier_pipeline::FaultToleranceFilter::KIND,
                courier_pipeline::FaultToleranceFilter::new(),
            )
            .decorate(
                courier_pipeline::FaultToleranceFilter::KIND,
                MetricsDecorator::new("consumer", metrics.clone()).with_prefix("tolerant"),
            )
            .collect_metrics(metrics.clone())
            .build()
            .unwrap();
        let producer = Bus::builder(BusConfig::new("producer"), Arc::clone(&broker))
            .route("dummy.request")
            .build()
            .unwrap();

        producer
            .publish("dummy.request", &DummyRequest { num: 13 })
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(3), async {
            while metrics.counter("tolerant.exchange.faulted") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("delivery settles");

        // The delivery stage sees the handler error; the stage around it
        // reports the converted fault.
        assert_eq!(metrics.counter("courier.exchange.failed"), 1);
        assert_eq!(metrics.counter("courier.exchange.in_flight"), 0);
        assert_eq!(metrics.counter("tolerant.exchange.faulted"), 1);
        assert_eq!(metrics.counter("tolerant.exchange.failed"), 0);

        for payload in [json!({ "num": 13 }), json!({ "num": "thirteen" })] {
            let settled = consumer
                .incoming_pipeline()
                .process(delivery(payload))
                .await
                .unwrap();
            assert!(matches!(settled.fault_reason(), Some(FaultReason::Failure(_))));
        }
    }

    #[tokio::test]
    async fn test_unknown_route_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Bus::builder(BusConfig::new("producer"), broker).build().unwrap();

        let err = producer.publish("dummy.request", &json!({})).await.unwrap_err();
        assert!(matches!(err, BusError::UnknownRoute { .. }));
    }

    #[tokio::test]
    async fn test_request_without_subscriber_faults() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Bus::builder(BusConfig::new("producer"), broker)
            .route("dummy.request")
            .build()
            .unwrap();

        let err = producer
            .request::<_, DummyResponse>("dummy.request", &DummyRequest { num: 1 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BusError::Faulted { reason: FaultReason::Rejected(_), .. }
        ));
        assert_eq!(producer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_dropped() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Bus::builder(BusConfig::new("producer"), Arc::clone(&broker))
            .route("order.placed")
            .build()
            .unwrap();

        producer.publish("order.placed", &json!({ "id": 1 })).await.unwrap();
        assert_eq!(broker.messages_published(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let broker = Arc::new(InMemoryBroker::new());
        // Subscribed, but never replies.
        let _consumer = Bus::builder(BusConfig::new("consumer"), Arc::clone(&broker))
            .on("dummy.request", |_: DummyRequest, _ctx: DeliveryContext| async move {
                Ok::<_, anyhow::Error>(())
            })
            .build()
            .unwrap();
        let producer = Bus::builder(
            BusConfig::new("producer").with_request_timeout(Duration::from_secs(2)),
            Arc::clone(&broker),
        )
        .route("dummy.request")
        .build()
        .unwrap();

        let err = producer
            .request::<_, DummyResponse>("dummy.request", &DummyRequest { num: 1 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BusError::Faulted { reason: FaultReason::Timeout(after), .. } if after == Duration::from_secs(2)
        ));
        assert_eq!(producer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_handler_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let result = Bus::builder(BusConfig::new("consumer"), broker)
            .on("dummy.request", |_: DummyRequest, _ctx: DeliveryContext| async move {
                Ok::<_, anyhow::Error>(())
            })
            .on("dummy.request", |_: DummyRequest, _ctx: DeliveryContext| async move {
                Ok::<_, anyhow::Error>(())
            })
            .build();

        assert!(matches!(result, Err(BusError::DuplicateHandler { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let result = Bus::builder(BusConfig::new(""), broker).build();
        assert!(matches!(result, Err(BusError::Config(_))));
    }

    #[test]
    fn test_build_outside_runtime_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let result = Bus::builder(BusConfig::new("producer"), broker).build();
        assert!(matches!(result, Err(BusError::Config(_))));
    }

    #[tokio::test]
    async fn test_pipelines_include_builtin_filters() {
        const AUDIT: FilterKind = FilterKind::new("audit");

        struct Audit;

        #[async_trait]
        impl Filter for Audit {
            async fn process(
                &self,
                exchange: MessageExchange,
                invoker: &mut courier_pipeline::FilterInvoker,
            ) -> PipelineResult<MessageExchange> {
                invoker.proceed(exchange).await
            }
        }

        let broker = Arc::new(InMemoryBroker::new());
        let bus = Bus::builder(BusConfig::new("producer"), broker)
            .filter(AUDIT, Audit)
            .collect_metrics(Arc::new(courier_telemetry::RecordingCollector::new()))
            .build()
            .unwrap();

        assert_eq!(
            bus.outgoing_pipeline().traversal_order(),
            vec![AUDIT, PublishFilter::KIND]
        );
        assert_eq!(
            bus.incoming_pipeline().traversal_order(),
            vec![AUDIT, DeliveryFilter::KIND]
        );
        assert!(bus.outgoing_pipeline().is_decorated(PublishFilter::KIND));
        assert!(bus.incoming_pipeline().is_decorated(DeliveryFilter::KIND));
        assert!(!bus.outgoing_pipeline().is_decorated(AUDIT));
    }

    #[tokio::test]
    async fn test_shutdown_closes_bus() {
        let broker = Arc::new(InMemoryBroker::new());
        let consumer = doubling_consumer(&broker);

        consumer.shutdown().await;

        assert!(consumer.is_closed());
        assert!(!broker.is_connected("consumer"));
        assert!(broker
            .subscribers(&MessageLabel::from("dummy.request"))
            .is_empty());
    }

    #[tokio::test]
    async fn test_reply_to_plain_publish_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let context = DeliveryContext {
            message: Message::new("order.placed", json!({})),
            endpoint: "consumer".to_string(),
            broker,
        };

        let err = context.reply(&json!({ "ok": true })).await.unwrap_err();
        assert!(matches!(err, BusError::NoReplyAddress { .. }));
    }
}
