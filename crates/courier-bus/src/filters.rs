//! Built-in bus filters.
//!
//! Every outgoing pipeline starts with [`PublishFilter`] and every incoming
//! pipeline with [`DeliveryFilter`]. Declared first, they run last, right
//! before the terminal handler, and are the stages the metrics decorator
//! wraps.

use async_trait::async_trait;
use courier_pipeline::{
    headers, Direction, FaultReason, Filter, FilterInvoker, FilterKind, MessageExchange,
    PipelineError, PipelineResult,
};
use tracing::{debug, trace};
use uuid::Uuid;

/// Stamps the outgoing message with its source endpoint and, for requests,
/// a correlation id and reply address.
#[derive(Debug, Clone)]
pub struct PublishFilter {
    endpoint: String,
}

impl PublishFilter {
    pub const KIND: FilterKind = FilterKind::new("publish");

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Filter for PublishFilter {
    async fn process(
        &self,
        mut exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange> {
        if exchange.direction() != Direction::Publish {
            return Err(PipelineError::filter(
                Self::KIND,
                format!("{} exchange in the outgoing pipeline", exchange.direction()),
            ));
        }

        if exchange.out().is_none() {
            exchange.fault(FaultReason::Rejected("nothing to publish".to_string()));
            return Ok(exchange);
        }

        let expects_reply = exchange.expects_reply();
        if let Some(message) = exchange.out_mut() {
            message.set_header(headers::SOURCE_ENDPOINT, self.endpoint.as_str());
            if expects_reply {
                if message.header(headers::CORRELATION_ID).is_none() {
                    message.set_header(headers::CORRELATION_ID, Uuid::new_v4().to_string());
                }
                if message.header(headers::REPLY_TO).is_none() {
                    message.set_header(headers::REPLY_TO, self.endpoint.as_str());
                }
            }
        }

        trace!(
            exchange_id = %exchange.id(),
            endpoint = %self.endpoint,
            expects_reply,
            "Publishing"
        );
        invoker.proceed(exchange).await
    }
}

/// Admits well-formed deliveries into the rest of the incoming pipeline.
///
/// A delivery with no incoming message or an empty label is faulted here and
/// never reaches the handler.
#[derive(Debug, Clone)]
pub struct DeliveryFilter {
    endpoint: String,
}

impl DeliveryFilter {
    pub const KIND: FilterKind = FilterKind::new("delivery");

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Filter for DeliveryFilter {
    async fn process(
        &self,
        mut exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange> {
        if exchange.direction() != Direction::Deliver {
            return Err(PipelineError::filter(
                Self::KIND,
                format!("{} exchange in the incoming pipeline", exchange.direction()),
            ));
        }

        let well_formed = exchange
            .incoming()
            .map(|message| !message.label().is_empty())
            .unwrap_or(false);
        if !well_formed {
            debug!(
                exchange_id = %exchange.id(),
                endpoint = %self.endpoint,
                "Malformed delivery rejected"
            );
            exchange.fault(FaultReason::Rejected("delivery without a label".to_string()));
            return Ok(exchange);
        }

        trace!(exchange_id = %exchange.id(), endpoint = %self.endpoint, "Delivering");
        invoker.proceed(exchange).await
    }
}
