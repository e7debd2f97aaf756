//! # In-Memory Broker
//!
//! Routes messages between bus endpoints of one process.
//!
//! ```text
//! ┌──────────┐  send(label)   ┌──────────────┐  Delivery   ┌──────────┐
//! │ producer │ ─────────────→ │    Broker    │ ──────────→ │ consumer │
//! │  inbox   │ ←───────────── │ label→[ep..] │             │  inbox   │
//! └──────────┘     Reply      └──────────────┘             └──────────┘
//! ```
//!
//! Each endpoint owns one bounded inbox. Deliveries are stamped with the
//! label they were routed on (`x-delivery-exchange`); replies go straight to
//! the named endpoint.

use courier_pipeline::{headers, Message, MessageLabel};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{BusError, BusResult};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// What arrives in an endpoint inbox.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// A message routed by label to a subscriber.
    Delivery(Message),
    /// A reply addressed to this endpoint.
    Reply(Message),
}

/// Label router over bounded `tokio::sync::mpsc` inboxes.
pub struct InMemoryBroker {
    /// Inbox sender per connected endpoint.
    inboxes: RwLock<HashMap<String, mpsc::Sender<Envelope>>>,

    /// Subscribed endpoints per label.
    routes: RwLock<HashMap<MessageLabel, BTreeSet<String>>>,

    /// Total messages routed by label.
    published: AtomicU64,

    /// Inbox capacity.
    capacity: usize,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Open the inbox of `endpoint`. Reconnecting replaces the previous inbox.
    pub fn connect(&self, endpoint: &str) -> mpsc::Receiver<Envelope> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        if self
            .inboxes
            .write()
            .insert(endpoint.to_string(), sender)
            .is_some()
        {
            warn!(endpoint, "Endpoint reconnected, previous inbox closed");
        }
        debug!(endpoint, capacity = self.capacity, "Endpoint connected");
        receiver
    }

    /// Close the inbox of `endpoint` and drop its subscriptions.
    pub fn disconnect(&self, endpoint: &str) {
        self.inboxes.write().remove(endpoint);
        let mut routes = self.routes.write();
        for subscribers in routes.values_mut() {
            subscribers.remove(endpoint);
        }
        routes.retain(|_, subscribers| !subscribers.is_empty());
        debug!(endpoint, "Endpoint disconnected");
    }

    /// Route messages on `label` to `endpoint`.
    pub fn subscribe(&self, label: MessageLabel, endpoint: &str) {
        debug!(%label, endpoint, "Endpoint subscribed");
        self.routes
            .write()
            .entry(label)
            .or_default()
            .insert(endpoint.to_string());
    }

    /// Endpoints subscribed to `label`, in name order.
    pub fn subscribers(&self, label: &MessageLabel) -> Vec<String> {
        self.routes
            .read()
            .get(label)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, endpoint: &str) -> bool {
        self.inboxes.read().contains_key(endpoint)
    }

    /// Deliver `message` to every endpoint subscribed to its label.
    ///
    /// Returns the number of endpoints that received it. Waits while a
    /// subscriber's inbox is full.
    pub async fn send(&self, message: Message) -> BusResult<usize> {
        let label = message.label().clone();
        self.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(String, mpsc::Sender<Envelope>)> = {
            let inboxes = self.inboxes.read();
            self.subscribers(&label)
                .into_iter()
                .filter_map(|endpoint| {
                    let sender = inboxes.get(&endpoint)?.clone();
                    Some((endpoint, sender))
                })
                .collect()
        };

        if targets.is_empty() {
            warn!(%label, "Message dropped (no subscribers)");
            return Err(BusError::NoSubscribers { label });
        }

        let mut delivered = 0;
        for (endpoint, sender) in targets {
            let stamped = message
                .clone()
                .with_header(headers::DELIVERY_EXCHANGE, label.as_str());
            match sender.send(Envelope::Delivery(stamped)).await {
                Ok(()) => delivered += 1,
                Err(_) => warn!(%label, endpoint = %endpoint, "Inbox closed during delivery"),
            }
        }

        debug!(%label, receivers = delivered, "Message routed");
        Ok(delivered)
    }

    /// Send a reply straight to `endpoint`.
    pub async fn reply(&self, endpoint: &str, message: Message) -> BusResult<()> {
        let sender = self
            .inboxes
            .read()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| BusError::EndpointUnavailable {
                endpoint: endpoint.to_string(),
            })?;

        sender
            .send(Envelope::Reply(message))
            .await
            .map_err(|_| BusError::EndpointUnavailable {
                endpoint: endpoint.to_string(),
            })
    }

    /// Total messages routed by label.
    pub fn messages_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("endpoints", &self.inboxes.read().len())
            .field("labels", &self.routes.read().len())
            .field("published", &self.messages_published())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(label: &str) -> Message {
        Message::new(label, json!({ "num": 13 }))
    }

    #[tokio::test]
    async fn test_send_no_subscribers() {
        let broker = InMemoryBroker::new();
        let err = broker.send(message("dummy.request")).await.unwrap_err();

        assert!(matches!(err, BusError::NoSubscribers { .. }));
        assert_eq!(broker.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_delivery_stamped_with_label() {
        let broker = InMemoryBroker::new();
        let mut inbox = broker.connect("consumer");
        broker.subscribe(MessageLabel::from("dummy.request"), "consumer");

        let receivers = broker.send(message("dummy.request")).await.unwrap();
        assert_eq!(receivers, 1);

        let Some(Envelope::Delivery(delivered)) = inbox.recv().await else {
            panic!("expected a delivery");
        };
        assert_eq!(delivered.header(headers::DELIVERY_EXCHANGE), Some("dummy.request"));
        assert_eq!(delivered.payload(), &json!({ "num": 13 }));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let broker = InMemoryBroker::new();
        let mut first = broker.connect("audit");
        let mut second = broker.connect("consumer");
        broker.subscribe(MessageLabel::from("order.placed"), "audit");
        broker.subscribe(MessageLabel::from("order.placed"), "consumer");

        assert_eq!(broker.send(message("order.placed")).await.unwrap(), 2);
        assert!(matches!(first.recv().await, Some(Envelope::Delivery(_))));
        assert!(matches!(second.recv().await, Some(Envelope::Delivery(_))));
        assert_eq!(
            broker.subscribers(&MessageLabel::from("order.placed")),
            vec!["audit".to_string(), "consumer".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reply_goes_to_endpoint() {
        let broker = InMemoryBroker::new();
        let mut inbox = broker.connect("producer");

        broker.reply("producer", message("dummy.request")).await.unwrap();
        assert!(matches!(inbox.recv().await, Some(Envelope::Reply(_))));

        let err = broker.reply("nobody", message("dummy.request")).await.unwrap_err();
        assert!(matches!(err, BusError::EndpointUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_closes_inbox_and_routes() {
        let broker = InMemoryBroker::with_capacity(4);
        let mut inbox = broker.connect("consumer");
        broker.subscribe(MessageLabel::from("dummy.request"), "consumer");

        broker.disconnect("consumer");

        assert!(!broker.is_connected("consumer"));
        assert!(broker.subscribers(&MessageLabel::from("dummy.request")).is_empty());
        assert!(inbox.recv().await.is_none());
        assert_eq!(broker.capacity(), 4);
    }
}
