//! Outstanding requests awaiting a correlated reply.

use courier_pipeline::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Correlation id to reply slot. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    slots: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a reply slot for `correlation_id`.
    pub fn register(&self, correlation_id: &str) -> oneshot::Receiver<Message> {
        let (sender, receiver) = oneshot::channel();
        self.slots.lock().insert(correlation_id.to_string(), sender);
        receiver
    }

    /// Hand `reply` to the request waiting on `correlation_id`.
    ///
    /// Returns `false` if nothing is waiting (late or unknown reply).
    pub fn resolve(&self, correlation_id: &str, reply: Message) -> bool {
        let Some(sender) = self.slots.lock().remove(correlation_id) else {
            debug!(correlation_id, "Reply without a pending request dropped");
            return false;
        };
        sender.send(reply).is_ok()
    }

    /// Forget the request waiting on `correlation_id`.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.slots.lock().remove(correlation_id).is_some()
    }

    /// Drop every slot; waiting requests see their channel closed.
    pub fn cancel_all(&self) -> usize {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
