//! # Message Exchange
//!
//! One in-flight unit of bus work: an outbound publish (optionally awaiting a
//! reply) or an inbound delivery awaiting a handler result.
//!
//! The exchange carries a stable [`ExchangeId`] assigned at creation. The
//! invoker compares ids after every stage, which is how "the exchange
//! returned downstream is the exchange that was sent downstream" is checked.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Stable identity of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Generate a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which way the exchange is flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Outbound: publish, possibly awaiting a reply.
    Publish,
    /// Inbound: delivery awaiting the handler result.
    Deliver,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => f.write_str("publish"),
            Self::Deliver => f.write_str("deliver"),
        }
    }
}

/// Why an exchange was faulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultReason {
    /// Downstream work did not settle before the deadline.
    Timeout(Duration),
    /// A filter refused the exchange (validation, open circuit, ...).
    Rejected(String),
    /// Downstream work failed and the failure was handled.
    Failure(String),
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "timed out after {after:?}"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::Failure(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Completion marker of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Pending,
    Completed,
    Faulted(FaultReason),
}

/// One unit of bus work threaded through a filter pipeline.
#[derive(Debug, Clone)]
pub struct MessageExchange {
    id: ExchangeId,
    direction: Direction,
    expects_reply: bool,
    out: Option<Message>,
    incoming: Option<Message>,
    state: ExchangeState,
}

impl MessageExchange {
    /// Fire-and-forget publish of `message`.
    #[must_use]
    pub fn publish(message: Message) -> Self {
        Self::outgoing(message, false)
    }

    /// Publish of `message` that awaits a reply in the incoming slot.
    #[must_use]
    pub fn request(message: Message) -> Self {
        Self::outgoing(message, true)
    }

    /// Inbound delivery of `message`.
    #[must_use]
    pub fn delivery(message: Message) -> Self {
        Self {
            id: ExchangeId::new(),
            direction: Direction::Deliver,
            expects_reply: false,
            out: None,
            incoming: Some(message),
            state: ExchangeState::Pending,
        }
    }

    fn outgoing(message: Message, expects_reply: bool) -> Self {
        Self {
            id: ExchangeId::new(),
            direction: Direction::Publish,
            expects_reply,
            out: Some(message),
            incoming: None,
            state: ExchangeState::Pending,
        }
    }

    #[must_use]
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True for publish exchanges created with [`MessageExchange::request`].
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.expects_reply
    }

    #[must_use]
    pub fn out(&self) -> Option<&Message> {
        self.out.as_ref()
    }

    pub fn out_mut(&mut self) -> Option<&mut Message> {
        self.out.as_mut()
    }

    pub fn set_out(&mut self, message: Message) {
        self.out = Some(message);
    }

    #[must_use]
    pub fn incoming(&self) -> Option<&Message> {
        self.incoming.as_ref()
    }

    pub fn incoming_mut(&mut self) -> Option<&mut Message> {
        self.incoming.as_mut()
    }

    /// Store a delivered message or a reply.
    pub fn set_incoming(&mut self, message: Message) {
        self.incoming = Some(message);
    }

    pub fn take_incoming(&mut self) -> Option<Message> {
        self.incoming.take()
    }

    #[must_use]
    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    /// Mark the exchange completed. A faulted exchange stays faulted.
    pub fn complete(&mut self) {
        if !self.is_faulted() {
            self.state = ExchangeState::Completed;
        }
    }

    /// Mark the exchange faulted, replacing any earlier state.
    pub fn fault(&mut self, reason: FaultReason) {
        self.state = ExchangeState::Faulted(reason);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.state, ExchangeState::Completed)
    }

    #[must_use]
    pub fn is_faulted(&self) -> bool {
        matches!(self.state, ExchangeState::Faulted(_))
    }

    /// Completed or faulted.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.state, ExchangeState::Pending)
    }

    #[must_use]
    pub fn fault_reason(&self) -> Option<&FaultReason> {
        match &self.state {
            ExchangeState::Faulted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Label of the message that defines this exchange: the outgoing message
    /// for publishes, the incoming one for deliveries.
    #[must_use]
    pub fn label(&self) -> Option<&crate::MessageLabel> {
        match self.direction {
            Direction::Publish => self.out.as_ref().map(Message::label),
            Direction::Deliver => self.incoming.as_ref().map(Message::label),
        }
    }
}
