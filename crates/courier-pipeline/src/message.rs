//! # Messages
//!
//! The payload carried in the outgoing and incoming slots of a
//! [`crate::MessageExchange`]. Payloads are kept as JSON values; typed
//! conversion happens at the edges with serde.

use crate::error::{PipelineError, PipelineResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known header keys.
pub mod headers {
    /// Correlates a reply with the request that caused it.
    pub const CORRELATION_ID: &str = "x-correlation-id";
    /// Address a reply should be sent to.
    pub const REPLY_TO: &str = "x-reply-to";
    /// Endpoint that published the message.
    pub const SOURCE_ENDPOINT: &str = "x-source-endpoint";
    /// Broker exchange the message was delivered through.
    pub const DELIVERY_EXCHANGE: &str = "x-delivery-exchange";
}

/// Routing label of a message (e.g. `dummy.request`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageLabel(String);

impl MessageLabel {
    /// Create a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MessageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for MessageLabel {
    fn from(label: String) -> Self {
        Self(label)
    }
}

/// A labelled message with headers and a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    label: MessageLabel,
    headers: BTreeMap<String, String>,
    payload: serde_json::Value,
}

impl Message {
    /// Create a message from an already-encoded payload.
    pub fn new(label: impl Into<MessageLabel>, payload: serde_json::Value) -> Self {
        Self {
            label: label.into(),
            headers: BTreeMap::new(),
            payload,
        }
    }

    /// Create a message by serializing a typed payload.
    ///
    /// # Errors
    ///
    /// `PipelineError::Payload` if the payload cannot be represented as JSON.
    pub fn from_payload<T>(label: impl Into<MessageLabel>, payload: &T) -> PipelineResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let label = label.into();
        let payload = serde_json::to_value(payload).map_err(|source| PipelineError::Payload {
            label: label.to_string(),
            source,
        })?;
        Ok(Self::new(label, payload))
    }

    /// Decode the payload into a typed value.
    ///
    /// # Errors
    ///
    /// `PipelineError::Payload` if the payload does not match `T`.
    pub fn payload_as<T>(&self) -> PipelineResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.payload.clone()).map_err(|source| PipelineError::Payload {
            label: self.label.to_string(),
            source,
        })
    }

    #[must_use]
    pub fn label(&self) -> &MessageLabel {
        &self.label
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Replace the payload, keeping label and headers.
    pub fn set_payload(&mut self, payload: serde_json::Value) {
        self.payload = payload;
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Set a header, returning the previous value if any.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.headers.insert(key.into(), value.into())
    }

    /// Builder-style variant of [`Message::set_header`].
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        self.headers.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct DummyRequest {
        num: i64,
    }

    #[test]
    fn test_typed_payload() {
        let message = Message::from_payload("dummy.request", &DummyRequest { num: 13 }).unwrap();
        assert_eq!(message.label().as_str(), "dummy.request");
        assert_eq!(message.payload()["num"], 13);

        let decoded: DummyRequest = message.payload_as().unwrap();
        assert_eq!(decoded, DummyRequest { num: 13 });
    }

    #[test]
    fn test_payload_mismatch_names_label() {
        let message = Message::new("dummy.request", serde_json::json!("not an object"));
        let err = message.payload_as::<DummyRequest>().unwrap_err();
        assert!(matches!(err, PipelineError::Payload { ref label, .. } if label == "dummy.request"));
    }

    #[test]
    fn test_headers() {
        let mut message = Message::new("a", serde_json::Value::Null)
            .with_header(headers::CORRELATION_ID, "42");
        assert_eq!(message.header(headers::CORRELATION_ID), Some("42"));

        let previous = message.set_header(headers::CORRELATION_ID, "43");
        assert_eq!(previous.as_deref(), Some("42"));

        assert_eq!(message.remove_header(headers::CORRELATION_ID).as_deref(), Some("43"));
        assert!(message.header(headers::CORRELATION_ID).is_none());
    }
}
