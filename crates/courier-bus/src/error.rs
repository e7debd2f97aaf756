//! Bus errors.

use courier_pipeline::{FaultReason, MessageLabel, PipelineError};
use thiserror::Error;

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Publishing on a label this bus never declared with `route`.
    #[error("No route declared for label {label}")]
    UnknownRoute { label: MessageLabel },

    /// A second handler for the same label.
    #[error("Handler already registered for label {label}")]
    DuplicateHandler { label: MessageLabel },

    #[error("No endpoint subscribed to label {label}")]
    NoSubscribers { label: MessageLabel },

    #[error("Endpoint {endpoint} is not connected")]
    EndpointUnavailable { endpoint: String },

    #[error("Message on {label} has no reply address")]
    NoReplyAddress { label: MessageLabel },

    #[error("Exchange on {label} faulted: {reason}")]
    Faulted {
        label: MessageLabel,
        reason: FaultReason,
    },

    #[error("Request on {label} settled without a reply")]
    MissingReply { label: MessageLabel },

    #[error("Bus endpoint {endpoint} is shut down")]
    Closed { endpoint: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
