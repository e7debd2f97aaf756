//! # Courier Bus - In-Process Service Bus
//!
//! Named endpoints exchanging labelled messages through an
//! [`InMemoryBroker`]. Every publish, request and delivery is a
//! [`courier_pipeline::MessageExchange`] travelling through a filter
//! pipeline, so cross-cutting behavior (metrics, fault tolerance,
//! validation) is added with filters and decorators.
//!
//! ```text
//! ┌──────────────┐   request(dummy.request)   ┌──────────────┐
//! │   producer   │ ─────────────────────────→ │   consumer   │
//! │              │ ←───────────────────────── │  on::<T>()   │
//! └──────────────┘        ctx.reply()         └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let broker = Arc::new(InMemoryBroker::new());
//! let consumer = Bus::builder(BusConfig::new("consumer"), broker.clone())
//!     .on("dummy.request", |req: DummyRequest, ctx: DeliveryContext| async move {
//!         ctx.reply(&DummyResponse { num: req.num * 2 }).await?;
//!         Ok(())
//!     })
//!     .build()?;
//! let producer = Bus::builder(BusConfig::new("producer"), broker)
//!     .route("dummy.request")
//!     .build()?;
//! let response: DummyResponse = producer.request("dummy.request", &DummyRequest { num: 13 }).await?;
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod bus;
pub mod config;
pub mod error;
pub mod filters;
pub mod pending;

// Re-export main types
pub use broker::{Envelope, InMemoryBroker};
pub use bus::{Bus, BusBuilder, DeliveryContext};
pub use config::{BusConfig, DEFAULT_REQUEST_TIMEOUT};
pub use error::{BusError, BusResult};
pub use filters::{DeliveryFilter, PublishFilter};
pub use pending::PendingRequests;

/// Maximum messages buffered per endpoint inbox before senders wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
