//! # Courier Pipeline - Message Exchange Filter Chain
//!
//! The processing pipeline every message a bus sends or receives goes
//! through. Cross-cutting behavior (fault tolerance, metrics, validation,
//! the actual send or handler dispatch) is composed as filters around a
//! [`MessageExchange`], without the transport or the filters knowing about
//! each other.
//!
//! ## Traversal
//!
//! Filters are declared outer concern first and run in reverse declaration
//! order, each one nesting the rest of the chain:
//!
//! ```text
//! declared:  [F1, F2, F3]
//!
//!   process(exchange)
//!     └─→ F3 ──proceed──→ F2 ──proceed──→ F1 ──proceed──→ terminal handler
//!          ↑               ↑               ↑                    │
//!          └───────────────┴───────────────┴──── settled ───────┘
//! ```
//!
//! A filter that does not call `proceed` short-circuits: nothing downstream
//! of it runs. A filter that awaits `proceed` sees the fully settled result
//! of everything downstream, without blocking a thread while it waits.
//!
//! ## Decoration
//!
//! Each filter is registered under a [`FilterKind`]. A [`FilterDecorator`]
//! registered for a kind wraps every stage of that kind. Decorators are
//! resolved once when the pipeline is built.
//!
//! ## Failure Channels
//!
//! - `Err(PipelineError)`: the exchange is lost; nothing in the chain caught it
//! - `Ok(exchange)` with [`ExchangeState::Faulted`]: an expected, handled failure

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod decorator;
pub mod error;
pub mod exchange;
pub mod fault_tolerance;
pub mod filter;
pub mod invoker;
pub mod message;
pub mod pipeline;

// Re-export main types
pub use decorator::{DecoratorRegistry, FilterDecorator};
pub use error::{BoxError, PipelineError, PipelineResult};
pub use exchange::{Direction, ExchangeId, ExchangeState, FaultReason, MessageExchange};
pub use fault_tolerance::FaultToleranceFilter;
pub use filter::{terminal_fn, Filter, FilterKind, FnTerminal, PassThrough, TerminalHandler};
pub use invoker::FilterInvoker;
pub use message::{headers, Message, MessageLabel};
pub use pipeline::{Pipeline, PipelineBuilder};
