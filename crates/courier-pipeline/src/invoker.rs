//! # Filter Invoker
//!
//! Drives one traversal of a built chain for exactly one exchange.
//!
//! ## State Machine
//!
//! ```text
//! [HasRemaining] ──proceed──→ stage[position] (decorated or plain)
//!       │                          │
//!       │                          └── proceed ──→ [HasRemaining] (position + 1)
//!       │
//!       └── no stage left ──→ [Exhausted] ──→ terminal handler
//! ```
//!
//! Each stage receives its own invoker positioned after it. A filter
//! invocation forwards at most once and the position never moves backwards.
//! A decorator may call the wrapped filter again (a retry), and every such
//! call gets a fresh forwarding budget. The entry point
//! [`FilterInvoker::process`] consumes the invoker, so a traversal cannot be
//! restarted.

use crate::decorator::FilterDecorator;
use crate::error::{PipelineError, PipelineResult};
use crate::exchange::{ExchangeId, MessageExchange};
use crate::filter::{Filter, FilterKind, TerminalHandler};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// One record of a built chain: the filter, the kind it was registered under,
/// and the decorator resolved for that kind at build time.
pub(crate) struct Stage {
    pub(crate) kind: FilterKind,
    pub(crate) filter: Arc<dyn Filter>,
    pub(crate) decorator: Option<Arc<dyn FilterDecorator>>,
}

/// Immutable chain shared by every exchange of a pipeline.
pub(crate) struct Chain {
    /// Stages in traversal order (reverse of declaration order).
    pub(crate) stages: Vec<Stage>,
    pub(crate) terminal: Arc<dyn TerminalHandler>,
}

/// Per-exchange driver of the filter chain.
pub struct FilterInvoker {
    chain: Arc<Chain>,
    /// Index of the next stage to dispatch. Only ever increases.
    position: usize,
    /// Set once the current filter invocation has forwarded.
    forwarded: bool,
    /// Forwards across every invocation of the owning stage.
    forwards: u32,
}

impl FilterInvoker {
    pub(crate) fn new(chain: Arc<Chain>) -> Self {
        Self {
            chain,
            position: 0,
            forwarded: false,
            forwards: 0,
        }
    }

    fn child(chain: Arc<Chain>, position: usize) -> Self {
        Self {
            chain,
            position,
            forwarded: false,
            forwards: 0,
        }
    }

    /// Run the whole traversal for `exchange`.
    ///
    /// # Errors
    ///
    /// Any error raised by a filter, decorator or the terminal handler,
    /// unchanged.
    pub async fn process(mut self, exchange: MessageExchange) -> PipelineResult<MessageExchange> {
        self.proceed(exchange).await
    }

    /// Hand `exchange` to the remainder of the chain and wait for it to settle.
    ///
    /// Dispatches the next stage through its decorator when one is registered
    /// for its kind, or runs the terminal handler once no stage remains.
    ///
    /// # Errors
    ///
    /// - `PipelineError::AlreadyForwarded` if the current filter invocation
    ///   already forwarded
    /// - `PipelineError::ExchangeSubstituted` if downstream returned a
    ///   different exchange
    /// - any error raised downstream, unchanged
    pub async fn proceed(&mut self, exchange: MessageExchange) -> PipelineResult<MessageExchange> {
        if self.forwarded {
            return Err(PipelineError::AlreadyForwarded {
                kind: self.owner_name().to_string(),
            });
        }
        self.forwarded = true;
        self.forwards += 1;

        let chain = Arc::clone(&self.chain);
        let expected = exchange.id();

        let Some(stage) = chain.stages.get(self.position) else {
            trace!(exchange_id = %expected, "Filter chain exhausted, invoking terminal handler");
            let settled = chain.terminal.handle(exchange).await?;
            return same_exchange("terminal", expected, settled);
        };

        let mut next = Self::child(Arc::clone(&chain), self.position + 1);

        trace!(
            exchange_id = %expected,
            filter = %stage.kind,
            decorated = stage.decorator.is_some(),
            "Dispatching filter"
        );

        let settled = match &stage.decorator {
            Some(decorator) => {
                let wrapped = Invocation {
                    filter: stage.filter.as_ref(),
                };
                decorator.process(&wrapped, exchange, &mut next).await?
            }
            None => stage.filter.process(exchange, &mut next).await?,
        };

        if next.forwards == 0 {
            debug!(
                exchange_id = %expected,
                filter = %stage.kind,
                faulted = settled.is_faulted(),
                "Filter short-circuited exchange"
            );
        }

        same_exchange(stage.kind.name(), expected, settled)
    }

    /// Kind of the stage this invoker was handed to, `None` for the entry
    /// invoker of a traversal.
    #[must_use]
    pub fn stage(&self) -> Option<FilterKind> {
        self.position
            .checked_sub(1)
            .and_then(|index| self.chain.stages.get(index))
            .map(|stage| stage.kind)
    }

    /// Number of filters left before the terminal handler.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chain.stages.len().saturating_sub(self.position)
    }

    /// True once this invoker has handed its exchange downstream.
    #[must_use]
    pub fn has_forwarded(&self) -> bool {
        self.forwards > 0
    }

    /// Number of times downstream was entered through this invoker. Above one
    /// only when a decorator re-invoked the wrapped filter.
    #[must_use]
    pub fn forward_count(&self) -> u32 {
        self.forwards
    }

    fn owner_name(&self) -> &'static str {
        self.stage().map_or("pipeline", |kind| kind.name())
    }
}

impl fmt::Debug for FilterInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterInvoker")
            .field("stage", &self.stage())
            .field("remaining", &self.remaining())
            .field("forwards", &self.forwards)
            .finish()
    }
}

/// The filter as a decorator sees it. Each call is a new invocation of the
/// wrapped filter and reopens the invoker's forwarding budget.
struct Invocation<'a> {
    filter: &'a dyn Filter,
}

#[async_trait]
impl Filter for Invocation<'_> {
    async fn process(
        &self,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange> {
        invoker.forwarded = false;
        self.filter.process(exchange, invoker).await
    }
}

fn same_exchange(
    stage: &str,
    expected: ExchangeId,
    settled: MessageExchange,
) -> PipelineResult<MessageExchange> {
    if settled.id() == expected {
        Ok(settled)
    } else {
        Err(PipelineError::ExchangeSubstituted {
            stage: stage.to_string(),
            expected,
            actual: settled.id(),
        })
    }
}
