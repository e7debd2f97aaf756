//! # Filter Decorator Capability
//!
//! A decorator intercepts every stage whose filter was registered under a
//! given [`crate::FilterKind`]. It receives the wrapped filter explicitly, so
//! one decorator instance serves all filters of that kind for the lifetime of
//! the pipeline.

use crate::error::PipelineResult;
use crate::exchange::MessageExchange;
use crate::filter::{Filter, FilterKind};
use crate::invoker::FilterInvoker;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Wraps the processing of a filter without the filter's cooperation.
///
/// To let the wrapped filter run, call `filter.process(exchange, invoker)`.
/// Each such call is one invocation of the filter and may forward once; a
/// second `proceed` within the same call is rejected with
/// `PipelineError::AlreadyForwarded`. Calling `filter.process` again, for
/// example to retry after a downstream failure, starts a new invocation.
#[async_trait]
pub trait FilterDecorator: Send + Sync {
    async fn process(
        &self,
        filter: &dyn Filter,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange>;
}

/// Mapping from filter kind to the single decorator wrapping it.
///
/// A registry is pipeline configuration: it is resolved into the chain once
/// when the pipeline is built and is never consulted per exchange.
#[derive(Clone, Default)]
pub struct DecoratorRegistry {
    decorators: HashMap<FilterKind, Arc<dyn FilterDecorator>>,
}

impl DecoratorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decorator` for `kind`. A later registration for the same
    /// kind replaces the earlier one, which is returned.
    pub fn register(
        &mut self,
        kind: FilterKind,
        decorator: Arc<dyn FilterDecorator>,
    ) -> Option<Arc<dyn FilterDecorator>> {
        let previous = self.decorators.insert(kind, decorator);
        if previous.is_some() {
            debug!(filter = %kind, "Decorator replaced by later registration");
        }
        previous
    }

    #[must_use]
    pub fn get(&self, kind: FilterKind) -> Option<&Arc<dyn FilterDecorator>> {
        self.decorators.get(&kind)
    }

    #[must_use]
    pub fn contains(&self, kind: FilterKind) -> bool {
        self.decorators.contains_key(&kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Registered kinds, sorted by name.
    #[must_use]
    pub fn kinds(&self) -> Vec<FilterKind> {
        let mut kinds: Vec<_> = self.decorators.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Merge `other` into this registry; entries from `other` win.
    pub fn extend(&mut self, other: DecoratorRegistry) {
        for (kind, decorator) in other.decorators {
            self.register(kind, decorator);
        }
    }
}

impl fmt::Debug for DecoratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
