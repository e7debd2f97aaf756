//! # Pipeline
//!
//! Build-time assembly of a filter chain. Filters are declared outer concern
//! first; the built chain stores them reversed, so the last declared filter
//! runs first and the first declared filter runs right before the terminal
//! handler. Decorators are resolved per stage here, once.

use crate::decorator::{DecoratorRegistry, FilterDecorator};
use crate::error::PipelineResult;
use crate::exchange::MessageExchange;
use crate::filter::{Filter, FilterKind, TerminalHandler};
use crate::invoker::{Chain, FilterInvoker, Stage};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Collects filters and decorators, then builds a [`Pipeline`].
///
/// The builder starts with an empty decorator registry, so a pipeline built
/// without decorators behaves exactly like one built with an empty registry.
#[derive(Default)]
pub struct PipelineBuilder {
    filters: Vec<(FilterKind, Arc<dyn Filter>)>,
    registry: DecoratorRegistry,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the next filter, registered under `kind`.
    #[must_use]
    pub fn filter<F>(self, kind: FilterKind, filter: F) -> Self
    where
        F: Filter + 'static,
    {
        self.filter_arc(kind, Arc::new(filter))
    }

    /// Declare a shared filter instance.
    #[must_use]
    pub fn filter_arc(mut self, kind: FilterKind, filter: Arc<dyn Filter>) -> Self {
        self.filters.push((kind, filter));
        self
    }

    /// Register a decorator for every filter of `kind`.
    #[must_use]
    pub fn decorate<D>(self, kind: FilterKind, decorator: D) -> Self
    where
        D: FilterDecorator + 'static,
    {
        self.decorate_arc(kind, Arc::new(decorator))
    }

    #[must_use]
    pub fn decorate_arc(mut self, kind: FilterKind, decorator: Arc<dyn FilterDecorator>) -> Self {
        self.registry.register(kind, decorator);
        self
    }

    /// Merge a prepared registry; its entries replace earlier registrations.
    #[must_use]
    pub fn decorators(mut self, registry: DecoratorRegistry) -> Self {
        self.registry.extend(registry);
        self
    }

    /// Build the pipeline around `terminal`.
    #[must_use]
    pub fn build<T>(self, terminal: T) -> Pipeline
    where
        T: TerminalHandler + 'static,
    {
        self.build_arc(Arc::new(terminal))
    }

    #[must_use]
    pub fn build_arc(self, terminal: Arc<dyn TerminalHandler>) -> Pipeline {
        let Self { filters, registry } = self;

        let stages: Vec<Stage> = filters
            .into_iter()
            .rev()
            .map(|(kind, filter)| Stage {
                kind,
                decorator: registry.get(kind).cloned(),
                filter,
            })
            .collect();

        debug!(
            filters = stages.len(),
            decorated = stages.iter().filter(|s| s.decorator.is_some()).count(),
            "Pipeline built"
        );

        Pipeline {
            chain: Arc::new(Chain { stages, terminal }),
        }
    }
}

/// A built filter chain. Cheap to clone; clones share the chain.
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<Chain>,
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Fresh invoker for one exchange.
    #[must_use]
    pub fn invoker(&self) -> FilterInvoker {
        FilterInvoker::new(Arc::clone(&self.chain))
    }

    /// Process one exchange with a fresh invoker.
    ///
    /// # Errors
    ///
    /// Any error raised inside the chain, unchanged.
    pub async fn process(&self, exchange: MessageExchange) -> PipelineResult<MessageExchange> {
        self.invoker().process(exchange).await
    }

    /// Number of filters in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.stages.is_empty()
    }

    /// Filter kinds in the order they run.
    #[must_use]
    pub fn traversal_order(&self) -> Vec<FilterKind> {
        self.chain.stages.iter().map(|stage| stage.kind).collect()
    }

    /// True if any stage of `kind` runs through a decorator.
    #[must_use]
    pub fn is_decorated(&self, kind: FilterKind) -> bool {
        self.chain
            .stages
            .iter()
            .any(|stage| stage.kind == kind && stage.decorator.is_some())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("traversal_order", &self.traversal_order())
            .finish()
    }
}
