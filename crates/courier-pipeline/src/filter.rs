//! # Filter Capability
//!
//! Filters are the only building block of a pipeline. A filter may forward
//! the exchange downstream through [`FilterInvoker::proceed`] (at most once),
//! run logic after the downstream subtree settles by awaiting that call, or
//! short-circuit by settling the exchange itself.

use crate::error::PipelineResult;
use crate::exchange::MessageExchange;
use crate::invoker::FilterInvoker;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;

/// Explicit identity token a filter is registered under.
///
/// Decorators are addressed by kind. Every filter registered with the same
/// kind is wrapped by the same decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterKind(&'static str);

impl FilterKind {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A composable processing step.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Process `exchange`, optionally handing it downstream via `invoker`.
    ///
    /// The returned exchange must be the one passed in (possibly mutated) or
    /// the one returned from `invoker.proceed`.
    async fn process(
        &self,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange>;
}

/// Final step run once the filter sequence is exhausted.
#[async_trait]
pub trait TerminalHandler: Send + Sync {
    async fn handle(&self, exchange: MessageExchange) -> PipelineResult<MessageExchange>;
}

/// Leaves the exchange untouched: as a terminal handler it returns it as
/// is, as a filter it forwards it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl TerminalHandler for PassThrough {
    async fn handle(&self, exchange: MessageExchange) -> PipelineResult<MessageExchange> {
        Ok(exchange)
    }
}

#[async_trait]
impl Filter for PassThrough {
    async fn process(
        &self,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange> {
        invoker.proceed(exchange).await
    }
}

/// Terminal handler backed by an async closure.
pub struct FnTerminal<F> {
    handler: F,
}

/// Build a terminal handler from a closure returning a future.
pub fn terminal_fn<F, Fut>(handler: F) -> FnTerminal<F>
where
    F: Fn(MessageExchange) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<MessageExchange>> + Send,
{
    FnTerminal { handler }
}

#[async_trait]
impl<F, Fut> TerminalHandler for FnTerminal<F>
where
    F: Fn(MessageExchange) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<MessageExchange>> + Send,
{
    async fn handle(&self, exchange: MessageExchange) -> PipelineResult<MessageExchange> {
        (self.handler)(exchange).await
    }
}

impl<F> fmt::Debug for FnTerminal<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTerminal").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, PipelineError};

    #[test]
    fn test_filter_kind_identity() {
        const METRICS: FilterKind = FilterKind::new("metrics");
        assert_eq!(METRICS, FilterKind::new("metrics"));
        assert_ne!(METRICS, FilterKind::new("publish"));
        assert_eq!(METRICS.to_string(), "metrics");
    }

    #[tokio::test]
    async fn test_pass_through_returns_exchange() {
        let exchange = MessageExchange::publish(Message::new("a", serde_json::Value::Null));
        let id = exchange.id();
        let settled = PassThrough.handle(exchange).await.unwrap();
        assert_eq!(settled.id(), id);
        assert!(!settled.is_settled());
    }

    #[tokio::test]
    async fn test_terminal_fn_runs_closure() {
        let terminal = terminal_fn(|mut exchange: MessageExchange| async move {
            exchange.complete();
            Ok::<_, PipelineError>(exchange)
        });
        let exchange = MessageExchange::publish(Message::new("a", serde_json::Value::Null));
        let settled = terminal.handle(exchange).await.unwrap();
        assert!(settled.is_completed());
    }
}
