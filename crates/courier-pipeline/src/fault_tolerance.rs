//! # Fault Tolerance Filter
//!
//! Converts downstream failures into faulted exchanges, and bounds the
//! downstream call with an optional deadline.
//!
//! The invoker never catches anything. This filter is where the rejected
//! channel (`Err`) becomes the faulted channel (`Ok` with a faulted
//! exchange). Contract violations are not converted; they stay `Err`.

use crate::error::PipelineResult;
use crate::exchange::{FaultReason, MessageExchange};
use crate::filter::{Filter, FilterKind};
use crate::invoker::FilterInvoker;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Races the remainder of the chain against an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct FaultToleranceFilter {
    timeout: Option<Duration>,
}

impl FaultToleranceFilter {
    pub const KIND: FilterKind = FilterKind::new("fault-tolerance");

    /// Convert failures only; no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert failures and fault the exchange if downstream has not settled
    /// within `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Filter for FaultToleranceFilter {
    async fn process(
        &self,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> PipelineResult<MessageExchange> {
        // Downstream owns the exchange while it runs; keep a same-id copy to
        // fault if downstream never hands it back.
        let snapshot = exchange.clone();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, invoker.proceed(exchange)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        exchange_id = %snapshot.id(),
                        timeout_ms = limit.as_millis() as u64,
                        "Downstream did not settle before deadline"
                    );
                    let mut faulted = snapshot;
                    faulted.fault(FaultReason::Timeout(limit));
                    return Ok(faulted);
                }
            },
            None => invoker.proceed(exchange).await,
        };

        match outcome {
            Ok(settled) => Ok(settled),
            Err(err) if err.is_contract_violation() => Err(err),
            Err(err) => {
                warn!(
                    exchange_id = %snapshot.id(),
                    error = %err,
                    "Downstream failure converted to fault"
                );
                let mut faulted = snapshot;
                faulted.fault(FaultReason::Failure(err.to_string()));
                Ok(faulted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{terminal_fn, ExchangeState, Message, Pipeline, PipelineError};

    fn exchange() -> MessageExchange {
        MessageExchange::request(Message::new("dummy.request", serde_json::json!({ "num": 13 })))
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_faults_exchange() {
        let pipeline = Pipeline::builder()
            .filter(
                FaultToleranceFilter::KIND,
                FaultToleranceFilter::with_timeout(Duration::from_secs(1)),
            )
            .build(terminal_fn(|exchange: MessageExchange| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, PipelineError>(exchange)
            }));

        let original = exchange();
        let id = original.id();
        let settled = pipeline.process(original).await.unwrap();

        assert_eq!(settled.id(), id);
        assert_eq!(
            settled.state(),
            &ExchangeState::Faulted(FaultReason::Timeout(Duration::from_secs(1)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_within_deadline() {
        let pipeline = Pipeline::builder()
            .filter(
                FaultToleranceFilter::KIND,
                FaultToleranceFilter::with_timeout(Duration::from_secs(5)),
            )
            .build(terminal_fn(|mut exchange: MessageExchange| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                exchange.complete();
                Ok::<_, PipelineError>(exchange)
            }));

        let settled = pipeline.process(exchange()).await.unwrap();
        assert!(settled.is_completed());
    }

    #[tokio::test]
    async fn test_error_converted_to_fault() {
        let pipeline = Pipeline::builder()
            .filter(FaultToleranceFilter::KIND, FaultToleranceFilter::new())
            .build(terminal_fn(|_exchange: MessageExchange| async move {
                Err::<MessageExchange, _>(PipelineError::terminal("broker unreachable"))
            }));

        let settled = pipeline.process(exchange()).await.unwrap();
        assert!(matches!(
            settled.fault_reason(),
            Some(FaultReason::Failure(reason)) if reason.contains("broker unreachable")
        ));
    }

    #[tokio::test]
    async fn test_contract_violation_not_converted() {
        let pipeline = Pipeline::builder()
            .filter(FaultToleranceFilter::KIND, FaultToleranceFilter::new())
            .build(terminal_fn(|_exchange: MessageExchange| async move {
                // A different exchange than the one handed in.
                Ok::<_, PipelineError>(MessageExchange::publish(Message::new(
                    "forged",
                    serde_json::Value::Null,
                )))
            }));

        let err = pipeline.process(exchange()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ExchangeSubstituted { .. }));
    }
}
