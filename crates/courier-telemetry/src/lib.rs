//! # Courier Telemetry
//!
//! Observability for the Courier message bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with pretty or JSON output
//! - **Collectors**: statsd-style [`MetricsCollector`] with in-memory,
//!   Prometheus and tag-validating implementations
//! - **Decorator**: [`MetricsDecorator`], a filter decorator that reports
//!   exchange counts, durations and outcomes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config).expect("Failed to init logging");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COURIER_SERVICE_NAME` | `courier` | Service name in logs |
//! | `COURIER_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `COURIER_JSON_LOGS` | `false` | JSON log output |
//! | `COURIER_CONSOLE_OUTPUT` | `true` | Console log output |
//! | `COURIER_METRIC_PREFIX` | `courier` | Metric name prefix |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod collector;
mod config;
mod decorator;
mod logging;
mod metrics;
mod tags;

pub use collector::{
    MetricKind, MetricSample, MetricsCollector, RecordingCollector, DEFAULT_SAMPLE_RATE,
};
pub use config::TelemetryConfig;
pub use decorator::MetricsDecorator;
pub use logging::{init_logging, init_test_logging};
pub use metrics::{encode_metrics, PrometheusCollector, REGISTRY};
pub use tags::{ExchangeTags, TagCheckingCollector, TagExpectations, TagKey, TagViolation};

use thiserror::Error;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TelemetryConfig {
    /// Metrics decorator for `endpoint` using this configuration's prefix.
    pub fn metrics_decorator(
        &self,
        endpoint: impl Into<String>,
        collector: std::sync::Arc<dyn MetricsCollector>,
    ) -> TelemetryResult<MetricsDecorator> {
        if self.metric_prefix.is_empty() {
            return Err(TelemetryError::Config(
                "metric prefix must not be empty".to_string(),
            ));
        }
        Ok(MetricsDecorator::new(endpoint, collector).with_prefix(self.metric_prefix.clone()))
    }
}
