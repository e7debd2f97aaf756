//! Bus endpoint configuration.

use std::env;
use std::time::Duration;

use crate::error::{BusError, BusResult};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Default time a request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one bus endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Endpoint name; the reply address of this bus
    pub endpoint: String,

    /// How long `request` waits for the correlated reply
    pub request_timeout: Duration,

    /// Inbox capacity before senders wait
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: "courier".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BusConfig {
    /// Default configuration for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COURIER_ENDPOINT`: Endpoint name (default: courier)
    /// - `COURIER_REQUEST_TIMEOUT_MS`: Reply wait in milliseconds (default: 30000)
    /// - `COURIER_CHANNEL_CAPACITY`: Inbox capacity (default: 1000)
    ///
    /// Unparseable numbers fall back to the defaults.
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("COURIER_ENDPOINT").unwrap_or_else(|_| "courier".to_string()),

            request_timeout: env::var("COURIER_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),

            channel_capacity: env::var("COURIER_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn validate(&self) -> BusResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(BusError::Config("endpoint must not be empty".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(BusError::Config("channel capacity must be positive".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(BusError::Config("request timeout must be positive".to_string()));
        }
        Ok(())
    }
}
