//! Error types for the exchange pipeline
//!
//! An `Err(PipelineError)` is the "rejected" channel: fatal to the exchange
//! being processed. Expected, handled failures are carried on the exchange
//! itself (see [`crate::ExchangeState::Faulted`]) and travel on the `Ok` side.

use crate::exchange::ExchangeId;
use crate::filter::FilterKind;
use thiserror::Error;

/// Boxed error produced by filter or terminal handler code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A filter asked to continue downstream more than once in one invocation.
    #[error("filter `{kind}` forwarded the exchange more than once")]
    AlreadyForwarded { kind: String },

    /// A stage returned a different exchange than the one it was given.
    #[error("stage `{stage}` returned exchange {actual} in place of {expected}")]
    ExchangeSubstituted {
        stage: String,
        expected: ExchangeId,
        actual: ExchangeId,
    },

    /// A filter (or a decorator around it) failed.
    #[error("filter `{kind}` failed: {source}")]
    Filter {
        kind: FilterKind,
        #[source]
        source: BoxError,
    },

    /// The terminal handler failed.
    #[error("terminal handler failed: {source}")]
    Terminal {
        #[source]
        source: BoxError,
    },

    /// A message payload could not be converted to or from its typed form.
    #[error("payload for label `{label}` could not be converted: {source}")]
    Payload {
        label: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// Wrap an arbitrary failure raised by the filter registered as `kind`.
    pub fn filter<E>(kind: FilterKind, err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Filter {
            kind,
            source: err.into(),
        }
    }

    /// Wrap an arbitrary failure raised by a terminal handler.
    pub fn terminal<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Terminal { source: err.into() }
    }

    /// True for errors that signal a broken pipeline contract rather than a
    /// failed unit of work. These are never converted into faulted exchanges.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyForwarded { .. } | Self::ExchangeSubstituted { .. }
        )
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_message() {
        let err = PipelineError::filter(FilterKind::new("validation"), "label missing");
        assert_eq!(
            err.to_string(),
            "filter `validation` failed: label missing"
        );
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_contract_violations() {
        let err = PipelineError::AlreadyForwarded {
            kind: "metrics".to_string(),
        };
        assert!(err.is_contract_violation());

        let err = PipelineError::ExchangeSubstituted {
            stage: "terminal".to_string(),
            expected: ExchangeId::new(),
            actual: ExchangeId::new(),
        };
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_terminal_error_source() {
        let err = PipelineError::terminal("broker unreachable");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("broker unreachable"));
    }
}
