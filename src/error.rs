//! Crate-level error types.
//!
//! Worker-internal failures stay inside the worker and are reported through
//! logging and the exception handler. `BridgeError` covers what escapes to the
//! owner of a pool: configuration problems, pool startup/shutdown failures and
//! synchronous publish failures.

use thiserror::Error;

use crate::messaging::MessagingError;
use crate::pool::BarrierError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Pool startup failed: {failed} of {total} workers did not become ready")]
    StartupFailed { failed: usize, total: usize },

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl BridgeError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// True when the error originated from a failed pool startup
    pub fn is_startup_failure(&self) -> bool {
        matches!(self, Self::StartupFailed { .. })
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::ConfigurationError(err.to_string())
    }
}

impl From<BarrierError> for BridgeError {
    fn from(err: BarrierError) -> Self {
        BridgeError::Timeout(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failure_display() {
        let err = BridgeError::StartupFailed {
            failed: 1,
            total: 3,
        };
        assert!(err.is_startup_failure());
        assert_eq!(
            err.to_string(),
            "Pool startup failed: 1 of 3 workers did not become ready"
        );
    }

    #[test]
    fn test_messaging_error_conversion() {
        let err: BridgeError = MessagingError::not_connected("publish").into();
        assert!(matches!(err, BridgeError::Messaging(_)));
        assert!(err.to_string().contains("publish"));
    }
}
