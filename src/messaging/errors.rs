//! # Messaging Error Types
//!
//! Error taxonomy for connection sessions and the transports beneath them,
//! using thiserror for structured variants instead of `Box<dyn Error>`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Connection error ({servers}): {message}")]
    Connection { servers: String, message: String },

    #[error("Not connected: cannot {operation}")]
    NotConnected { operation: String },

    #[error("Subscribe failed for subject {subject}: {message}")]
    Subscribe { subject: String, message: String },

    #[error("Publish failed for subject {subject}: {message}")]
    Publish { subject: String, message: String },

    #[error("Flush failed: {message}")]
    Flush { message: String },

    #[error("Recovery failed using lookup key {lookup_key}: {message}")]
    Recovery { lookup_key: String, message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(servers: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            servers: servers.into(),
            message: message.into(),
        }
    }

    /// Create a not-connected error for the named operation
    pub fn not_connected(operation: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
        }
    }

    /// Create a subscribe error
    pub fn subscribe(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a flush error
    pub fn flush(message: impl Into<String>) -> Self {
        Self::Flush {
            message: message.into(),
        }
    }

    /// Create a cloud recovery error
    pub fn recovery(lookup_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Recovery {
            lookup_key: lookup_key.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether this error means the connection itself is unusable
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::NotConnected { .. })
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
