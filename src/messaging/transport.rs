//! # Transport Traits
//!
//! Provider-agnostic contract for the broker client library that sessions sit
//! on. A transport owns the wire protocol, its own message dispatch tasks and
//! its own reconnect policy; the session only sees the operations and events
//! defined here.
//!
//! ```text
//! Transport::connect ──→ TransportConnection ──→ TransportSubscription
//!        │                      │                        │
//!        └─ TransportEventHandler (disconnected / reconnected / closed / async error)
//!                               └─ MessageHandler (one call per delivered message)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::MessagingError;
use super::message::{BrokerMessage, SubscriptionId};
use super::MessagingResult;

/// Opaque key/value configuration handed to a transport without inspection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties(BTreeMap<String, String>);

impl ConnectionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Everything a transport needs to open one connection
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Candidate server URLs, tried in order
    pub servers: Vec<String>,
    /// Whether the transport may reconnect on its own after a disconnect
    pub reconnect_allowed: bool,
    /// Name reported to the broker and used in logs
    pub connection_name: Option<String>,
    /// Remaining client settings, passed through unexamined
    pub properties: ConnectionProperties,
}

impl ConnectOptions {
    /// Comma-joined server list for logs and errors
    pub fn servers_display(&self) -> String {
        self.servers.join(",")
    }
}

/// Details attached to a connection lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Server the connection was (or is now) attached to
    pub server: Option<String>,
    /// Name of the connection that raised the event
    pub connection_name: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ConnectionEvent {
    pub fn new(server: Option<String>, connection_name: Option<String>) -> Self {
        Self {
            server,
            connection_name,
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{server={}, connection={}, at={}}}",
            self.server.as_deref().unwrap_or("-"),
            self.connection_name.as_deref().unwrap_or("-"),
            self.occurred_at.to_rfc3339()
        )
    }
}

/// Lifecycle events raised by a transport connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Disconnected(ConnectionEvent),
    Reconnected(ConnectionEvent),
    Closed(ConnectionEvent),
    AsyncError(MessagingError),
}

impl TransportEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disconnected(_) => "disconnected",
            Self::Reconnected(_) => "reconnected",
            Self::Closed(_) => "closed",
            Self::AsyncError(_) => "async_error",
        }
    }
}

/// Receiver of connection lifecycle events
///
/// Events for one connection are delivered in order, on a task owned by the
/// transport.
#[async_trait]
pub trait TransportEventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: TransportEvent);
}

/// Receiver of messages for one subscription
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, message: BrokerMessage, subscription: SubscriptionId);
}

/// Factory for connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection, registering `events` for its lifecycle events
    async fn connect(
        &self,
        options: ConnectOptions,
        events: Arc<dyn TransportEventHandler>,
    ) -> MessagingResult<Arc<dyn TransportConnection>>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// One physical broker connection
#[async_trait]
pub trait TransportConnection: Send + Sync + 'static {
    /// Hand a message to the transport's outbound buffer
    async fn publish(&self, message: BrokerMessage) -> MessagingResult<()>;

    /// Block until everything published so far has reached the broker
    async fn flush(&self) -> MessagingResult<()>;

    /// Start an asynchronous subscription delivering to `handler`
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<Arc<dyn TransportSubscription>>;

    /// Close the connection; raises a `Closed` event the first time
    async fn close(&self) -> MessagingResult<()>;

    fn is_connected(&self) -> bool;

    /// Server currently attached to, if connected
    fn connected_server(&self) -> Option<String>;
}

/// One active subscription on a connection
#[async_trait]
pub trait TransportSubscription: Send + Sync + 'static {
    fn id(&self) -> SubscriptionId;

    fn subject(&self) -> &str;

    fn queue_group(&self) -> Option<&str>;

    /// False once the subscription ended, by request or by reaching its limit
    fn is_active(&self) -> bool;

    /// Remove the subscription after `max` total deliveries
    async fn auto_unsubscribe(&self, max: u64) -> MessagingResult<()>;

    /// Remove the subscription now
    async fn unsubscribe(&self) -> MessagingResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_are_ordered_and_stringly() {
        let props = ConnectionProperties::new()
            .with("verbose", false)
            .with("max_pings_out", 2);
        assert_eq!(props.get("verbose"), Some("false"));
        assert_eq!(props.get("max_pings_out"), Some("2"));
        assert_eq!(props.len(), 2);
        let keys: Vec<&String> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["max_pings_out", "verbose"]);
    }

    #[test]
    fn test_event_kind_names() {
        let event = ConnectionEvent::new(Some("nats://a:4222".into()), None);
        assert_eq!(TransportEvent::Disconnected(event.clone()).kind(), "disconnected");
        assert_eq!(TransportEvent::Closed(event).kind(), "closed");
        assert_eq!(
            TransportEvent::AsyncError(MessagingError::transport("slow consumer")).kind(),
            "async_error"
        );
    }
}
