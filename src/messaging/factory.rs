//! Connection factory.
//!
//! Holds the transport together with the coordinates and properties used to
//! open connections. Sessions mutate the servers and the reconnect flag before
//! connecting (cloud mode, recovery); the properties map is passed through.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::transport::{
    ConnectOptions, ConnectionProperties, Transport, TransportConnection, TransportEventHandler,
};
use super::MessagingResult;

#[derive(Clone)]
pub struct ConnectionFactory {
    transport: Arc<dyn Transport>,
    servers: Vec<String>,
    reconnect_allowed: bool,
    connection_name: Option<String>,
    properties: ConnectionProperties,
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("transport", &self.transport.provider_name())
            .field("servers", &self.servers)
            .field("reconnect_allowed", &self.reconnect_allowed)
            .field("connection_name", &self.connection_name)
            .field("properties", &self.properties.len())
            .finish()
    }
}

impl ConnectionFactory {
    pub fn new(transport: Arc<dyn Transport>, properties: ConnectionProperties) -> Self {
        Self {
            transport,
            servers: Vec::new(),
            reconnect_allowed: true,
            connection_name: None,
            properties,
        }
    }

    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers = servers;
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn with_reconnect_allowed(mut self, allowed: bool) -> Self {
        self.reconnect_allowed = allowed;
        self
    }

    /// Replace the server list from a comma-separated string
    pub fn set_servers(&mut self, servers: &str) {
        self.servers = split_servers(servers);
    }

    pub fn set_reconnect_allowed(&mut self, allowed: bool) {
        self.reconnect_allowed = allowed;
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn reconnect_allowed(&self) -> bool {
        self.reconnect_allowed
    }

    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    pub fn options(&self) -> ConnectOptions {
        ConnectOptions {
            servers: self.servers.clone(),
            reconnect_allowed: self.reconnect_allowed,
            connection_name: self.connection_name.clone(),
            properties: self.properties.clone(),
        }
    }

    /// Open a new connection with the current settings
    pub async fn create_connection(
        &self,
        events: Arc<dyn TransportEventHandler>,
    ) -> MessagingResult<Arc<dyn TransportConnection>> {
        let options = self.options();
        debug!(
            provider = self.transport.provider_name(),
            servers = %options.servers_display(),
            reconnect_allowed = options.reconnect_allowed,
            "Creating broker connection"
        );
        self.transport.connect(options, events).await
    }
}

/// Split a comma-separated server list, dropping empty entries
pub fn split_servers(servers: &str) -> Vec<String> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::providers::InMemoryBroker;

    #[test]
    fn test_split_servers() {
        assert_eq!(
            split_servers(" nats://a:4222, ,nats://b:4222 "),
            vec!["nats://a:4222".to_string(), "nats://b:4222".to_string()]
        );
        assert!(split_servers("").is_empty());
    }

    #[test]
    fn test_options_reflect_mutations() {
        let broker = InMemoryBroker::new();
        let mut factory = ConnectionFactory::new(
            Arc::new(broker.transport()),
            ConnectionProperties::new().with("verbose", true),
        )
        .with_servers(vec!["nats://a:4222".into()])
        .with_connection_name("consumer-0");

        factory.set_reconnect_allowed(false);
        factory.set_servers("nats://b:4222,nats://c:4222");

        let options = factory.options();
        assert!(!options.reconnect_allowed);
        assert_eq!(options.servers_display(), "nats://b:4222,nats://c:4222");
        assert_eq!(options.connection_name.as_deref(), Some("consumer-0"));
        assert_eq!(options.properties.get("verbose"), Some("true"));
    }
}
