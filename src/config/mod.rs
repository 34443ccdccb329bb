//! # Bridge Configuration
//!
//! Connection coordinates, subscription parameters and pool sizing for one
//! bridge endpoint.
//!
//! ## Sources
//!
//! Configuration is layered by [`ConfigManager`]: built-in defaults, then an
//! optional TOML file, then `NATS_BRIDGE__*` environment variables. An
//! endpoint can also be described by a single URI, see
//! [`BridgeConfig::from_uri`].
//!
//! ```toml
//! [endpoint]
//! servers = ["nats://10.0.0.1:4222", "nats://10.0.0.2:4222"]
//! topic = "orders"
//! queue_name = "workers"
//! max_messages = 500
//!
//! [pool]
//! pool_size = 4
//! startup_timeout_ms = 10000
//! ```

pub mod loader;
pub mod uri;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{defaults, properties};
use crate::error::{BridgeError, Result};
use crate::messaging::{ConnectionFactory, ConnectionProperties, Transport};

pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub endpoint: ConnectionConfig,
    pub pool: PoolConfig,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        self.pool.validate()
    }
}

/// Broker coordinates and subscription parameters for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server URLs, tried in order
    pub servers: Vec<String>,
    /// Subject to subscribe to (consumer) or publish on (producer)
    pub topic: String,
    /// Queue group for load-balanced consumers
    pub queue_name: Option<String>,
    /// Auto-unsubscribe after this many deliveries
    pub max_messages: Option<u64>,
    /// Reply subject attached to producer publishes
    pub reply_subject: Option<String>,
    /// Whether the transport may reconnect on its own
    pub reconnect: bool,
    /// Re-resolve coordinates from the environment on disconnect
    pub cloud_mode: bool,
    /// Environment key holding the coordinates in cloud mode
    pub cloud_lookup_key: Option<String>,
    /// Base name for worker connections
    pub connection_name: Option<String>,
    pub verbose: bool,
    pub pedantic: bool,
    pub secure: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_wait_ms: u64,
    pub ping_interval_ms: u64,
    pub max_pings_out: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            servers: vec![defaults::SERVER.to_string()],
            topic: String::new(),
            queue_name: None,
            max_messages: None,
            reply_subject: None,
            reconnect: true,
            cloud_mode: false,
            cloud_lookup_key: None,
            connection_name: None,
            verbose: false,
            pedantic: false,
            secure: false,
            max_reconnect_attempts: defaults::MAX_RECONNECT_ATTEMPTS,
            reconnect_wait_ms: defaults::RECONNECT_WAIT_MS,
            ping_interval_ms: defaults::PING_INTERVAL_MS,
            max_pings_out: defaults::MAX_PINGS_OUT,
        }
    }
}

impl ConnectionConfig {
    /// Convenience constructor for the common case
    pub fn new(servers: &str, topic: impl Into<String>) -> Self {
        Self {
            servers: crate::messaging::split_servers(servers),
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_max_messages(mut self, max_messages: u64) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    pub fn with_reply_subject(mut self, reply_subject: impl Into<String>) -> Self {
        self.reply_subject = Some(reply_subject.into());
        self
    }

    /// Enable cloud mode with the given lookup key; disables transport reconnect
    pub fn with_cloud_lookup(mut self, lookup_key: impl Into<String>) -> Self {
        self.cloud_mode = true;
        self.cloud_lookup_key = Some(lookup_key.into());
        self.reconnect = false;
        self
    }

    pub fn servers_string(&self) -> String {
        self.servers.join(",")
    }

    /// Opaque client settings handed to the transport
    pub fn create_properties(&self) -> ConnectionProperties {
        ConnectionProperties::new()
            .with(properties::VERBOSE, self.verbose)
            .with(properties::PEDANTIC, self.pedantic)
            .with(properties::SECURE, self.secure)
            .with(properties::RECONNECT_ALLOWED, self.reconnect)
            .with(properties::MAX_RECONNECT_ATTEMPTS, self.max_reconnect_attempts)
            .with(properties::RECONNECT_WAIT_MS, self.reconnect_wait_ms)
            .with(properties::PING_INTERVAL_MS, self.ping_interval_ms)
            .with(properties::MAX_PINGS_OUT, self.max_pings_out)
    }

    /// Factory for one worker's connection
    pub fn connection_factory(
        &self,
        transport: Arc<dyn Transport>,
        worker_name: &str,
    ) -> ConnectionFactory {
        let name = match &self.connection_name {
            Some(base) => format!("{base}-{worker_name}"),
            None => worker_name.to_string(),
        };
        ConnectionFactory::new(transport, self.create_properties())
            .with_servers(self.servers.clone())
            .with_reconnect_allowed(self.reconnect && !self.cloud_mode)
            .with_connection_name(name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.iter().all(|s| s.trim().is_empty()) {
            return Err(BridgeError::configuration(
                "endpoint.servers must contain at least one server",
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(BridgeError::configuration("endpoint.topic must not be empty"));
        }
        if self.max_messages == Some(0) {
            return Err(BridgeError::configuration(
                "endpoint.max_messages must be at least 1 when set",
            ));
        }
        if self.cloud_mode
            && self
                .cloud_lookup_key
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(BridgeError::configuration(
                "endpoint.cloud_lookup_key is required in cloud mode",
            ));
        }
        Ok(())
    }
}

/// Pool sizing and lifecycle timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub pool_size: usize,
    /// Upper bound on waiting for all workers to become ready; `None` waits forever
    pub startup_timeout_ms: Option<u64>,
    /// Upper bound on waiting for all workers to stop; `None` waits forever
    pub shutdown_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: defaults::POOL_SIZE,
            startup_timeout_ms: Some(defaults::STARTUP_TIMEOUT_MS),
            shutdown_timeout_ms: Some(defaults::SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl PoolConfig {
    pub fn with_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(BridgeError::configuration("pool.pool_size must be at least 1"));
        }
        Ok(())
    }
}
