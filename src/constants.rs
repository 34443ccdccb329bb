//! # Constants
//!
//! Header names, defaults and environment variable names shared across the
//! crate.

/// Header keys set on every inbound exchange
pub mod headers {
    /// Receive time in milliseconds since the Unix epoch
    pub const MESSAGE_TIMESTAMP: &str = "nats.message_timestamp";
    /// Identifier of the subscription that delivered the message
    pub const SUBSCRIPTION_ID: &str = "nats.subscription_id";
    pub const SUBJECT: &str = "nats.subject";
    pub const REPLY_TO: &str = "nats.reply_to";
}

/// Default values for configuration
pub mod defaults {
    pub const SERVER: &str = "nats://localhost:4222";
    pub const POOL_SIZE: usize = 1;
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 60;
    pub const RECONNECT_WAIT_MS: u64 = 2_000;
    pub const PING_INTERVAL_MS: u64 = 120_000;
    pub const MAX_PINGS_OUT: u32 = 2;
    pub const STARTUP_TIMEOUT_MS: u64 = 30_000;
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
}

/// Keys of the opaque properties map handed to the connection factory
pub mod properties {
    pub const VERBOSE: &str = "verbose";
    pub const PEDANTIC: &str = "pedantic";
    pub const SECURE: &str = "secure";
    pub const RECONNECT_ALLOWED: &str = "reconnect_allowed";
    pub const MAX_RECONNECT_ATTEMPTS: &str = "max_reconnect_attempts";
    pub const RECONNECT_WAIT_MS: &str = "reconnect_wait_ms";
    pub const PING_INTERVAL_MS: &str = "ping_interval_ms";
    pub const MAX_PINGS_OUT: &str = "max_pings_out";
}

/// Environment variables read by the crate
pub mod env {
    /// Prefix for configuration overrides (`NATS_BRIDGE__POOL__POOL_SIZE=3`)
    pub const CONFIG_PREFIX: &str = "NATS_BRIDGE";
    /// Separator between nested configuration keys
    pub const CONFIG_SEPARATOR: &str = "__";
    /// Deployment environment (`test`, `development`, `production`)
    pub const BRIDGE_ENV: &str = "NATS_BRIDGE_ENV";
    /// `json` switches log output to JSON lines
    pub const LOG_FORMAT: &str = "NATS_BRIDGE_LOG_FORMAT";
    /// Suffix appended to a cloud service name to form its lookup key
    pub const CLOUD_URI_SUFFIX: &str = "_URI";
}

/// Scheme prefix accepted for cloud coordinates and rewritten
pub const TCP_SCHEME: &str = "tcp://";
/// Scheme the transport expects
pub const NATS_SCHEME: &str = "nats://";
/// Endpoint prefix selecting cloud mode (`nats://apcera:orders`)
pub const CLOUD_PREFIX: &str = "apcera:";
