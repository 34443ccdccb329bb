//! Endpoint URI parsing.
//!
//! ```text
//! nats://<host:port>[,<host:port>...]?topic=orders&queueName=workers&poolSize=3
//! nats://apcera:<service>?topic=orders
//! ```
//!
//! The `apcera:<service>` form resolves the servers from the environment key
//! `<SERVICE>_URI` and turns on cloud mode.

use tracing::debug;

use super::{BridgeConfig, ConnectionConfig, PoolConfig};
use crate::constants::{env, CLOUD_PREFIX, NATS_SCHEME};
use crate::environment::{resolve_coordinates, EnvironmentLookup};
use crate::error::{BridgeError, Result};

impl BridgeConfig {
    /// Build a configuration from an endpoint URI
    pub fn from_uri(uri: &str, environment: &dyn EnvironmentLookup) -> Result<BridgeConfig> {
        let trimmed = uri.trim();
        let remaining = strip_prefix_ignore_case(trimmed, NATS_SCHEME)
            .or_else(|| strip_prefix_ignore_case(trimmed, "nats:"))
            .ok_or_else(|| {
                BridgeError::configuration(format!("endpoint URI must start with nats://: {uri}"))
            })?;

        let (authority, query) = match remaining.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (remaining, None),
        };

        let mut config = BridgeConfig {
            endpoint: ConnectionConfig::default(),
            pool: PoolConfig::default(),
        };

        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                apply_option(&mut config, key, value)?;
            }
        }

        // Cloud resolution runs last so reconnect stays disabled regardless of options
        match strip_prefix_ignore_case(authority, CLOUD_PREFIX) {
            Some(service) => {
                let service = service.trim_end_matches('/');
                if service.is_empty() {
                    return Err(BridgeError::configuration(
                        "cloud endpoint must name a service (apcera:<name>)",
                    ));
                }
                let lookup_key = format!("{}{}", service.to_uppercase(), env::CLOUD_URI_SUFFIX);
                let servers = resolve_coordinates(environment, &lookup_key)?;
                debug!(lookup_key = %lookup_key, servers = %servers, "Resolved cloud endpoint");

                config.endpoint.servers = crate::messaging::split_servers(&servers);
                config.endpoint.cloud_mode = true;
                config.endpoint.cloud_lookup_key = Some(lookup_key);
                config.endpoint.reconnect = false;
            }
            None => {
                config.endpoint.servers = authority
                    .trim_end_matches('/')
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(|host| {
                        if host.contains("://") {
                            host.to_string()
                        } else {
                            format!("{NATS_SCHEME}{host}")
                        }
                    })
                    .collect();
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

fn apply_option(config: &mut BridgeConfig, key: &str, value: &str) -> Result<()> {
    let endpoint = &mut config.endpoint;
    match key {
        "topic" => endpoint.topic = value.to_string(),
        "queueName" => endpoint.queue_name = non_empty(value),
        "maxMessages" => endpoint.max_messages = Some(parse_number(key, value)?),
        "replySubject" => endpoint.reply_subject = non_empty(value),
        "connectionName" => endpoint.connection_name = non_empty(value),
        "reconnect" => endpoint.reconnect = parse_bool(key, value)?,
        "pedantic" => endpoint.pedantic = parse_bool(key, value)?,
        "verbose" => endpoint.verbose = parse_bool(key, value)?,
        "secure" => endpoint.secure = parse_bool(key, value)?,
        "maxReconnectAttempts" => endpoint.max_reconnect_attempts = parse_number(key, value)?,
        "reconnectTimeWait" => endpoint.reconnect_wait_ms = parse_number(key, value)?,
        "pingInterval" => endpoint.ping_interval_ms = parse_number(key, value)?,
        "maxPingsOut" => endpoint.max_pings_out = parse_number(key, value)?,
        "poolSize" => config.pool.pool_size = parse_number(key, value)?,
        other => {
            return Err(BridgeError::configuration(format!(
                "unknown endpoint option: {other}"
            )))
        }
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(BridgeError::configuration(format!(
            "option {key} expects true or false, got {value:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        BridgeError::configuration(format!("option {key} expects a number, got {value:?}"))
    })
}
