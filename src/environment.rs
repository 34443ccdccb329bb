//! Runtime environment lookup used to re-resolve broker coordinates.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::constants::{NATS_SCHEME, TCP_SCHEME};
use crate::messaging::{MessagingError, MessagingResult};

/// Source of connection coordinates keyed by name
pub trait EnvironmentLookup: Send + Sync + fmt::Debug + 'static {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl EnvironmentLookup for ProcessEnvironment {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.trim().is_empty())
    }
}

/// In-memory lookup table, mutable at runtime
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    values: RwLock<HashMap<String, String>>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl EnvironmentLookup for StaticEnvironment {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// Rewrite `tcp://` to `nats://` and add the scheme where missing
///
/// Accepts a comma-separated list and returns one in the same form.
pub fn normalize_coordinates(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .filter(|server| !server.is_empty())
        .map(|server| {
            let lower = server.to_ascii_lowercase();
            if lower.starts_with(TCP_SCHEME) {
                format!("{NATS_SCHEME}{}", &server[TCP_SCHEME.len()..])
            } else if server.contains("://") {
                server.to_string()
            } else {
                format!("{NATS_SCHEME}{server}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Look up `key` and normalize the coordinates found there
pub fn resolve_coordinates(env: &dyn EnvironmentLookup, key: &str) -> MessagingResult<String> {
    let raw = env
        .lookup(key)
        .ok_or_else(|| MessagingError::recovery(key, "no coordinates found in environment"))?;
    let servers = normalize_coordinates(&raw);
    if servers.is_empty() {
        return Err(MessagingError::recovery(key, "coordinates are empty"));
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_coordinates() {
        assert_eq!(normalize_coordinates("tcp://10.0.0.1:4222"), "nats://10.0.0.1:4222");
        assert_eq!(normalize_coordinates("TCP://host:4222"), "nats://host:4222");
        assert_eq!(
            normalize_coordinates("host-a:4222, nats://host-b:4222"),
            "nats://host-a:4222,nats://host-b:4222"
        );
    }

    #[test]
    fn test_resolve_coordinates() {
        let env = StaticEnvironment::new().with("ORDERS_URI", "tcp://10.0.0.9:4222");
        assert_eq!(
            resolve_coordinates(&env, "ORDERS_URI").unwrap(),
            "nats://10.0.0.9:4222"
        );

        let missing = resolve_coordinates(&env, "BILLING_URI");
        assert!(matches!(missing, Err(MessagingError::Recovery { .. })));

        env.set("BLANK_URI", " , ");
        assert!(resolve_coordinates(&env, "BLANK_URI").is_err());
    }
}
