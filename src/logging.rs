//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Designed for containerized deployments where logs go to stdout.
//!
//! This module provides:
//! - Console-only logging, plain or JSON lines (`NATS_BRIDGE_LOG_FORMAT=json`)
//! - Environment-based log level configuration (`RUST_LOG` or `NATS_BRIDGE_ENV`)
//! - TTY-aware ANSI color output
//! - A structured logging macro for connector events

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::constants::env;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once; later calls do nothing
///
/// An already-installed global subscriber (from a host application or a test
/// harness) is left in place.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = log_level_for(&environment, std::env::var("RUST_LOG").ok());
        let json = std::env::var(env::LOG_FORMAT)
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let use_ansi = !json && IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                level = %log_level,
                json = json,
                ansi_colors = use_ansi,
                "Console logging initialized"
            );
        }
    });
}

/// Get current environment from `NATS_BRIDGE_ENV`
fn get_environment() -> String {
    std::env::var(env::BRIDGE_ENV).unwrap_or_else(|_| "development".to_string())
}

/// Explicit filter wins; otherwise the environment default
fn log_level_for(environment: &str, explicit: Option<String>) -> String {
    if let Some(level) = explicit.filter(|level| !level.trim().is_empty()) {
        return level.to_lowercase();
    }

    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a connector event with the worker name first
///
/// ```rust,ignore
/// log_connector!(info, "Worker running", worker: "consumer-0", role: "consumer");
/// ```
#[macro_export]
macro_rules! log_connector {
    ($level:ident, $operation:expr, worker: $worker:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            worker = %$worker,
            operation = %$operation,
            $($key = %$value,)*
            "{}", $operation
        );
    };
    ($level:ident, $operation:expr, worker: $worker:expr $(,)?) => {
        tracing::$level!(
            worker = %$worker,
            operation = %$operation,
            "{}", $operation
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(log_level_for("test", None), "debug");
        assert_eq!(log_level_for("development", None), "debug");
        assert_eq!(log_level_for("production", None), "info");
        assert_eq!(log_level_for("unknown", None), "debug");

        assert_eq!(log_level_for("production", Some("WARN".into())), "warn");
        assert_eq!(
            log_level_for("production", Some("nats_bridge=trace".into())),
            "nats_bridge=trace"
        );
        assert_eq!(log_level_for("production", Some("  ".into())), "info");
    }

    #[test]
    fn test_init_is_repeatable() {
        init_tracing();
        init_tracing();
        assert!(TRACING_INITIALIZED.get().is_some());
    }

    #[test]
    fn test_log_connector_macro_compiles() {
        log_connector!(info, "Worker running", worker: "consumer-0");
        log_connector!(debug, "Worker transition", worker: "consumer-0", from: "idle", to: "connecting");
    }
}
