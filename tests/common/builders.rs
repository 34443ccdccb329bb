use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use nats_bridge::config::{BridgeConfig, ConnectionConfig, PoolConfig};
use nats_bridge::pipeline::{ExceptionHandler, Exchange, PipelineError, ProcessingError, Processor};

/// Processor that records every payload it sees
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    payloads: Mutex<Vec<String>>,
    workers: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().clone()
    }

    /// Distinct subscription ids that delivered messages
    pub fn distinct_subscriptions(&self) -> usize {
        let mut seen = self.workers.lock().clone();
        seen.sort();
        seen.dedup();
        seen.len()
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), ProcessingError> {
        let body = exchange
            .message
            .payload_str()
            .unwrap_or_default()
            .to_string();
        self.payloads.lock().push(body.clone());
        self.workers
            .lock()
            .push(exchange.subscription_id.to_string());
        if body.starts_with("reject") {
            return Err(ProcessingError::new(format!("rejected {body}")));
        }
        Ok(())
    }
}

/// Exception handler that records contexts and messages
#[derive(Debug, Default)]
pub struct RecordingExceptionHandler {
    entries: Mutex<Vec<(String, String)>>,
}

impl RecordingExceptionHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }
}

impl ExceptionHandler for RecordingExceptionHandler {
    fn handle(&self, context: &str, _exchange: Option<&Exchange>, error: &PipelineError) {
        self.entries
            .lock()
            .push((context.to_string(), error.to_string()));
    }
}

/// Bridge configuration for one topic on the given servers
pub fn bridge_config(servers: &str, topic: &str, pool_size: usize) -> BridgeConfig {
    BridgeConfig {
        endpoint: ConnectionConfig::new(servers, topic),
        pool: PoolConfig {
            pool_size,
            startup_timeout_ms: Some(2_000),
            shutdown_timeout_ms: Some(2_000),
        },
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let in-flight deliveries drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
