use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::config::BridgeConfig;
use crate::connector::{
    AdapterContext, ConnectionSession, ConnectorAdapter, ConnectorWorker, ProducerAdapter,
    WorkerStatus,
};
use crate::environment::{EnvironmentLookup, ProcessEnvironment};
use crate::error::{BridgeError, Result};
use crate::messaging::Transport;

use super::coordinator::PoolCoordinator;

/// N producer workers; publishes are spread round-robin
#[derive(Debug)]
pub struct ProducerPool {
    coordinator: PoolCoordinator<ProducerAdapter>,
    next: AtomicUsize,
}

impl ProducerPool {
    pub fn new(config: &BridgeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_environment(config, transport, Arc::new(ProcessEnvironment))
    }

    pub fn with_environment(
        config: &BridgeConfig,
        transport: Arc<dyn Transport>,
        environment: Arc<dyn EnvironmentLookup>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = Arc::new(config.endpoint.clone());

        let coordinator = PoolCoordinator::new(
            format!("producer.{}", endpoint.topic),
            config.pool.clone(),
            |name, signals| {
                let session = ConnectionSession::new(
                    name.clone(),
                    endpoint.connection_factory(transport.clone(), &name),
                    endpoint.cloud_mode,
                );
                ProducerAdapter::new(AdapterContext::new(
                    name,
                    endpoint.clone(),
                    session,
                    environment.clone(),
                    signals,
                ))
            },
        )?;

        Ok(Self {
            coordinator,
            next: AtomicUsize::new(0),
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.coordinator.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.coordinator.stop().await
    }

    fn next_worker(&self) -> Result<&Arc<ConnectorWorker<ProducerAdapter>>> {
        if !self.coordinator.is_started() || self.coordinator.is_stopped() {
            return Err(BridgeError::invalid_state(format!(
                "producer pool {} is not running",
                self.coordinator.name()
            )));
        }
        let workers = self.coordinator.workers();
        let index = self.next.fetch_add(1, Ordering::Relaxed) % workers.len();
        Ok(&workers[index])
    }

    /// Publish and flush through the next worker
    pub async fn publish(
        &self,
        subject: &str,
        reply_to: Option<&str>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let worker = self.next_worker()?;
        worker
            .adapter()
            .publish(subject, reply_to, payload.into())
            .await?;
        Ok(())
    }

    /// Publish `payload` on the configured subject and reply subject
    pub async fn send_body(&self, payload: impl Into<Bytes> + Send) -> Result<()> {
        let worker = self.next_worker()?;
        worker.adapter().send_body(payload).await?;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.coordinator.size()
    }

    pub fn workers(&self) -> &[Arc<ConnectorWorker<ProducerAdapter>>] {
        self.coordinator.workers()
    }

    pub fn coordinator(&self) -> &PoolCoordinator<ProducerAdapter> {
        &self.coordinator
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.coordinator.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, PoolConfig};
    use crate::messaging::InMemoryBroker;

    fn config(size: usize) -> BridgeConfig {
        BridgeConfig {
            endpoint: ConnectionConfig::new("nats://a:4222", "orders"),
            pool: PoolConfig::with_size(size),
        }
    }

    #[tokio::test]
    async fn test_publish_round_robins_across_workers() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let pool = ProducerPool::new(&config(3), Arc::new(broker.transport())).unwrap();
        pool.start().await.unwrap();

        for _ in 0..6 {
            pool.publish("orders", None, "x").await.unwrap();
        }

        let published: Vec<u64> = pool.status().iter().map(|s| s.stats.published).collect();
        assert_eq!(published, vec![2, 2, 2]);
        assert_eq!(broker.published_count(), 6);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_requires_running_pool() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let pool = ProducerPool::new(&config(1), Arc::new(broker.transport())).unwrap();

        let err = pool.publish("orders", None, "x").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState(_)));

        pool.start().await.unwrap();
        pool.send_body("x").await.unwrap();
        pool.stop().await.unwrap();

        assert!(pool.send_body("x").await.is_err());
    }
}
