use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::connector::{
    AdapterContext, ConnectionSession, ConnectorWorker, ConsumerAdapter, WorkerStatus,
};
use crate::environment::{EnvironmentLookup, ProcessEnvironment};
use crate::error::Result;
use crate::messaging::Transport;
use crate::pipeline::{ExceptionHandler, LoggingExceptionHandler, Processor};

use super::coordinator::PoolCoordinator;

/// N consumer workers sharing one processor and exception handler
#[derive(Debug)]
pub struct ConsumerPool {
    coordinator: PoolCoordinator<ConsumerAdapter>,
}

impl ConsumerPool {
    /// Pool with a logging exception handler and the process environment
    pub fn new(
        config: &BridgeConfig,
        transport: Arc<dyn Transport>,
        processor: Arc<dyn Processor>,
    ) -> Result<Self> {
        Self::with_handlers(
            config,
            transport,
            processor,
            Arc::new(LoggingExceptionHandler),
            Arc::new(ProcessEnvironment),
        )
    }

    pub fn with_handlers(
        config: &BridgeConfig,
        transport: Arc<dyn Transport>,
        processor: Arc<dyn Processor>,
        exception_handler: Arc<dyn ExceptionHandler>,
        environment: Arc<dyn EnvironmentLookup>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = Arc::new(config.endpoint.clone());

        let coordinator = PoolCoordinator::new(
            format!("consumer.{}", endpoint.topic),
            config.pool.clone(),
            |name, signals| {
                let session = ConnectionSession::new(
                    name.clone(),
                    endpoint.connection_factory(transport.clone(), &name),
                    endpoint.cloud_mode,
                );
                let context = AdapterContext::new(
                    name,
                    endpoint.clone(),
                    session,
                    environment.clone(),
                    signals,
                );
                ConsumerAdapter::new(context, processor.clone(), exception_handler.clone())
            },
        )?;

        Ok(Self { coordinator })
    }

    /// Start every worker; fails if any of them could not connect
    pub async fn start(&self) -> Result<()> {
        self.coordinator.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.coordinator.stop().await
    }

    pub fn size(&self) -> usize {
        self.coordinator.size()
    }

    pub fn workers(&self) -> &[Arc<ConnectorWorker<ConsumerAdapter>>] {
        self.coordinator.workers()
    }

    pub fn coordinator(&self) -> &PoolCoordinator<ConsumerAdapter> {
        &self.coordinator
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.coordinator.status()
    }
}
