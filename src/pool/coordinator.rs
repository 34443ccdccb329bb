//! # Pool Coordinator
//!
//! Starts N connector workers concurrently and synchronizes on their
//! lifecycle through two barriers created together at construction:
//!
//! - **startup**: every worker arrives once, ready or failed; `start` waits
//!   on it and fails the pool if any worker failed
//! - **shutdown**: every worker arrives once when it stops, including workers
//!   that never connected; `stop` waits on it, then joins the tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::barrier::LifecycleSignals;
use crate::config::PoolConfig;
use crate::connector::{AdapterSignals, ConnectorAdapter, ConnectorWorker, WorkerStatus};
use crate::error::{BridgeError, Result};
use crate::messaging::MessagingResult;

pub struct PoolCoordinator<A: ConnectorAdapter> {
    name: String,
    config: PoolConfig,
    workers: Vec<Arc<ConnectorWorker<A>>>,
    handles: Mutex<Vec<JoinHandle<MessagingResult<()>>>>,
    signals: LifecycleSignals,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<A: ConnectorAdapter> std::fmt::Debug for PoolCoordinator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolCoordinator")
            .field("name", &self.name)
            .field("size", &self.workers.len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<A: ConnectorAdapter> PoolCoordinator<A> {
    /// Build `config.pool_size` workers; `build` receives the worker name and
    /// its barrier signals
    pub fn new<F>(name: impl Into<String>, config: PoolConfig, mut build: F) -> Result<Self>
    where
        F: FnMut(String, AdapterSignals) -> A,
    {
        config.validate()?;
        let name = name.into();
        let signals = LifecycleSignals::new(&name, config.pool_size);

        let workers = (0..config.pool_size)
            .map(|index| {
                let adapter = build(
                    format!("{name}-{index}"),
                    AdapterSignals::new(signals.clone()),
                );
                Arc::new(ConnectorWorker::new(Arc::new(adapter)))
            })
            .collect();

        Ok(Self {
            name,
            config,
            workers,
            handles: Mutex::new(Vec::new()),
            signals,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn workers(&self) -> &[Arc<ConnectorWorker<A>>] {
        &self.workers
    }

    pub fn signals(&self) -> &LifecycleSignals {
        &self.signals
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers.iter().map(|w| w.status()).collect()
    }

    /// Submit every worker and wait until all of them are ready
    ///
    /// If any worker fails to connect the healthy ones are stopped and
    /// `StartupFailed` is returned. A `stop` racing startup makes this return
    /// `InvalidState`.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::invalid_state(format!(
                "pool {} has already been started",
                self.name
            )));
        }

        info!(pool = %self.name, size = self.workers.len(), "🚀 POOL: Starting workers");
        {
            let mut handles = self.handles.lock();
            for worker in &self.workers {
                handles.push(tokio::spawn(worker.clone().run()));
            }
        }

        let report = match self.signals.startup.wait(self.config.startup_timeout()).await {
            Ok(report) => report,
            Err(e) => {
                error!(pool = %self.name, error = %e, "❌ POOL: Startup timed out");
                self.stop_after_failed_start().await;
                return Err(e.into());
            }
        };

        if self.is_stopped() {
            warn!(pool = %self.name, "⚠️ POOL: Stopped before startup completed");
            return Err(BridgeError::invalid_state(format!(
                "pool {} was stopped during startup",
                self.name
            )));
        }

        if !report.is_success() {
            error!(
                pool = %self.name,
                failed = report.failures,
                total = report.total,
                "❌ POOL: Workers failed to start"
            );
            self.stop_after_failed_start().await;
            return Err(BridgeError::StartupFailed {
                failed: report.failures,
                total: report.total,
            });
        }

        info!(pool = %self.name, size = self.workers.len(), "🎉 POOL: All workers ready");
        Ok(())
    }

    async fn stop_after_failed_start(&self) {
        if let Err(e) = self.stop().await {
            warn!(pool = %self.name, error = %e, "⚠️ POOL: Cleanup after failed start incomplete");
        }
    }

    /// Shut every worker down and wait for them to stop; repeated calls do nothing
    ///
    /// Workers still running when the shutdown timeout elapses are aborted.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_started() {
            debug!(pool = %self.name, "Pool never started, nothing to stop");
            return Ok(());
        }
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(pool = %self.name, "🛑 POOL: Stopping workers");
        for worker in &self.workers {
            worker.shutdown();
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.config.shutdown_timeout();

        let drained = async {
            self.signals.shutdown.wait(timeout).await?;
            let joined = join_all(handles);
            let results = match timeout {
                Some(limit) => tokio::time::timeout(limit, joined).await.map_err(|_| {
                    BridgeError::Timeout(format!("pool {} workers did not exit", self.name))
                })?,
                None => joined.await,
            };
            for result in results {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(pool = %self.name, error = %e, "Worker exited with error"),
                    Err(e) => warn!(pool = %self.name, error = %e, "Worker task did not complete"),
                }
            }
            Ok::<(), BridgeError>(())
        };

        match drained.await {
            Ok(()) => {
                info!(pool = %self.name, "🛑 POOL: All workers stopped");
                Ok(())
            }
            Err(e) => {
                warn!(pool = %self.name, error = %e, "⚠️ POOL: Aborting workers that did not stop");
                for abort in aborts {
                    abort.abort();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connector::{AdapterContext, ConnectionSession, ProducerAdapter, WorkerState};
    use crate::environment::StaticEnvironment;
    use crate::messaging::InMemoryBroker;
    use std::time::Duration;

    fn producer_pool(
        broker: &InMemoryBroker,
        size: usize,
        servers_for: impl Fn(usize) -> String,
    ) -> PoolCoordinator<ProducerAdapter> {
        producer_pool_with(broker, PoolConfig::with_size(size), servers_for)
    }

    fn producer_pool_with(
        broker: &InMemoryBroker,
        config: PoolConfig,
        servers_for: impl Fn(usize) -> String,
    ) -> PoolCoordinator<ProducerAdapter> {
        let mut index = 0;
        PoolCoordinator::new("producer", config, |name, signals| {
            let config = Arc::new(ConnectionConfig::new(&servers_for(index), "orders"));
            index += 1;
            let session = ConnectionSession::new(
                name.clone(),
                config.connection_factory(Arc::new(broker.transport()), &name),
                false,
            );
            ProducerAdapter::new(AdapterContext::new(
                name,
                config,
                session,
                Arc::new(StaticEnvironment::new()),
                signals,
            ))
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let pool = producer_pool(&broker, 3, |_| "nats://a:4222".into());

        pool.start().await.unwrap();
        assert!(pool.signals().startup.is_open());
        assert_eq!(broker.connection_count(), 3);
        assert!(pool.workers().iter().all(|w| w.is_running()));
        assert_eq!(pool.status().len(), 3);

        pool.stop().await.unwrap();
        pool.stop().await.unwrap();
        assert!(pool.signals().shutdown.is_open());
        assert_eq!(pool.signals().shutdown.failures(), 0);
        assert!(pool
            .workers()
            .iter()
            .all(|w| w.state() == WorkerState::Stopped));
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_one_failed_worker_fails_startup() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let pool = producer_pool(&broker, 3, |index| {
            if index == 1 {
                "nats://down:4222".into()
            } else {
                "nats://a:4222".into()
            }
        });

        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::StartupFailed { failed: 1, total: 3 }));
        assert!(pool.signals().startup.is_open());
        assert!(pool.signals().shutdown.is_open());
        assert!(pool.is_stopped());
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let pool = producer_pool(&broker, 1, |_| "nats://a:4222".into());
        pool.start().await.unwrap();
        assert!(matches!(
            pool.start().await,
            Err(BridgeError::InvalidState(_))
        ));
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_while_workers_connect() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        broker.set_connect_delay(Duration::from_millis(50));
        let mut config = PoolConfig::with_size(1);
        config.shutdown_timeout_ms = Some(1_000);
        let pool = Arc::new(producer_pool_with(&broker, config, |_| "nats://a:4222".into()));

        let starting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.start().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio_test::assert_ok!(pool.stop().await);

        let started = starting.await.unwrap();
        assert!(matches!(started, Err(BridgeError::InvalidState(_))));
        assert!(pool.signals().shutdown.is_open());
        assert!(pool
            .workers()
            .iter()
            .all(|w| w.state() == WorkerState::Stopped && !w.is_running()));
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unbounded_stop_while_workers_connect() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        broker.set_connect_delay(Duration::from_millis(50));
        let config = PoolConfig {
            pool_size: 2,
            startup_timeout_ms: None,
            shutdown_timeout_ms: None,
        };
        let pool = Arc::new(producer_pool_with(&broker, config, |_| "nats://a:4222".into()));

        let starting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.start().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stopped = tokio::time::timeout(Duration::from_secs(2), pool.stop()).await;
        assert!(matches!(stopped, Ok(Ok(()))));

        assert!(starting.await.unwrap().is_err());
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let broker = InMemoryBroker::new();
        let pool = producer_pool(&broker, 2, |_| "nats://a:4222".into());
        tokio_test::assert_ok!(pool.stop().await);
        assert!(!pool.is_stopped());
    }

    #[test]
    fn test_zero_size_pool_is_rejected() {
        let broker = InMemoryBroker::new();
        let result = PoolCoordinator::new("empty", PoolConfig::with_size(0), |name, signals| {
            let config = Arc::new(ConnectionConfig::new("nats://a:4222", "orders"));
            let session = ConnectionSession::new(
                name.clone(),
                config.connection_factory(Arc::new(broker.transport()), &name),
                false,
            );
            ProducerAdapter::new(AdapterContext::new(
                name,
                config,
                session,
                Arc::new(StaticEnvironment::new()),
                signals,
            ))
        });
        assert!(matches!(result, Err(BridgeError::ConfigurationError(_))));
    }
}
