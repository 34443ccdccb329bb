#![allow(clippy::doc_markdown)] // Allow technical terms like NATS in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # NATS Bridge
//!
//! Pooled broker connections bridging a message processing pipeline and a
//! publish/subscribe broker.
//!
//! ## Overview
//!
//! A pool owns N connector workers. Each worker owns one connection session
//! and is driven through `Idle -> Connecting -> Running -> Draining -> Stopped`
//! by its own task. A role-specific adapter decides what happens at each
//! step: consumers subscribe and feed deliveries to a [`pipeline::Processor`],
//! producers publish on behalf of the pipeline. Pool startup and shutdown are
//! synchronized through countdown barriers that every worker arrives at
//! exactly once, on success and failure paths alike.
//!
//! ## Cloud Mode
//!
//! In cloud deployments broker coordinates can move. With cloud mode on, the
//! transport's own reconnect is disabled and a lost connection is recovered by
//! looking the coordinates up again in the runtime environment.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Messages, subjects, transport traits and the in-memory broker
//! - [`connector`] - Connection session, connector worker and adapters
//! - [`pool`] - Pool barriers, the generic coordinator and the consumer/producer pools
//! - [`pipeline`] - Processor and exception handler interfaces
//! - [`config`] - Layered configuration and endpoint URI parsing
//! - [`environment`] - Environment lookup for cloud coordinates
//! - [`error`] - Crate-level error handling
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use nats_bridge::config::BridgeConfig;
//! use nats_bridge::environment::ProcessEnvironment;
//! use nats_bridge::messaging::InMemoryBroker;
//! use nats_bridge::pipeline::{Exchange, ProcessingError, Processor};
//! use nats_bridge::pool::ConsumerPool;
//!
//! struct PrintProcessor;
//!
//! #[async_trait]
//! impl Processor for PrintProcessor {
//!     async fn process(&self, exchange: &mut Exchange) -> Result<(), ProcessingError> {
//!         println!("{}", exchange.message);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> nats_bridge::Result<()> {
//! let broker = InMemoryBroker::with_servers(&["nats://localhost:4222"]);
//! let config = BridgeConfig::from_uri(
//!     "nats://localhost:4222?topic=orders&queueName=workers&poolSize=3",
//!     &ProcessEnvironment,
//! )?;
//!
//! let pool = ConsumerPool::new(&config, Arc::new(broker.transport()), Arc::new(PrintProcessor))?;
//! pool.start().await?;
//! // ...
//! pool.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod constants;
pub mod environment;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod pool;

pub use config::{BridgeConfig, ConfigManager, ConnectionConfig, PoolConfig};
pub use connector::{
    ConnectionListener, ConnectionSession, ConnectorAdapter, ConnectorWorker, ConsumerAdapter,
    ProducerAdapter, Role, SessionState, WorkerState, WorkerStatus,
};
pub use environment::{EnvironmentLookup, ProcessEnvironment, StaticEnvironment};
pub use error::{BridgeError, Result};
pub use messaging::{BrokerMessage, InMemoryBroker, MessagingError, MessagingResult};
pub use pipeline::{Exchange, ExceptionHandler, ProcessingError, Processor};
pub use pool::{ConsumerPool, PoolBarrier, PoolCoordinator, ProducerPool};
