//! # Worker Pools
//!
//! Pools of connector workers started and stopped as a unit.
//!
//! - [`ConsumerPool`] feeds every delivery into one shared processor
//! - [`ProducerPool`] spreads publishes across its workers round-robin
//!
//! Both are thin wrappers over the generic [`PoolCoordinator`], which owns the
//! startup and shutdown [`PoolBarrier`]s.

pub mod barrier;
pub mod consumer;
pub mod coordinator;
pub mod producer;

pub use barrier::{BarrierError, BarrierReport, LifecycleSignals, PoolBarrier};
pub use consumer::ConsumerPool;
pub use coordinator::PoolCoordinator;
pub use producer::ProducerPool;
