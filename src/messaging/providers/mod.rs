//! # Transport Providers
//!
//! Concrete implementations of the transport traits.
//!
//! ## Providers
//!
//! - [`InMemoryTransport`] - Thread-safe in-process broker for tests and local
//!   development, driven through an [`InMemoryBroker`] handle
//! - `NatsTransport` - Real broker connections over `async-nats` (enabled
//!   with the `nats` feature)

mod in_memory;
#[cfg(feature = "nats")]
mod nats;

pub use in_memory::{normalize_server, InMemoryBroker, InMemoryTransport};
#[cfg(feature = "nats")]
pub use nats::NatsTransport;
