//! # Messaging Module
//!
//! Broker-facing building blocks: the message shape, subject matching, the
//! transport traits a connection session talks to, the connection factory and
//! the bundled providers.

pub mod errors;
pub mod factory;
pub mod message;
pub mod providers;
pub mod subject;
pub mod transport;

pub use errors::{MessagingError, MessagingResult};
pub use factory::{split_servers, ConnectionFactory};
pub use message::{BrokerMessage, SubscriptionId};
pub use providers::{InMemoryBroker, InMemoryTransport};
#[cfg(feature = "nats")]
pub use providers::NatsTransport;
pub use subject::{same_subject, subject_matches};
pub use transport::{
    ConnectOptions, ConnectionEvent, ConnectionProperties, MessageHandler, Transport,
    TransportConnection, TransportEvent, TransportEventHandler, TransportSubscription,
};
