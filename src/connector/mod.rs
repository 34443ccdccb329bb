//! # Connector
//!
//! One broker connection per worker:
//!
//! ```text
//! ConnectorWorker ──owns──→ Adapter ──owns──→ ConnectionSession ──→ TransportConnection
//!        │                     ↑                      │
//!        └─ run / shutdown     └──── listener ────────┘ (events, messages)
//! ```
//!
//! The worker drives the lifecycle, the adapter applies role policy and the
//! session wraps the transport connection.

pub mod adapter;
pub mod session;
pub mod states;
pub mod stats;
pub mod worker;

pub use adapter::{
    AdapterContext, AdapterSignals, ConnectorAdapter, ConsumerAdapter, ProducerAdapter,
};
pub use session::{ConnectionListener, ConnectionSession, SubscriptionInfo};
pub use states::{Role, SessionState, WorkerState};
pub use stats::{SessionStats, SessionStatsSnapshot};
pub use worker::{ConnectorWorker, WorkerStatus};
