//! # In-Memory Broker
//!
//! Thread-safe in-process broker implementing the transport traits, for tests
//! and local development.
//!
//! ## Features
//!
//! - **Servers**: named server URLs that can be stopped and restarted; stopping
//!   a server disconnects every client attached to it
//! - **Transport Reconnect**: clients that allow reconnect fail over to another
//!   online server from their list, or reattach when their server restarts
//! - **Subjects**: `*` and `>` wildcards, queue groups with round-robin delivery
//! - **Auto-Unsubscribe**: subscriptions end after a configured delivery count
//! - **Fault Injection**: flush failures, asynchronous errors and slow
//!   connects on demand
//!
//! Each connection gets its own event task and each subscription its own
//! dispatch task, so events and messages are delivered in order and never on
//! the publisher's task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::messaging::message::{BrokerMessage, SubscriptionId};
use crate::messaging::subject::{
    is_valid_publish_subject, is_valid_subscription_subject, subject_matches,
};
use crate::messaging::transport::{
    ConnectOptions, ConnectionEvent, MessageHandler, Transport, TransportConnection,
    TransportEvent, TransportEventHandler, TransportSubscription,
};
use crate::messaging::{MessagingError, MessagingResult};

/// Connection link status inside the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkStatus {
    Connected,
    Disconnected,
    Closed,
}

#[derive(Debug)]
struct ConnectionState {
    id: u64,
    options: ConnectOptions,
    server: RwLock<Option<String>>,
    status: RwLock<LinkStatus>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ConnectionState {
    fn is_connected(&self) -> bool {
        *self.status.read() == LinkStatus::Connected
    }

    fn event(&self) -> ConnectionEvent {
        ConnectionEvent::new(self.server.read().clone(), self.options.connection_name.clone())
    }

    fn emit(&self, event: TransportEvent) {
        // Receiver is gone only once the owning session dropped the connection
        let _ = self.events.send(event);
    }

    fn wants_server(&self, server: &str) -> bool {
        self.options
            .servers
            .iter()
            .any(|candidate| normalize_server(candidate) == server)
    }
}

#[derive(Debug)]
struct SubscriptionState {
    id: SubscriptionId,
    seq: u64,
    connection_id: u64,
    subject: String,
    queue_group: Option<String>,
    delivered: AtomicU64,
    /// 0 means unbounded
    max_deliveries: AtomicU64,
    active: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<BrokerMessage>>>,
}

impl SubscriptionState {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Reserve one delivery slot; returns (deliver, was_last)
    fn reserve_delivery(&self) -> (bool, bool) {
        let max = self.max_deliveries.load(Ordering::Acquire);
        let reserved = self
            .delivered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |delivered| {
                if max > 0 && delivered >= max {
                    None
                } else {
                    Some(delivered + 1)
                }
            });
        match reserved {
            Ok(previous) => (true, max > 0 && previous + 1 >= max),
            Err(_) => (false, true),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    servers: DashMap<String, bool>,
    connections: DashMap<u64, Arc<ConnectionState>>,
    subscriptions: DashMap<SubscriptionId, Arc<SubscriptionState>>,
    queue_cursors: DashMap<String, u64>,
    next_id: AtomicU64,
    connect_attempts: AtomicU64,
    published: AtomicU64,
    fail_flush: AtomicBool,
    connect_delay_ms: AtomicU64,
}

impl BrokerState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_online(&self, server: &str) -> bool {
        self.servers.get(server).map(|s| *s).unwrap_or(false)
    }

    fn first_online(&self, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .map(|candidate| normalize_server(candidate))
            .find(|server| self.is_online(server))
    }

    fn connection_connected(&self, connection_id: u64) -> bool {
        self.connections
            .get(&connection_id)
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    fn deactivate(&self, subscription: &SubscriptionState) {
        subscription.active.store(false, Ordering::Release);
        subscription.sender.lock().take();
        self.subscriptions.remove(&subscription.id);
    }

    fn route(&self, message: &BrokerMessage) -> usize {
        let matching: Vec<Arc<SubscriptionState>> = self
            .subscriptions
            .iter()
            .filter(|entry| {
                let sub = entry.value();
                sub.is_active() && subject_matches(&sub.subject, &message.subject)
            })
            .map(|entry| entry.value().clone())
            .collect();

        let mut direct = Vec::new();
        let mut groups: HashMap<String, Vec<Arc<SubscriptionState>>> = HashMap::new();
        for sub in matching {
            if !self.connection_connected(sub.connection_id) {
                continue;
            }
            match &sub.queue_group {
                Some(group) => groups
                    .entry(format!("{}|{}", sub.subject, group))
                    .or_default()
                    .push(sub),
                None => direct.push(sub),
            }
        }

        for (key, mut members) in groups {
            members.sort_by_key(|member| member.seq);
            let mut cursor = self.queue_cursors.entry(key).or_insert(0);
            let index = (*cursor as usize) % members.len();
            *cursor = cursor.wrapping_add(1);
            direct.push(members[index].clone());
        }

        direct
            .iter()
            .filter(|sub| self.deliver(sub, message))
            .count()
    }

    fn deliver(&self, subscription: &SubscriptionState, message: &BrokerMessage) -> bool {
        let (deliver, was_last) = subscription.reserve_delivery();
        let sent = deliver
            && subscription
                .sender
                .lock()
                .as_ref()
                .map(|sender| sender.send(message.clone()).is_ok())
                .unwrap_or(false);
        if was_last {
            debug!(
                subscription = %subscription.id,
                subject = %subscription.subject,
                "Subscription reached its delivery limit"
            );
            self.deactivate(subscription);
        }
        sent
    }
}

/// Normalize a server URL for comparison (`localhost:4222` == `nats://localhost:4222/`)
pub fn normalize_server(server: &str) -> String {
    let trimmed = server.trim().trim_end_matches('/').to_lowercase();
    if trimmed.contains("://") {
        trimmed
    } else {
        format!("nats://{trimmed}")
    }
}

/// In-process broker; cheap to clone, all clones share state
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create a broker with no servers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker with the given servers online
    pub fn with_servers(servers: &[&str]) -> Self {
        let broker = Self::new();
        for server in servers {
            broker.state.servers.insert(normalize_server(server), true);
        }
        broker
    }

    /// Transport handle for connecting to this broker
    pub fn transport(&self) -> InMemoryTransport {
        InMemoryTransport {
            state: self.state.clone(),
        }
    }

    /// Bring a server online; disconnected clients that allow reconnect and
    /// list this server reattach to it
    pub fn start_server(&self, server: &str) {
        let server = normalize_server(server);
        self.state.servers.insert(server.clone(), true);
        info!(server = %server, "In-memory server started");

        let waiting: Vec<Arc<ConnectionState>> = self
            .state
            .connections
            .iter()
            .filter(|entry| {
                let conn = entry.value();
                *conn.status.read() == LinkStatus::Disconnected
                    && conn.options.reconnect_allowed
                    && conn.wants_server(&server)
            })
            .map(|entry| entry.value().clone())
            .collect();

        for conn in waiting {
            *conn.server.write() = Some(server.clone());
            *conn.status.write() = LinkStatus::Connected;
            conn.emit(TransportEvent::Reconnected(conn.event()));
        }
    }

    /// Take a server offline, disconnecting every client attached to it
    pub fn stop_server(&self, server: &str) {
        let server = normalize_server(server);
        self.state.servers.insert(server.clone(), false);
        info!(server = %server, "In-memory server stopped");

        let attached: Vec<Arc<ConnectionState>> = self
            .state
            .connections
            .iter()
            .filter(|entry| {
                let conn = entry.value();
                conn.is_connected() && conn.server.read().as_deref() == Some(server.as_str())
            })
            .map(|entry| entry.value().clone())
            .collect();

        for conn in attached {
            let event = conn.event();
            *conn.status.write() = LinkStatus::Disconnected;
            *conn.server.write() = None;
            conn.emit(TransportEvent::Disconnected(event));

            if !conn.options.reconnect_allowed {
                continue;
            }
            if let Some(next) = self.state.first_online(&conn.options.servers) {
                *conn.server.write() = Some(next);
                *conn.status.write() = LinkStatus::Connected;
                conn.emit(TransportEvent::Reconnected(conn.event()));
            }
        }
    }

    /// Raise an asynchronous error on every connected client
    pub fn inject_async_error(&self, message: &str) {
        for entry in self.state.connections.iter() {
            if entry.value().is_connected() {
                entry
                    .value()
                    .emit(TransportEvent::AsyncError(MessagingError::transport(message)));
            }
        }
    }

    /// Delay every subsequent connect by `delay` before a server is chosen
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
    }

    /// Make every subsequent flush fail until reset
    pub fn set_flush_failure(&self, fail: bool) {
        self.state.fail_flush.store(fail, Ordering::Release);
    }

    pub fn is_online(&self, server: &str) -> bool {
        self.state.is_online(&normalize_server(server))
    }

    /// Total `Transport::connect` calls, successful or not
    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::Acquire)
    }

    /// Total messages accepted for routing
    pub fn published_count(&self) -> u64 {
        self.state.published.load(Ordering::Acquire)
    }

    /// Connections that have not been closed
    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// Connections currently attached to a server
    pub fn connected_count(&self) -> usize {
        self.state
            .connections
            .iter()
            .filter(|entry| entry.value().is_connected())
            .count()
    }

    /// Active subscriptions across all connections
    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.len()
    }

    /// Active subscriptions on a subject pattern (case-sensitive)
    pub fn subscriptions_on(&self, subject: &str) -> usize {
        self.state
            .subscriptions
            .iter()
            .filter(|entry| entry.value().subject == subject)
            .count()
    }
}

/// `Transport` implementation backed by an [`InMemoryBroker`]
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    state: Arc<BrokerState>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: Arc<dyn TransportEventHandler>,
    ) -> MessagingResult<Arc<dyn TransportConnection>> {
        self.state.connect_attempts.fetch_add(1, Ordering::AcqRel);

        let delay = self.state.connect_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if options.servers.is_empty() {
            return Err(MessagingError::connection("", "no servers configured"));
        }
        let server = self.state.first_online(&options.servers).ok_or_else(|| {
            MessagingError::connection(options.servers_display(), "no servers available for connection")
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<TransportEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                events.on_event(event).await;
            }
        });

        let id = self.state.next_id();
        let connection = Arc::new(ConnectionState {
            id,
            options,
            server: RwLock::new(Some(server.clone())),
            status: RwLock::new(LinkStatus::Connected),
            events: tx,
        });
        self.state.connections.insert(id, connection.clone());

        debug!(connection_id = id, server = %server, "In-memory connection established");

        Ok(Arc::new(InMemoryConnection {
            connection,
            broker: self.state.clone(),
        }))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[derive(Debug)]
struct InMemoryConnection {
    connection: Arc<ConnectionState>,
    broker: Arc<BrokerState>,
}

#[async_trait]
impl TransportConnection for InMemoryConnection {
    async fn publish(&self, message: BrokerMessage) -> MessagingResult<()> {
        if !self.connection.is_connected() {
            return Err(MessagingError::publish(&message.subject, "connection is not open"));
        }
        if !is_valid_publish_subject(&message.subject) {
            return Err(MessagingError::publish(&message.subject, "invalid subject"));
        }
        self.broker.published.fetch_add(1, Ordering::AcqRel);
        let delivered = self.broker.route(&message);
        debug!(
            connection_id = self.connection.id,
            subject = %message.subject,
            delivered = delivered,
            "Message routed"
        );
        Ok(())
    }

    async fn flush(&self) -> MessagingResult<()> {
        if !self.connection.is_connected() {
            return Err(MessagingError::flush("connection is not open"));
        }
        if self.broker.fail_flush.load(Ordering::Acquire) {
            return Err(MessagingError::flush("broker did not acknowledge flush"));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<Arc<dyn TransportSubscription>> {
        if !self.connection.is_connected() {
            return Err(MessagingError::subscribe(subject, "connection is not open"));
        }
        if !is_valid_subscription_subject(subject) {
            return Err(MessagingError::subscribe(subject, "invalid subject"));
        }

        let id = SubscriptionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<BrokerMessage>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler.on_message(message, id).await;
            }
        });

        let subscription = Arc::new(SubscriptionState {
            id,
            seq: self.broker.next_id(),
            connection_id: self.connection.id,
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            delivered: AtomicU64::new(0),
            max_deliveries: AtomicU64::new(0),
            active: AtomicBool::new(true),
            sender: Mutex::new(Some(tx)),
        });
        self.broker.subscriptions.insert(id, subscription.clone());

        Ok(Arc::new(InMemorySubscription {
            subscription,
            broker: self.broker.clone(),
        }))
    }

    async fn close(&self) -> MessagingResult<()> {
        {
            let mut status = self.connection.status.write();
            if *status == LinkStatus::Closed {
                return Ok(());
            }
            *status = LinkStatus::Closed;
        }

        let owned: Vec<Arc<SubscriptionState>> = self
            .broker
            .subscriptions
            .iter()
            .filter(|entry| entry.value().connection_id == self.connection.id)
            .map(|entry| entry.value().clone())
            .collect();
        for sub in owned {
            self.broker.deactivate(&sub);
        }

        self.broker.connections.remove(&self.connection.id);
        self.connection
            .emit(TransportEvent::Closed(self.connection.event()));
        debug!(connection_id = self.connection.id, "In-memory connection closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn connected_server(&self) -> Option<String> {
        if self.connection.is_connected() {
            self.connection.server.read().clone()
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct InMemorySubscription {
    subscription: Arc<SubscriptionState>,
    broker: Arc<BrokerState>,
}

#[async_trait]
impl TransportSubscription for InMemorySubscription {
    fn id(&self) -> SubscriptionId {
        self.subscription.id
    }

    fn subject(&self) -> &str {
        &self.subscription.subject
    }

    fn queue_group(&self) -> Option<&str> {
        self.subscription.queue_group.as_deref()
    }

    fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    async fn auto_unsubscribe(&self, max: u64) -> MessagingResult<()> {
        if !self.subscription.is_active() {
            return Err(MessagingError::invalid_state(format!(
                "subscription {} is no longer active",
                self.subscription.id
            )));
        }
        if max == 0 {
            warn!(subscription = %self.subscription.id, "Ignoring auto-unsubscribe with max of 0");
            return Ok(());
        }
        self.subscription
            .max_deliveries
            .store(max, Ordering::Release);
        if self.subscription.delivered.load(Ordering::Acquire) >= max {
            self.broker.deactivate(&self.subscription);
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> MessagingResult<()> {
        if !self.subscription.is_active() {
            return Err(MessagingError::invalid_state(format!(
                "subscription {} is no longer active",
                self.subscription.id
            )));
        }
        self.broker.deactivate(&self.subscription);
        Ok(())
    }
}
