//! # NATS Transport
//!
//! Transport backed by the `async-nats` client. Connection settings come from
//! [`ConnectOptions`] and its properties map; client events are mapped onto
//! [`TransportEvent`]s and delivered in order on one task per connection.
//!
//! ## Reconnect Policy
//!
//! With reconnect allowed the client's own reconnect loop is used, bounded by
//! `max_reconnect_attempts` and paced by `reconnect_wait_ms`. With reconnect
//! disallowed the connection detaches on the first disconnect: the client is
//! dropped, subscriptions end, and the owner decides what to connect to next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_nats::connection::State;
use async_nats::{Client, Event, ServerAddr, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::constants::{defaults, properties};
use crate::messaging::message::{BrokerMessage, SubscriptionId};
use crate::messaging::transport::{
    ConnectOptions, ConnectionEvent, ConnectionProperties, MessageHandler, Transport,
    TransportConnection, TransportEvent, TransportEventHandler, TransportSubscription,
};
use crate::messaging::{MessagingError, MessagingResult};

/// Signals consumed by a connection's event task
#[derive(Debug)]
enum LinkSignal {
    Client(Event),
    Closed,
}

#[derive(Debug)]
enum SubscriptionCommand {
    AutoUnsubscribe(u64, oneshot::Sender<MessagingResult<()>>),
    Unsubscribe(oneshot::Sender<MessagingResult<()>>),
    Stop,
}

fn property<T: std::str::FromStr>(props: &ConnectionProperties, key: &str) -> Option<T> {
    props.get(key).and_then(|value| value.parse().ok())
}

/// `async-nats` client settings derived from connect options
fn client_options(
    options: &ConnectOptions,
    signals: mpsc::UnboundedSender<LinkSignal>,
) -> async_nats::ConnectOptions {
    let props = &options.properties;
    let ping_interval = property(props, properties::PING_INTERVAL_MS)
        .unwrap_or(defaults::PING_INTERVAL_MS);
    let reconnect_wait =
        property(props, properties::RECONNECT_WAIT_MS).unwrap_or(defaults::RECONNECT_WAIT_MS);
    let max_reconnects: usize = property(props, properties::MAX_RECONNECT_ATTEMPTS)
        .unwrap_or(defaults::MAX_RECONNECT_ATTEMPTS as usize);

    let mut client = async_nats::ConnectOptions::new()
        .ping_interval(Duration::from_millis(ping_interval))
        .require_tls(property(props, properties::SECURE).unwrap_or(false))
        .reconnect_delay_callback(move |_attempts| Duration::from_millis(reconnect_wait))
        .event_callback(move |event| {
            let signals = signals.clone();
            async move {
                let _ = signals.send(LinkSignal::Client(event));
            }
        });

    if options.reconnect_allowed {
        client = client.max_reconnects(Some(max_reconnects));
    }
    if let Some(name) = &options.connection_name {
        client = client.name(name);
    }

    for key in [properties::VERBOSE, properties::PEDANTIC, properties::MAX_PINGS_OUT] {
        if let Some(value) = props.get(key) {
            debug!(property = key, value = value, "Property not supported by async-nats, ignored");
        }
    }
    client
}

fn parse_servers(options: &ConnectOptions) -> MessagingResult<Vec<ServerAddr>> {
    if options.servers.is_empty() {
        return Err(MessagingError::connection("", "no servers configured"));
    }
    options
        .servers
        .iter()
        .map(|server| {
            server.parse::<ServerAddr>().map_err(|e| {
                MessagingError::connection(server.as_str(), format!("invalid server address: {e}"))
            })
        })
        .collect()
}

/// Transport opening real NATS connections
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsTransport;

impl NatsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: Arc<dyn TransportEventHandler>,
    ) -> MessagingResult<Arc<dyn TransportConnection>> {
        let servers = parse_servers(&options)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let client = client_options(&options, tx.clone())
            .connect(servers.as_slice())
            .await
            .map_err(|e| MessagingError::connection(options.servers_display(), e.to_string()))?;

        let connection = Arc::new(NatsConnection {
            client: RwLock::new(Some(client)),
            reconnect_allowed: options.reconnect_allowed,
            connection_name: options.connection_name.clone(),
            closed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            signals: tx,
        });
        info!(
            servers = %options.servers_display(),
            server = connection.connected_server().as_deref().unwrap_or("-"),
            reconnect_allowed = options.reconnect_allowed,
            "NATS connection established"
        );

        tokio::spawn(run_events(Arc::downgrade(&connection), rx, events));
        Ok(connection)
    }

    fn provider_name(&self) -> &'static str {
        "nats"
    }
}

#[derive(Debug)]
struct NatsConnection {
    client: RwLock<Option<Client>>,
    reconnect_allowed: bool,
    connection_name: Option<String>,
    closed: AtomicBool,
    /// Set between a disconnect and the next successful connect
    disconnected: AtomicBool,
    subscriptions: Mutex<Vec<Arc<NatsSubscription>>>,
    signals: mpsc::UnboundedSender<LinkSignal>,
}

impl NatsConnection {
    fn client(&self) -> Option<Client> {
        self.client.read().clone()
    }

    fn event(&self) -> ConnectionEvent {
        ConnectionEvent::new(self.connected_server(), self.connection_name.clone())
    }

    /// Drop the client and end every subscription; the client's connection
    /// task exits once nothing references it
    fn detach(&self) {
        self.client.write().take();
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.stop();
        }
    }
}

/// Map client events to transport events until the connection closes
async fn run_events(
    connection: Weak<NatsConnection>,
    mut signals: mpsc::UnboundedReceiver<LinkSignal>,
    events: Arc<dyn TransportEventHandler>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(link) = connection.upgrade() else {
            return;
        };
        let event = match signal {
            LinkSignal::Closed => {
                events.on_event(TransportEvent::Closed(link.event())).await;
                return;
            }
            LinkSignal::Client(Event::Connected) => {
                if !link.disconnected.swap(false, Ordering::AcqRel) {
                    continue;
                }
                TransportEvent::Reconnected(link.event())
            }
            LinkSignal::Client(Event::Disconnected) => {
                link.disconnected.store(true, Ordering::Release);
                if !link.reconnect_allowed {
                    debug!("Reconnect disallowed, detaching NATS connection");
                    link.detach();
                }
                TransportEvent::Disconnected(ConnectionEvent::new(None, link.connection_name.clone()))
            }
            LinkSignal::Client(Event::SlowConsumer(sid)) => TransportEvent::AsyncError(
                MessagingError::transport(format!("slow consumer on subscription {sid}")),
            ),
            LinkSignal::Client(Event::ServerError(error)) => {
                TransportEvent::AsyncError(MessagingError::transport(error.to_string()))
            }
            LinkSignal::Client(Event::ClientError(error)) => {
                TransportEvent::AsyncError(MessagingError::transport(error.to_string()))
            }
            LinkSignal::Client(other) => {
                debug!(event = %other, "NATS client event");
                continue;
            }
        };
        if link.closed.load(Ordering::Acquire) {
            continue;
        }
        events.on_event(event).await;
    }
}

#[async_trait]
impl TransportConnection for NatsConnection {
    async fn publish(&self, message: BrokerMessage) -> MessagingResult<()> {
        let client = self
            .client()
            .ok_or_else(|| MessagingError::publish(&message.subject, "connection is not open"))?;
        let result = match message.reply_to {
            Some(reply) => {
                client
                    .publish_with_reply(message.subject.clone(), reply, message.payload)
                    .await
            }
            None => client.publish(message.subject.clone(), message.payload).await,
        };
        result.map_err(|e| MessagingError::publish(&message.subject, e.to_string()))
    }

    async fn flush(&self) -> MessagingResult<()> {
        let client = self
            .client()
            .ok_or_else(|| MessagingError::flush("connection is not open"))?;
        client
            .flush()
            .await
            .map_err(|e| MessagingError::flush(e.to_string()))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<Arc<dyn TransportSubscription>> {
        let client = self
            .client()
            .ok_or_else(|| MessagingError::subscribe(subject, "connection is not open"))?;
        let subscriber = match queue_group {
            Some(group) => client.queue_subscribe(subject.to_string(), group.to_string()).await,
            None => client.subscribe(subject.to_string()).await,
        }
        .map_err(|e| MessagingError::subscribe(subject, e.to_string()))?;

        let id = SubscriptionId::new();
        let (commands, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        tokio::spawn(run_subscription(subscriber, id, handler, rx, active.clone()));

        let subscription = Arc::new(NatsSubscription {
            id,
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            commands,
            active,
        });
        self.subscriptions.lock().push(subscription.clone());
        Ok(subscription)
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.detach();
        let _ = self.signals.send(LinkSignal::Closed);
        debug!(connection = self.connection_name.as_deref().unwrap_or("-"), "NATS connection closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self
                .client()
                .map(|client| client.connection_state() == State::Connected)
                .unwrap_or(false)
    }

    fn connected_server(&self) -> Option<String> {
        if !self.is_connected() {
            return None;
        }
        self.client().map(|client| {
            let info = client.server_info();
            format!("nats://{}:{}", info.host, info.port)
        })
    }
}

/// Deliver messages until the subscription ends or is told to stop
async fn run_subscription(
    mut subscriber: Subscriber,
    id: SubscriptionId,
    handler: Arc<dyn MessageHandler>,
    mut commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    active: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            message = subscriber.next() => match message {
                Some(message) => {
                    let message = BrokerMessage {
                        subject: message.subject.to_string(),
                        reply_to: message.reply.map(|reply| reply.to_string()),
                        payload: message.payload,
                    };
                    handler.on_message(message, id).await;
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(SubscriptionCommand::AutoUnsubscribe(max, reply)) => {
                    let result = subscriber
                        .unsubscribe_after(max)
                        .await
                        .map_err(|e| MessagingError::transport(e.to_string()));
                    let _ = reply.send(result);
                }
                Some(SubscriptionCommand::Unsubscribe(reply)) => {
                    let result = subscriber
                        .unsubscribe()
                        .await
                        .map_err(|e| MessagingError::transport(e.to_string()));
                    let _ = reply.send(result);
                    break;
                }
                Some(SubscriptionCommand::Stop) | None => break,
            },
        }
    }
    active.store(false, Ordering::Release);
    debug!(subscription = %id, "NATS subscription ended");
}

#[derive(Debug)]
struct NatsSubscription {
    id: SubscriptionId,
    subject: String,
    queue_group: Option<String>,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
    active: Arc<AtomicBool>,
}

impl NatsSubscription {
    fn stop(&self) {
        let _ = self.commands.send(SubscriptionCommand::Stop);
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<MessagingResult<()>>) -> SubscriptionCommand,
    ) -> MessagingResult<()> {
        let inactive = || {
            MessagingError::invalid_state(format!("subscription {} is no longer active", self.id))
        };
        if !self.is_active() {
            return Err(inactive());
        }
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).map_err(|_| inactive())?;
        response.await.map_err(|_| inactive())?
    }
}

#[async_trait]
impl TransportSubscription for NatsSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn auto_unsubscribe(&self, max: u64) -> MessagingResult<()> {
        if max == 0 {
            warn!(subscription = %self.id, "Ignoring auto-unsubscribe with max of 0");
            return Ok(());
        }
        self.request(|reply| SubscriptionCommand::AutoUnsubscribe(max, reply))
            .await
    }

    async fn unsubscribe(&self) -> MessagingResult<()> {
        self.request(SubscriptionCommand::Unsubscribe).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(servers: &[&str], properties: ConnectionProperties) -> ConnectOptions {
        ConnectOptions {
            servers: servers.iter().map(|s| s.to_string()).collect(),
            reconnect_allowed: true,
            connection_name: Some("nats-test".into()),
            properties,
        }
    }

    #[test]
    fn test_parse_servers() {
        let parsed = parse_servers(&options(
            &["nats://10.0.0.1:4222", "nats://10.0.0.2:4223"],
            ConnectionProperties::new(),
        ))
        .unwrap();
        assert_eq!(parsed.len(), 2);

        assert!(matches!(
            parse_servers(&options(&[], ConnectionProperties::new())),
            Err(MessagingError::Connection { .. })
        ));
    }

    #[test]
    fn test_typed_property_lookup() {
        let props = ConnectionProperties::new()
            .with(properties::PING_INTERVAL_MS, 5_000)
            .with(properties::SECURE, true)
            .with(properties::MAX_RECONNECT_ATTEMPTS, "many");

        assert_eq!(property::<u64>(&props, properties::PING_INTERVAL_MS), Some(5_000));
        assert_eq!(property::<bool>(&props, properties::SECURE), Some(true));
        assert_eq!(property::<usize>(&props, properties::MAX_RECONNECT_ATTEMPTS), None);
        assert_eq!(property::<u64>(&props, properties::RECONNECT_WAIT_MS), None);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let opts = options(&["nats://127.0.0.1:1"], ConnectionProperties::new());
        let result = client_options(&opts, tx)
            .connection_timeout(Duration::from_millis(200))
            .connect(parse_servers(&opts).unwrap().as_slice())
            .await;
        assert!(result.is_err());
    }
}
