//! # Connection Session
//!
//! Owns exactly one broker connection and at most one active subscription.
//!
//! The session registers itself as the transport's event handler and forwards
//! lifecycle events to a [`ConnectionListener`] (the adapter). Every connection
//! the session opens gets a new generation number; events raised by a
//! connection the session has already replaced are dropped, so a
//! `reconnect_to` never surfaces the old connection's `Closed` event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::states::SessionState;
use super::stats::{SessionStats, SessionStatsSnapshot};
use crate::messaging::subject::same_subject;
use crate::messaging::{
    BrokerMessage, ConnectionEvent, ConnectionFactory, MessageHandler, MessagingError,
    MessagingResult, SubscriptionId, TransportConnection, TransportEvent, TransportEventHandler,
    TransportSubscription,
};

/// Receiver of session events
#[async_trait]
pub trait ConnectionListener: Send + Sync + 'static {
    /// A message arrived on the active subscription
    async fn on_message(&self, message: BrokerMessage, subscription: SubscriptionId);

    async fn on_disconnect(&self, event: ConnectionEvent);

    async fn on_reconnect(&self, event: ConnectionEvent);

    async fn on_close(&self, event: ConnectionEvent);

    /// Asynchronous error raised by the transport
    async fn on_exception(&self, error: MessagingError);
}

/// Description of the active subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub subject: String,
    pub queue_group: Option<String>,
}

struct ActiveSubscription {
    subject: String,
    queue_group: Option<String>,
    handle: Arc<dyn TransportSubscription>,
}

struct SessionInner {
    name: String,
    cloud_mode: bool,
    factory: Mutex<ConnectionFactory>,
    connection: RwLock<Option<Arc<dyn TransportConnection>>>,
    subscription: Mutex<Option<ActiveSubscription>>,
    state: RwLock<SessionState>,
    generation: AtomicU64,
    listener: RwLock<Option<Weak<dyn ConnectionListener>>>,
    stats: SessionStats,
}

impl SessionInner {
    fn listener(&self) -> Option<Arc<dyn ConnectionListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != SessionState::Closed {
            *state = next;
        }
    }
}

/// Handle to a connection session; clones share the same connection
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("name", &self.inner.name)
            .field("cloud_mode", &self.inner.cloud_mode)
            .field("state", &*self.inner.state.read())
            .finish()
    }
}

impl ConnectionSession {
    pub fn new(name: impl Into<String>, factory: ConnectionFactory, cloud_mode: bool) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                name: name.into(),
                cloud_mode,
                factory: Mutex::new(factory),
                connection: RwLock::new(None),
                subscription: Mutex::new(None),
                state: RwLock::new(SessionState::Unconnected),
                generation: AtomicU64::new(0),
                listener: RwLock::new(None),
                stats: SessionStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_cloud_mode(&self) -> bool {
        self.inner.cloud_mode
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Server the live connection is attached to
    pub fn connected_server(&self) -> Option<String> {
        self.connection().and_then(|c| c.connected_server())
    }

    pub async fn active_subscription(&self) -> Option<SubscriptionInfo> {
        self.inner
            .subscription
            .lock()
            .await
            .as_ref()
            .map(|active| SubscriptionInfo {
                id: active.handle.id(),
                subject: active.subject.clone(),
                queue_group: active.queue_group.clone(),
            })
    }

    fn connection(&self) -> Option<Arc<dyn TransportConnection>> {
        self.inner.connection.read().clone()
    }

    /// Establish the connection and register `listener` for its events
    ///
    /// In cloud mode the transport is told not to reconnect on its own.
    pub async fn connect(&self, listener: Weak<dyn ConnectionListener>) -> MessagingResult<()> {
        *self.inner.listener.write() = Some(listener);
        self.open().await
    }

    async fn open(&self) -> MessagingResult<()> {
        let mut factory = self.inner.factory.lock().await;
        if self.inner.cloud_mode {
            factory.set_reconnect_allowed(false);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let sink = Arc::new(SessionEventSink {
            session: Arc::downgrade(&self.inner),
            generation,
        });

        let connection = factory.create_connection(sink).await?;
        let servers = factory.servers().join(",");
        drop(factory);

        let server = connection.connected_server();
        let installed = {
            let mut state = self.inner.state.write();
            if *state == SessionState::Closed {
                false
            } else {
                *self.inner.connection.write() = Some(connection.clone());
                *state = SessionState::Connected;
                true
            }
        };
        if !installed {
            warn!(
                session = %self.inner.name,
                servers = %servers,
                "Session closed while connecting, releasing new connection"
            );
            if let Err(e) = connection.close().await {
                debug!(session = %self.inner.name, error = %e, "Ignoring error closing unused connection");
            }
            return Err(MessagingError::invalid_state(format!(
                "session {} was closed while connecting",
                self.inner.name
            )));
        }

        info!(
            session = %self.inner.name,
            servers = %servers,
            server = server.as_deref().unwrap_or("-"),
            cloud_mode = self.inner.cloud_mode,
            "Session connected"
        );
        Ok(())
    }

    /// Hand a message to the transport; callers follow up with [`flush`](Self::flush)
    pub async fn publish(
        &self,
        subject: &str,
        reply_to: Option<&str>,
        payload: impl Into<Bytes>,
    ) -> MessagingResult<()> {
        let connection = self
            .connection()
            .ok_or_else(|| MessagingError::not_connected("publish"))?;

        let mut message = BrokerMessage::new(subject, payload);
        if let Some(reply) = reply_to {
            message = message.with_reply_to(reply);
        }

        connection.publish(message).await?;
        self.inner.stats.record_published();
        Ok(())
    }

    pub async fn flush(&self) -> MessagingResult<()> {
        let connection = match self.connection() {
            Some(connection) if connection.is_connected() => connection,
            _ => return Err(MessagingError::flush("session is not connected")),
        };
        connection.flush().await?;
        self.inner.stats.record_flushed();
        Ok(())
    }

    /// Subscribe to `subject`, optionally as a member of `queue_group`
    ///
    /// A no-op returning the existing id when `subject` (case-insensitive) is
    /// already the active subscription. A different subject replaces it.
    pub async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> MessagingResult<SubscriptionId> {
        if self.state() == SessionState::Closed {
            return Err(MessagingError::subscribe(subject, "session is closed"));
        }
        let connection = self
            .connection()
            .ok_or_else(|| MessagingError::subscribe(subject, "session is not connected"))?;

        let mut active = self.inner.subscription.lock().await;
        if let Some(current) = active.as_ref() {
            if same_subject(&current.subject, subject) && current.handle.is_active() {
                debug!(
                    session = %self.inner.name,
                    subject = %subject,
                    "Already subscribed, ignoring"
                );
                return Ok(current.handle.id());
            }

            info!(
                session = %self.inner.name,
                previous = %current.subject,
                subject = %subject,
                "Replacing active subscription"
            );
            if let Err(e) = current.handle.unsubscribe().await {
                debug!(session = %self.inner.name, error = %e, "Previous subscription already inactive");
            }
            *active = None;
        }

        let dispatch = Arc::new(SessionDispatch {
            session: Arc::downgrade(&self.inner),
        });
        let handle = connection.subscribe(subject, queue_group, dispatch).await?;
        let id = handle.id();
        *active = Some(ActiveSubscription {
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            handle,
        });
        drop(active);

        self.inner.set_state(SessionState::Subscribed);
        self.inner.stats.record_subscribe();

        info!(
            session = %self.inner.name,
            subject = %subject,
            queue_group = queue_group.unwrap_or("-"),
            subscription = %id,
            "Subscribed"
        );
        Ok(id)
    }

    /// End the active subscription after `max` deliveries, if it is on `subject`
    pub async fn auto_unsubscribe(&self, subject: &str, max: u64) -> MessagingResult<()> {
        let active = self.inner.subscription.lock().await;
        match active.as_ref() {
            Some(current) if same_subject(&current.subject, subject) => {
                current.handle.auto_unsubscribe(max).await?;
                debug!(
                    session = %self.inner.name,
                    subject = %subject,
                    max_messages = max,
                    "Auto-unsubscribe registered"
                );
                Ok(())
            }
            _ => {
                info!(
                    session = %self.inner.name,
                    subject = %subject,
                    "No active subscription on subject, auto-unsubscribe ignored"
                );
                Ok(())
            }
        }
    }

    /// End the active subscription now, if it is on `subject`
    pub async fn unsubscribe(&self, subject: &str) -> MessagingResult<()> {
        let mut active = self.inner.subscription.lock().await;
        let matches = active
            .as_ref()
            .map(|current| same_subject(&current.subject, subject))
            .unwrap_or(false);
        if !matches {
            info!(
                session = %self.inner.name,
                subject = %subject,
                "No active subscription on subject, unsubscribe ignored"
            );
            return Ok(());
        }

        let Some(current) = active.take() else {
            return Ok(());
        };
        drop(active);

        if self.state() == SessionState::Subscribed {
            self.inner.set_state(SessionState::Connected);
        }
        if !current.handle.is_active() {
            debug!(
                session = %self.inner.name,
                subject = %subject,
                "Subscription already ended, nothing to unsubscribe"
            );
            return Ok(());
        }
        current.handle.unsubscribe().await
    }

    /// Drop the current connection and subscription, then connect to `servers`
    ///
    /// Re-subscribing is left to the caller.
    pub async fn reconnect_to(&self, servers: &str) -> MessagingResult<()> {
        let discarded = self.inner.subscription.lock().await.take();
        if let Some(previous) = discarded {
            debug!(
                session = %self.inner.name,
                subject = %previous.subject,
                "Discarding subscription before reconnect"
            );
        }

        // Anything the old connection still raises belongs to a stale generation
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        let previous = self.inner.connection.write().take();
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                debug!(session = %self.inner.name, error = %e, "Ignoring error closing previous connection");
            }
        }
        self.inner.set_state(SessionState::Disconnected);

        self.inner.factory.lock().await.set_servers(servers);
        self.open().await?;
        self.inner.stats.record_reconnect();
        Ok(())
    }

    /// Release the connection; repeated calls do nothing
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        self.inner.subscription.lock().await.take();
        let connection = self.inner.connection.write().take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                debug!(session = %self.inner.name, error = %e, "Ignoring error while closing connection");
            }
        }
        debug!(session = %self.inner.name, "Session closed");
    }
}

/// Transport event handler bound to one connection generation
struct SessionEventSink {
    session: Weak<SessionInner>,
    generation: u64,
}

#[async_trait]
impl TransportEventHandler for SessionEventSink {
    async fn on_event(&self, event: TransportEvent) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        if inner.generation.load(Ordering::Acquire) != self.generation {
            debug!(
                session = %inner.name,
                event = event.kind(),
                "Dropping event from replaced connection"
            );
            return;
        }

        let listener = inner.listener();
        match event {
            TransportEvent::Disconnected(details) => {
                inner.set_state(SessionState::Disconnected);
                if let Some(listener) = listener {
                    listener.on_disconnect(details).await;
                }
            }
            TransportEvent::Reconnected(details) => {
                let subscribed = inner.subscription.lock().await.is_some();
                inner.set_state(if subscribed {
                    SessionState::Subscribed
                } else {
                    SessionState::Connected
                });
                inner.stats.record_reconnect();
                if let Some(listener) = listener {
                    listener.on_reconnect(details).await;
                }
            }
            TransportEvent::Closed(details) => {
                *inner.state.write() = SessionState::Closed;
                if let Some(listener) = listener {
                    listener.on_close(details).await;
                }
            }
            TransportEvent::AsyncError(error) => {
                inner.stats.record_async_error();
                match listener {
                    Some(listener) => listener.on_exception(error).await,
                    None => warn!(session = %inner.name, error = %error, "Async error with no listener"),
                }
            }
        }
    }
}

/// Message handler forwarding deliveries to the session listener
struct SessionDispatch {
    session: Weak<SessionInner>,
}

#[async_trait]
impl MessageHandler for SessionDispatch {
    async fn on_message(&self, message: BrokerMessage, subscription: SubscriptionId) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        inner.stats.record_received();
        if let Some(listener) = inner.listener() {
            listener.on_message(message, subscription).await;
        }
    }
}
