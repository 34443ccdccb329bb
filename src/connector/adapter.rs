//! # Connector Adapters
//!
//! Role-specific policy bound to one connector worker. The adapter is the
//! session's listener: it decides what to subscribe to once connected, how to
//! react to a lost connection, where inbound messages go, and when to signal
//! the pool barriers.
//!
//! ## Disconnect Handling
//!
//! - **Standard**: informational only; the transport reconnects on its own
//! - **Cloud**: coordinates are looked up again in the environment and the
//!   session reconnects to them once (consumers then re-subscribe). A failed
//!   attempt leaves the session disconnected.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::session::{ConnectionListener, ConnectionSession};
use super::states::Role;
use crate::config::ConnectionConfig;
use crate::environment::{resolve_coordinates, EnvironmentLookup};
use crate::messaging::{
    BrokerMessage, ConnectionEvent, MessagingError, MessagingResult, SubscriptionId,
};
use crate::pipeline::{
    ExceptionHandler, Exchange, PipelineError, ProcessingError, Processor,
};
use crate::pool::LifecycleSignals;

/// Exactly-once barrier arrivals for one adapter
#[derive(Debug)]
pub struct AdapterSignals {
    signals: LifecycleSignals,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl AdapterSignals {
    pub fn new(signals: LifecycleSignals) -> Self {
        Self {
            signals,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Signals for an adapter running outside a pool
    pub fn standalone(name: &str) -> Self {
        Self::new(LifecycleSignals::new(name, 1))
    }

    pub fn ready(&self) {
        if !self.started.swap(true, Ordering::AcqRel) {
            self.signals.startup.arrive();
        }
    }

    pub fn failed(&self) {
        if !self.started.swap(true, Ordering::AcqRel) {
            self.signals.startup.arrive_failed();
        }
    }

    pub fn stopped(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.signals.shutdown.arrive();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn lifecycle(&self) -> &LifecycleSignals {
        &self.signals
    }
}

/// State shared by both adapter roles
#[derive(Debug)]
pub struct AdapterContext {
    name: String,
    config: Arc<ConnectionConfig>,
    session: ConnectionSession,
    environment: Arc<dyn EnvironmentLookup>,
    signals: AdapterSignals,
    recovery_attempts: AtomicU64,
}

impl AdapterContext {
    pub fn new(
        name: impl Into<String>,
        config: Arc<ConnectionConfig>,
        session: ConnectionSession,
        environment: Arc<dyn EnvironmentLookup>,
        signals: AdapterSignals,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            session,
            environment,
            signals,
            recovery_attempts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn signals(&self) -> &AdapterSignals {
        &self.signals
    }

    /// Cloud reconnect attempts made so far
    pub fn recovery_attempts(&self) -> u64 {
        self.recovery_attempts.load(Ordering::Acquire)
    }

    fn should_recover(&self) -> bool {
        self.config.cloud_mode && !self.signals.is_stopped()
    }

    /// Look up fresh coordinates and reconnect the session to them
    async fn recover(&self) -> MessagingResult<()> {
        self.recovery_attempts.fetch_add(1, Ordering::AcqRel);

        let lookup_key = self
            .config
            .cloud_lookup_key
            .as_deref()
            .ok_or_else(|| MessagingError::recovery("", "no lookup key configured"))?;
        let servers = resolve_coordinates(self.environment.as_ref(), lookup_key)?;

        info!(
            worker = %self.name,
            lookup_key = %lookup_key,
            servers = %servers,
            "🔄 Reconnecting to cloud coordinates"
        );
        self.session
            .reconnect_to(&servers)
            .await
            .map_err(|e| MessagingError::recovery(lookup_key, e.to_string()))
    }
}

/// Policy object driven by a connector worker
#[async_trait]
pub trait ConnectorAdapter: ConnectionListener {
    fn role(&self) -> Role;

    fn context(&self) -> &AdapterContext;

    /// Session connected; set up and signal ready
    async fn on_initialized(&self);

    /// Worker is draining; signal stopped
    async fn on_shutdown(&self);

    /// Session could not connect; the worker never runs
    async fn on_connect_failed(&self, error: &MessagingError) {
        let context = self.context();
        error!(
            worker = %context.name(),
            role = %self.role(),
            servers = %context.config().servers_string(),
            error = %error,
            "❌ Unable to connect to broker"
        );
        context.signals().failed();
        context.signals().stopped();
    }

    /// Publish and flush; either failure is returned unchanged
    async fn publish(
        &self,
        subject: &str,
        reply_to: Option<&str>,
        payload: Bytes,
    ) -> MessagingResult<()> {
        let session = self.context().session();
        session.publish(subject, reply_to, payload).await?;
        if let Err(e) = session.flush().await {
            error!(worker = %self.context().name(), subject = %subject, error = %e, "Flush failed");
            return Err(e);
        }
        Ok(())
    }
}

/// Subscribes on initialization and feeds deliveries to a processor
pub struct ConsumerAdapter {
    context: AdapterContext,
    processor: Arc<dyn Processor>,
    exception_handler: Arc<dyn ExceptionHandler>,
}

impl std::fmt::Debug for ConsumerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerAdapter")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl ConsumerAdapter {
    pub fn new(
        context: AdapterContext,
        processor: Arc<dyn Processor>,
        exception_handler: Arc<dyn ExceptionHandler>,
    ) -> Self {
        Self {
            context,
            processor,
            exception_handler,
        }
    }

    async fn subscribe(&self) -> MessagingResult<()> {
        let config = self.context.config();
        let session = self.context.session();
        session
            .subscribe(&config.topic, config.queue_name.as_deref())
            .await?;
        if let Some(max) = config.max_messages {
            session.auto_unsubscribe(&config.topic, max).await?;
        }
        Ok(())
    }

    async fn subscribe_or_report(&self) {
        if let Err(e) = self.subscribe().await {
            error!(
                worker = %self.context.name(),
                subject = %self.context.config().topic,
                error = %e,
                "❌ Unable to subscribe"
            );
            self.exception_handler
                .handle("Error during subscribe", None, &PipelineError::from(e));
        }
    }
}

#[async_trait]
impl ConnectionListener for ConsumerAdapter {
    async fn on_message(&self, message: BrokerMessage, subscription: SubscriptionId) {
        debug!(worker = %self.context.name(), message = %message, "Received message");

        let mut exchange = Exchange::new(message, subscription);
        let outcome = AssertUnwindSafe(self.processor.process(&mut exchange))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => {
                let payload = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str));
                ProcessingError::panicked(payload)
            }
        };
        self.exception_handler.handle(
            "Error during processing",
            Some(&exchange),
            &PipelineError::from(failure),
        );
    }

    async fn on_disconnect(&self, event: ConnectionEvent) {
        info!(worker = %self.context.name(), event = %event, "Consumer disconnected");
        if !self.context.should_recover() {
            return;
        }
        match self.context.recover().await {
            Ok(()) => {
                info!(worker = %self.context.name(), "Consumer reconnected, re-subscribing");
                self.subscribe_or_report().await;
            }
            Err(e) => error!(
                worker = %self.context.name(),
                error = %e,
                "❌ Consumer cloud reconnect failed"
            ),
        }
    }

    async fn on_reconnect(&self, event: ConnectionEvent) {
        info!(worker = %self.context.name(), event = %event, "Consumer reconnected");
    }

    async fn on_close(&self, event: ConnectionEvent) {
        debug!(worker = %self.context.name(), event = %event, "Consumer connection closed");
        self.context.signals().stopped();
    }

    async fn on_exception(&self, error: MessagingError) {
        debug!(worker = %self.context.name(), error = %error, "Consumer async error");
        self.exception_handler
            .handle("Error during processing", None, &PipelineError::from(error));
    }
}

#[async_trait]
impl ConnectorAdapter for ConsumerAdapter {
    fn role(&self) -> Role {
        Role::Consumer
    }

    fn context(&self) -> &AdapterContext {
        &self.context
    }

    async fn on_initialized(&self) {
        self.subscribe_or_report().await;
        info!(
            worker = %self.context.name(),
            subject = %self.context.config().topic,
            queue_group = self.context.config().queue_name.as_deref().unwrap_or("-"),
            "✅ Consumer ready"
        );
        self.context.signals().ready();
    }

    async fn on_shutdown(&self) {
        debug!(worker = %self.context.name(), "Shutting down consumer");
        let topic = &self.context.config().topic;
        if let Err(e) = self.context.session().unsubscribe(topic).await {
            warn!(
                worker = %self.context.name(),
                subject = %topic,
                error = %e,
                "Unsubscribe during shutdown failed"
            );
        }
        self.context.signals().stopped();
    }
}

/// Publishes on behalf of the pipeline
#[derive(Debug)]
pub struct ProducerAdapter {
    context: AdapterContext,
}

impl ProducerAdapter {
    pub fn new(context: AdapterContext) -> Self {
        Self { context }
    }

    /// Publish `payload` on the configured subject with the configured reply subject
    pub async fn send_body(&self, payload: impl Into<Bytes> + Send) -> MessagingResult<()> {
        let config = self.context.config();
        self.publish(&config.topic, config.reply_subject.as_deref(), payload.into())
            .await
    }
}

#[async_trait]
impl ConnectionListener for ProducerAdapter {
    async fn on_message(&self, message: BrokerMessage, _subscription: SubscriptionId) {
        debug!(worker = %self.context.name(), message = %message, "Producer ignoring inbound message");
    }

    async fn on_disconnect(&self, event: ConnectionEvent) {
        info!(worker = %self.context.name(), event = %event, "Producer disconnected");
        if !self.context.should_recover() {
            return;
        }
        match self.context.recover().await {
            Ok(()) => info!(worker = %self.context.name(), "Producer reconnected"),
            Err(e) => error!(
                worker = %self.context.name(),
                error = %e,
                "❌ Producer cloud reconnect failed"
            ),
        }
    }

    async fn on_reconnect(&self, event: ConnectionEvent) {
        info!(worker = %self.context.name(), event = %event, "Producer reconnected");
    }

    async fn on_close(&self, event: ConnectionEvent) {
        debug!(worker = %self.context.name(), event = %event, "Producer connection closed");
        self.context.signals().stopped();
    }

    async fn on_exception(&self, error: MessagingError) {
        warn!(worker = %self.context.name(), error = %error, "Producer async error");
    }
}

#[async_trait]
impl ConnectorAdapter for ProducerAdapter {
    fn role(&self) -> Role {
        Role::Producer
    }

    fn context(&self) -> &AdapterContext {
        &self.context
    }

    async fn on_initialized(&self) {
        info!(
            worker = %self.context.name(),
            subject = %self.context.config().topic,
            "✅ Producer ready"
        );
        self.context.signals().ready();
    }

    async fn on_shutdown(&self) {
        debug!(worker = %self.context.name(), "Shutting down producer");
        self.context.signals().stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticEnvironment;
    use crate::messaging::InMemoryBroker;
    use parking_lot::Mutex;
    use std::sync::Weak;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProcessor {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Processor for CountingProcessor {
        async fn process(&self, exchange: &mut Exchange) -> Result<(), ProcessingError> {
            let body = exchange.message.payload_str().unwrap_or_default().to_string();
            self.seen.lock().push(body.clone());
            match body.as_str() {
                "fail" => Err(ProcessingError::new("rejected")),
                "panic" => panic!("processor exploded"),
                _ => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        contexts: Mutex<Vec<(String, bool, String)>>,
    }

    impl ExceptionHandler for RecordingHandler {
        fn handle(&self, context: &str, exchange: Option<&Exchange>, error: &PipelineError) {
            self.contexts
                .lock()
                .push((context.to_string(), exchange.is_some(), error.to_string()));
        }
    }

    fn consumer(
        broker: &InMemoryBroker,
        config: ConnectionConfig,
        env: Arc<StaticEnvironment>,
    ) -> (Arc<ConsumerAdapter>, Arc<CountingProcessor>, Arc<RecordingHandler>) {
        let config = Arc::new(config);
        let session = ConnectionSession::new(
            "consumer-0",
            config.connection_factory(Arc::new(broker.transport()), "consumer-0"),
            config.cloud_mode,
        );
        let processor = Arc::new(CountingProcessor::default());
        let handler = Arc::new(RecordingHandler::default());
        let context = AdapterContext::new(
            "consumer-0",
            config,
            session,
            env,
            AdapterSignals::standalone("consumer-0"),
        );
        let adapter = Arc::new(ConsumerAdapter::new(
            context,
            processor.clone(),
            handler.clone(),
        ));
        (adapter, processor, handler)
    }

    async fn connect(adapter: &Arc<ConsumerAdapter>) {
        let listener: Arc<dyn ConnectionListener> = adapter.clone();
        let weak: Weak<dyn ConnectionListener> = Arc::downgrade(&listener);
        adapter.context().session().connect(weak).await.unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_signals_fire_once() {
        let signals = AdapterSignals::standalone("once");
        signals.ready();
        signals.failed();
        signals.stopped();
        signals.stopped();

        assert!(signals.lifecycle().startup.is_open());
        assert_eq!(signals.lifecycle().startup.failures(), 0);
        assert!(signals.lifecycle().shutdown.is_open());
    }

    #[tokio::test]
    async fn test_processor_failures_reach_exception_handler() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let (adapter, processor, handler) = consumer(
            &broker,
            ConnectionConfig::new("nats://a:4222", "orders"),
            Arc::new(StaticEnvironment::new()),
        );
        connect(&adapter).await;
        adapter.on_initialized().await;

        for body in ["ok", "fail", "panic", "ok"] {
            adapter
                .publish("orders", None, Bytes::from(body))
                .await
                .unwrap();
        }
        settle().await;

        assert_eq!(processor.seen.lock().len(), 4);
        let contexts = handler.contexts.lock();
        assert_eq!(contexts.len(), 2);
        assert!(contexts
            .iter()
            .all(|(context, with_exchange, _)| context == "Error during processing" && *with_exchange));
        assert!(contexts[1].2.contains("processor exploded"));
    }

    #[tokio::test]
    async fn test_subscribe_failure_still_signals_ready() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let (adapter, _processor, handler) = consumer(
            &broker,
            ConnectionConfig::new("nats://a:4222", "orders..bad"),
            Arc::new(StaticEnvironment::new()),
        );
        connect(&adapter).await;
        adapter.on_initialized().await;

        assert!(adapter.context().signals().lifecycle().startup.is_open());
        assert_eq!(handler.contexts.lock()[0].0, "Error during subscribe");
    }

    #[tokio::test]
    async fn test_non_cloud_disconnect_does_not_recover() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let (adapter, _processor, _handler) = consumer(
            &broker,
            ConnectionConfig::new("nats://a:4222", "orders"),
            Arc::new(StaticEnvironment::new()),
        );
        connect(&adapter).await;

        broker.stop_server("nats://a:4222");
        settle().await;

        assert_eq!(adapter.context().recovery_attempts(), 0);
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_cloud_disconnect_reconnects_and_resubscribes() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222", "nats://b:4222"]);
        let env = Arc::new(StaticEnvironment::new().with("ORDERS_URI", "tcp://a:4222"));
        let (adapter, processor, _handler) = consumer(
            &broker,
            ConnectionConfig::new("nats://a:4222", "orders").with_cloud_lookup("ORDERS_URI"),
            env.clone(),
        );
        connect(&adapter).await;
        adapter.on_initialized().await;

        env.set("ORDERS_URI", "tcp://b:4222");
        broker.stop_server("nats://a:4222");
        settle().await;

        assert_eq!(adapter.context().recovery_attempts(), 1);
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(
            adapter.context().session().connected_server().as_deref(),
            Some("nats://b:4222")
        );

        adapter
            .publish("orders", None, Bytes::from_static(b"after"))
            .await
            .unwrap();
        settle().await;
        assert_eq!(*processor.seen.lock(), vec!["after".to_string()]);
    }

    #[tokio::test]
    async fn test_producer_send_body_uses_configured_reply() {
        let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
        let (listener_adapter, processor, _handler) = consumer(
            &broker,
            ConnectionConfig::new("nats://a:4222", "orders"),
            Arc::new(StaticEnvironment::new()),
        );
        connect(&listener_adapter).await;
        listener_adapter.on_initialized().await;

        let config = Arc::new(
            ConnectionConfig::new("nats://a:4222", "orders").with_reply_subject("orders.reply"),
        );
        let session = ConnectionSession::new(
            "producer-0",
            config.connection_factory(Arc::new(broker.transport()), "producer-0"),
            false,
        );
        let producer = Arc::new(ProducerAdapter::new(AdapterContext::new(
            "producer-0",
            config,
            session,
            Arc::new(StaticEnvironment::new()),
            AdapterSignals::standalone("producer-0"),
        )));
        let listener: Arc<dyn ConnectionListener> = producer.clone();
        producer
            .context()
            .session()
            .connect(Arc::downgrade(&listener))
            .await
            .unwrap();

        producer.send_body("hello").await.unwrap();
        settle().await;
        assert_eq!(*processor.seen.lock(), vec!["hello".to_string()]);

        broker.set_flush_failure(true);
        let err = producer.send_body("again").await.unwrap_err();
        assert!(matches!(err, MessagingError::Flush { .. }));
    }
}
