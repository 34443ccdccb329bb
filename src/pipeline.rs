//! # Pipeline Interfaces
//!
//! What the bridge hands inbound messages to: a [`Processor`] called once per
//! message with an [`Exchange`], and an [`ExceptionHandler`] that receives any
//! failure the processor or the connection raises. Neither call may propagate
//! an error back into the connector.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::constants::headers;
use crate::messaging::{BrokerMessage, MessagingError, SubscriptionId};

/// One inbound message plus receive metadata
#[derive(Debug, Clone)]
pub struct Exchange {
    pub id: Uuid,
    pub message: BrokerMessage,
    pub received_at: DateTime<Utc>,
    pub subscription_id: SubscriptionId,
    /// Receive metadata as strings; processors may add their own entries
    pub headers: HashMap<String, String>,
}

impl Exchange {
    pub fn new(message: BrokerMessage, subscription_id: SubscriptionId) -> Self {
        let received_at = Utc::now();
        let mut entries = HashMap::new();
        entries.insert(
            headers::MESSAGE_TIMESTAMP.to_string(),
            received_at.timestamp_millis().to_string(),
        );
        entries.insert(
            headers::SUBSCRIPTION_ID.to_string(),
            subscription_id.to_string(),
        );
        entries.insert(headers::SUBJECT.to_string(), message.subject.clone());
        if let Some(reply) = &message.reply_to {
            entries.insert(headers::REPLY_TO.to_string(), reply.clone());
        }

        Self {
            id: Uuid::new_v4(),
            message,
            received_at,
            subscription_id,
            headers: entries,
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Failure raised while processing one exchange
#[derive(Debug, Error)]
#[error("Processing failed: {message}")]
pub struct ProcessingError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Processor panicked; `payload` is the panic payload if it was a string
    pub fn panicked(payload: Option<&str>) -> Self {
        Self::new(format!(
            "processor panicked: {}",
            payload.unwrap_or("non-string panic payload")
        ))
    }
}

impl From<anyhow::Error> for ProcessingError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

/// Errors delivered to an [`ExceptionHandler`]
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

/// Consumer of inbound exchanges
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), ProcessingError>;
}

/// Fire-and-forget sink for errors the connector cannot propagate
pub trait ExceptionHandler: Send + Sync + 'static {
    fn handle(&self, context: &str, exchange: Option<&Exchange>, error: &PipelineError);
}

/// Default handler: logs at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle(&self, context: &str, exchange: Option<&Exchange>, error: &PipelineError) {
        match exchange {
            Some(exchange) => error!(
                context = %context,
                exchange_id = %exchange.id,
                subject = %exchange.message.subject,
                error = %error,
                "❌ Pipeline error"
            ),
            None => error!(context = %context, error = %error, "❌ Pipeline error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_headers() {
        let subscription = SubscriptionId::new();
        let exchange = Exchange::new(
            BrokerMessage::new("orders", "x").with_reply_to("inbox.1"),
            subscription,
        );

        assert_eq!(exchange.header(headers::SUBJECT), Some("orders"));
        assert_eq!(exchange.header(headers::REPLY_TO), Some("inbox.1"));
        assert_eq!(
            exchange.header(headers::SUBSCRIPTION_ID),
            Some(subscription.to_string().as_str())
        );
        let millis: i64 = exchange
            .header(headers::MESSAGE_TIMESTAMP)
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(millis, exchange.received_at.timestamp_millis());
    }

    #[test]
    fn test_processing_error_from_anyhow() {
        let err: ProcessingError = anyhow::anyhow!("bad payload").into();
        assert_eq!(err.to_string(), "Processing failed: bad payload");
        assert!(err.source.is_some());

        let wrapped: PipelineError = err.into();
        assert!(wrapped.to_string().contains("bad payload"));
    }

    #[test]
    fn test_panicked_message() {
        let err = ProcessingError::panicked(Some("boom"));
        assert!(err.to_string().contains("boom"));
    }
}
