//! # Broker Messages
//!
//! The message shape shared by sessions and transports: a subject, an
//! optional reply subject and an immutable byte payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A message as published to or delivered from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Subject the message is published on
    pub subject: String,
    /// Optional subject a responder should reply to
    pub reply_to: Option<String>,
    /// Message body; cheap to clone, never mutated after construction
    pub payload: Bytes,
}

impl BrokerMessage {
    /// Create a message without a reply subject
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply_to: None,
            payload: payload.into(),
        }
    }

    /// Attach a reply subject
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload interpreted as UTF-8, if valid
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Display for BrokerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reply_to {
            Some(reply) => write!(
                f,
                "{{subject={}, reply={}, length={}}}",
                self.subject,
                reply,
                self.payload.len()
            ),
            None => write!(
                f,
                "{{subject={}, length={}}}",
                self.subject,
                self.payload.len()
            ),
        }
    }
}

/// Identifier assigned by a transport to an active subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
