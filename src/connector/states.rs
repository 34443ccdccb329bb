use serde::{Deserialize, Serialize};
use std::fmt;

/// Connector worker lifecycle
///
/// `Idle -> Connecting -> Running -> Draining -> Stopped`, with a direct
/// `Connecting -> Stopped` edge when the connection cannot be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Created, not yet submitted
    Idle,
    /// Establishing the broker connection
    Connecting,
    /// Connected and parked until shutdown
    Running,
    /// Shutdown requested, adapter and session tearing down
    Draining,
    /// Exited its run loop; never restarted
    Stopped,
}

impl WorkerState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Check if the worker currently holds a live session
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }

    /// Whether `self -> next` is a legal worker transition
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Running)
                | (Self::Connecting, Self::Stopped)
                | (Self::Connecting, Self::Draining)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Stopped)
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "connecting" => Ok(Self::Connecting),
            "running" => Ok(Self::Running),
            "draining" => Ok(Self::Draining),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid worker state: {s}")),
        }
    }
}

/// Connection session state, owned by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unconnected,
    Connected,
    /// Connected with one active subscription
    Subscribed,
    /// Connection lost; the transport may still reconnect
    Disconnected,
    Closed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Subscribed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Role of an adapter, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Producer,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
        }
    }
}
