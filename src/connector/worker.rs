//! # Connector Worker
//!
//! Runnable unit wrapping one connection session. A worker connects, hands
//! control to its adapter, then parks until shutdown is requested so that it
//! occupies its task for the whole lifetime of the connection.
//!
//! A worker runs at most once; it is not reusable after it stops. A shutdown
//! requested before the worker is running is remembered: the worker drains
//! right after connecting instead of parking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::adapter::ConnectorAdapter;
use super::session::{ConnectionListener, ConnectionSession};
use super::states::{Role, SessionState, WorkerState};
use super::stats::SessionStatsSnapshot;
use crate::messaging::{MessagingError, MessagingResult};

/// Snapshot of one worker for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub role: Role,
    pub worker_state: WorkerState,
    pub session_state: SessionState,
    pub connected_server: Option<String>,
    pub recovery_attempts: u64,
    pub stats: SessionStatsSnapshot,
}

pub struct ConnectorWorker<A: ConnectorAdapter> {
    name: String,
    adapter: Arc<A>,
    state: RwLock<WorkerState>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    submitted: AtomicBool,
    stop_signal: Notify,
}

impl<A: ConnectorAdapter> std::fmt::Debug for ConnectorWorker<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorWorker")
            .field("name", &self.name)
            .field("role", &self.adapter.role())
            .field("state", &*self.state.read())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl<A: ConnectorAdapter> ConnectorWorker<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        Self {
            name: adapter.context().name().to_string(),
            adapter,
            state: RwLock::new(WorkerState::Idle),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            submitted: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn session(&self) -> &ConnectionSession {
        self.adapter.context().session()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> WorkerStatus {
        let context = self.adapter.context();
        WorkerStatus {
            name: self.name.clone(),
            role: self.adapter.role(),
            worker_state: self.state(),
            session_state: context.session().state(),
            connected_server: context.session().connected_server(),
            recovery_attempts: context.recovery_attempts(),
            stats: context.session().stats(),
        }
    }

    fn transition(&self, next: WorkerState) {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            warn!(worker = %self.name, from = %*state, to = %next, "Unexpected worker transition");
        }
        debug!(worker = %self.name, from = %*state, to = %next, "Worker transition");
        *state = next;
    }

    /// Drive the session through its whole lifecycle
    ///
    /// Returns once the worker stopped. A connect failure is returned after the
    /// adapter has been told about it.
    pub async fn run(self: Arc<Self>) -> MessagingResult<()> {
        if self.submitted.swap(true, Ordering::AcqRel) {
            return Err(MessagingError::invalid_state(format!(
                "worker {} has already been run",
                self.name
            )));
        }

        self.transition(WorkerState::Connecting);
        let listener: Arc<dyn ConnectionListener> = self.adapter.clone();
        if let Err(e) = self.session().connect(Arc::downgrade(&listener)).await {
            self.adapter.on_connect_failed(&e).await;
            self.transition(WorkerState::Stopped);
            return Err(e);
        }

        // Published before the stop flag is read; pairs with the order in `shutdown`
        self.running.store(true, Ordering::SeqCst);
        if self.stop_requested.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            warn!(worker = %self.name, "Shutdown requested while connecting, draining without running");
            self.adapter.context().signals().failed();
            self.transition(WorkerState::Draining);
            self.drain().await;
            return Ok(());
        }

        self.adapter.on_initialized().await;
        self.transition(WorkerState::Running);
        crate::log_connector!(info, "Worker running", worker: self.name, role: self.adapter.role());

        while self.running.load(Ordering::SeqCst) {
            self.stop_signal.notified().await;
        }

        self.transition(WorkerState::Draining);
        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        self.adapter.on_shutdown().await;
        self.session().close().await;
        self.transition(WorkerState::Stopped);
        crate::log_connector!(info, "Worker stopped", worker: self.name);
    }

    /// Request shutdown; true if this call stopped a running worker
    ///
    /// A request made before the worker runs is recorded and honored once the
    /// connection is up.
    pub fn shutdown(&self) -> bool {
        self.stop_requested.store(true, Ordering::SeqCst);
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.stop_signal.notify_one();
            true
        } else {
            debug!(worker = %self.name, state = %self.state(), "Shutdown recorded, worker not running");
            false
        }
    }
}
