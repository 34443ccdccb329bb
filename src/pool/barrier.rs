//! # Pool Barrier
//!
//! Countdown primitive for pool-wide lifecycle milestones. A barrier starts
//! at N and is decremented once per worker; waiters wake when it reaches
//! zero. The count never goes below zero: arrivals past zero are ignored and
//! reported as such.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BarrierError {
    #[error("Barrier {barrier} timed out with {remaining} of {total} arrivals outstanding")]
    Timeout {
        barrier: String,
        remaining: usize,
        total: usize,
    },
}

/// Outcome observed by a waiter once the barrier opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BarrierReport {
    pub total: usize,
    pub failures: usize,
}

impl BarrierReport {
    pub fn is_success(&self) -> bool {
        self.failures == 0
    }
}

#[derive(Debug)]
pub struct PoolBarrier {
    name: String,
    total: usize,
    remaining: AtomicUsize,
    failures: AtomicUsize,
    notify: Notify,
}

impl PoolBarrier {
    pub fn new(name: impl Into<String>, total: usize) -> Self {
        Self {
            name: name.into(),
            total,
            remaining: AtomicUsize::new(total),
            failures: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.remaining() == 0
    }

    /// Count one successful arrival; false if the barrier was already open
    pub fn arrive(&self) -> bool {
        self.count_down(false)
    }

    /// Count one arrival that failed; waiters see it in the report
    pub fn arrive_failed(&self) -> bool {
        self.count_down(true)
    }

    fn count_down(&self, failed: bool) -> bool {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(previous) => {
                if failed {
                    self.failures.fetch_add(1, Ordering::AcqRel);
                }
                debug!(
                    barrier = %self.name,
                    remaining = previous - 1,
                    failed = failed,
                    "Barrier arrival"
                );
                if previous == 1 {
                    self.notify.notify_waiters();
                }
                true
            }
            Err(_) => {
                warn!(barrier = %self.name, "Arrival at an already open barrier ignored");
                false
            }
        }
    }

    /// Wait until every participant arrived, or until `timeout` elapses
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<BarrierReport, BarrierError> {
        let opened = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_open() {
                    return;
                }
                notified.await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, opened).await.map_err(|_| {
                BarrierError::Timeout {
                    barrier: self.name.clone(),
                    remaining: self.remaining(),
                    total: self.total,
                }
            })?,
            None => opened.await,
        }

        Ok(BarrierReport {
            total: self.total,
            failures: self.failures(),
        })
    }
}

/// The startup and shutdown barriers of one pool run
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    pub startup: Arc<PoolBarrier>,
    pub shutdown: Arc<PoolBarrier>,
}

impl LifecycleSignals {
    pub fn new(pool: &str, size: usize) -> Self {
        Self {
            startup: Arc::new(PoolBarrier::new(format!("{pool}.startup"), size)),
            shutdown: Arc::new(PoolBarrier::new(format!("{pool}.shutdown"), size)),
        }
    }
}
