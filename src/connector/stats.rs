use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session activity counters
#[derive(Debug, Default)]
pub struct SessionStats {
    published: AtomicU64,
    flushed: AtomicU64,
    received: AtomicU64,
    subscribes: AtomicU64,
    reconnects: AtomicU64,
    async_errors: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatsSnapshot {
    pub published: u64,
    pub flushed: u64,
    pub received: u64,
    pub subscribes: u64,
    pub reconnects: u64,
    pub async_errors: u64,
}

impl SessionStats {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self) {
        self.flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscribe(&self) {
        self.subscribes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_async_error(&self) {
        self.async_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            subscribes: self.subscribes.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            async_errors: self.async_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = SessionStats::default();
        stats.record_published();
        stats.record_published();
        stats.record_received();
        stats.record_async_error();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.async_errors, 1);
        assert_eq!(snapshot.flushed, 0);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["published"], 2);
    }
}
