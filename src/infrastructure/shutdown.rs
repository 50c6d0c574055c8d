//! Graceful Shutdown
//!
//! Counts in-flight proxied connections so the process can give them a
//! bounded amount of time to finish after the listeners close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// In-flight connection count shared by every listener of a server.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicUsize>,
    /// Notified when the count drops to zero
    drained: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Count a connection until the returned guard is dropped.
    pub fn track(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    /// Wait until no connection is open, giving up after `timeout`.
    ///
    /// Returns false if connections were still open at the deadline.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            // Register before checking so a drop to zero in between is not missed.
            let notified = self.drained.notified();
            if self.open_connections() == 0 {
                return true;
            }

            tokio::select! {
                _ = notified => {}
                _ = &mut deadline => return false,
            }
        }
    }
}

/// Keeps one connection counted while alive.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.tracker.open.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.drained.notify_waiters();
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards_count_open_connections() {
        let tracker = ConnectionTracker::new();
        let cloned = tracker.clone();

        {
            let _first = tracker.track();
            let _second = cloned.track();
            assert_eq!(tracker.open_connections(), 2);
        }

        assert_eq!(cloned.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_open() {
        let tracker = ConnectionTracker::new();
        assert!(tracker.wait_for_drain(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_drain_waits_for_last_guard() {
        let tracker = ConnectionTracker::new();
        let first = tracker.track();
        let second = tracker.track();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(first);
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(second);
        });

        assert!(tracker.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(tracker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_drain_gives_up_at_deadline() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();

        assert!(!tracker.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(tracker.open_connections(), 1);
    }
}
