//! Network reachability signal.
//!
//! The host feeds reachability changes into a [`ConnectivityMonitor`]; every
//! engine that was given a subscription sees the flips as `connectivity`
//! events. Hosts without such a signal simply pass no monitor, and the engine
//! assumes it is always online.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Observable online/offline state shared between the host and engines.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Create a monitor that starts online.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Current reachability.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report a reachability change. Repeated reports of the same state are
    /// not forwarded to subscribers.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    }

    /// Subscribe to reachability changes.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::online()
    }
}

/// Receiving side of a [`ConnectivityMonitor`].
pub struct ConnectivitySubscription {
    rx: watch::Receiver<bool>,
}

impl ConnectivitySubscription {
    /// Current reachability, marking it as seen.
    pub fn current(&mut self) -> bool {
        *self.rx.borrow_and_update()
    }

    /// Wait for the next flip. Returns `None` once the monitor is gone,
    /// after which the last known state stays in effect.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flip_is_observed() {
        let monitor = ConnectivityMonitor::online();
        let mut sub = monitor.subscribe();
        assert!(sub.current());

        monitor.set_online(false);
        assert_eq!(sub.changed().await, Some(false));
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_duplicate_report_is_not_forwarded() {
        let monitor = ConnectivityMonitor::online();
        let mut sub = monitor.subscribe();
        sub.current();

        monitor.set_online(true);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), sub.changed()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_dropped_monitor_ends_subscription() {
        let monitor = ConnectivityMonitor::new(false);
        let mut sub = monitor.subscribe();
        drop(monitor);
        assert_eq!(sub.changed().await, None);
    }
}
