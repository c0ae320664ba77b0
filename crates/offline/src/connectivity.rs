//! Connectivity state and change notification.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Connectivity state of the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Backends are reachable.
    Online,
    /// Network unreachable; writes are queued.
    Offline,
}

impl ConnectivityState {
    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }
}

/// Source of truth for connectivity, observable through [`subscribe`](Self::subscribe).
///
/// Hosts flip it from their platform's network events; the queue engine
/// listens and replays queued work on recovery.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    /// Mark the wallet as offline.
    pub fn set_offline(&self) {
        self.set(ConnectivityState::Offline);
    }

    /// Mark the wallet as online.
    pub fn set_online(&self) {
        self.set(ConnectivityState::Online);
    }

    pub fn is_offline(&self) -> bool {
        self.state() == ConnectivityState::Offline
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    fn set(&self, state: ConnectivityState) {
        // Only notify subscribers on actual transitions.
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::info!(from = ?*current, to = ?state, "connectivity changed");
                *current = state;
                true
            }
        });
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_setters() {
        let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
        assert!(monitor.is_offline());

        monitor.set_online();
        assert!(!monitor.is_offline());
        assert!(monitor.state().is_online());
    }

    #[tokio::test]
    async fn subscribers_see_transitions_only() {
        let monitor = ConnectivityMonitor::default();
        let mut rx = monitor.subscribe();

        monitor.set_online();
        assert!(!rx.has_changed().unwrap());

        monitor.set_offline();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Offline);
    }
}
