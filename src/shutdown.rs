use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Tells long-lived WebSocket handlers the server is going away, and counts
/// how many are still open.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
    active: Arc<AtomicUsize>,
}

/// Held by a connection for its lifetime; decrements the active count on drop.
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Release);
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a connection. The receiver flips to `true` on shutdown.
    pub fn register(&self) -> (ConnectionGuard, watch::Receiver<bool>) {
        self.active.fetch_add(1, Ordering::AcqRel);
        (
            ConnectionGuard {
                active: Arc::clone(&self.active),
            },
            self.tx.subscribe(),
        )
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_counts_and_guard_releases() {
        let coord = ShutdownCoordinator::new();
        let (guard, _rx) = coord.register();
        assert_eq!(coord.active_connections(), 1);
        drop(guard);
        assert_eq!(coord.active_connections(), 0);
    }

    #[tokio::test]
    async fn shutdown_notifies_registered_receivers() {
        let coord = ShutdownCoordinator::new();
        let (_guard, mut rx) = coord.register();
        assert!(!coord.is_shutting_down());

        coord.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(coord.is_shutting_down());
    }
}
