use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::{RwLock, mpsc};
use zephyr_process::ServerMessage;

pub const CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Debug)]
struct ClientLink {
    id: ClientId,
    tx: mpsc::Sender<ServerMessage>,
}

/// Holds at most one client. Pushes are best-effort: with no client attached,
/// or with its channel full or closed, the message is dropped and never queued.
/// Drops against an attached client are counted so callers can fall back to a
/// direct reply.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    inner: Arc<RwLock<Option<ClientLink>>>,
    dropped: Arc<AtomicU64>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previously attached client.
    pub async fn attach(&self, id: ClientId, tx: mpsc::Sender<ServerMessage>) {
        let prev = self.inner.write().await.replace(ClientLink { id, tx });
        if let Some(prev) = prev {
            tracing::info!(old = %prev.id, new = %id, "console client replaced");
        } else {
            tracing::info!(client = %id, "console client attached");
        }
    }

    /// Detaches only if `id` is still the active client.
    pub async fn detach(&self, id: ClientId) -> bool {
        let mut guard = self.inner.write().await;
        if guard.as_ref().is_some_and(|link| link.id == id) {
            *guard = None;
            tracing::info!(client = %id, "console client detached");
            true
        } else {
            false
        }
    }

    pub async fn active(&self) -> Option<ClientId> {
        self.inner.read().await.as_ref().map(|link| link.id)
    }

    pub async fn is_active(&self, id: ClientId) -> bool {
        self.active().await == Some(id)
    }

    /// Pushes dropped against an attached client since the hub was created.
    pub fn dropped_pushes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn push(&self, msg: ServerMessage) {
        let guard = self.inner.read().await;
        let Some(link) = guard.as_ref() else {
            return;
        };
        if let Err(err) = link.tx.try_send(msg) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::debug!(client = %link.id, "client channel full; push dropped");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!(client = %link.id, "client channel closed; push dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_without_client_is_dropped() {
        let hub = ConnectionHub::new();
        hub.push(ServerMessage::output("lost")).await;

        let (tx, mut rx) = mpsc::channel(4);
        hub.attach(ClientId::next(), tx).await;
        hub.push(ServerMessage::output("seen")).await;
        assert_eq!(rx.recv().await, Some(ServerMessage::output("seen")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn attach_replaces_previous_client() {
        let hub = ConnectionHub::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let a = ClientId::next();
        let b = ClientId::next();
        hub.attach(a, tx1).await;
        hub.attach(b, tx2).await;

        hub.push(ServerMessage::status("running")).await;
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.recv().await, Some(ServerMessage::status("running")));
        assert!(hub.is_active(b).await);
    }

    #[tokio::test]
    async fn stale_detach_keeps_newer_client() {
        let hub = ConnectionHub::new();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        let a = ClientId::next();
        let b = ClientId::next();
        hub.attach(a, tx1).await;
        hub.attach(b, tx2).await;

        assert!(!hub.detach(a).await);
        assert_eq!(hub.active().await, Some(b));
        assert!(hub.detach(b).await);
        assert_eq!(hub.active().await, None);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::channel(1);
        hub.attach(ClientId::next(), tx).await;
        hub.push(ServerMessage::output("1")).await;
        hub.push(ServerMessage::output("2")).await;
        assert_eq!(rx.recv().await, Some(ServerMessage::output("1")));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.dropped_pushes(), 1);
    }

    #[tokio::test]
    async fn pushes_without_client_are_not_counted_as_dropped() {
        let hub = ConnectionHub::new();
        hub.push(ServerMessage::status("running")).await;
        assert_eq!(hub.dropped_pushes(), 0);

        let (tx, rx) = mpsc::channel(1);
        hub.attach(ClientId::next(), tx).await;
        drop(rx);
        hub.push(ServerMessage::status("stopped")).await;
        assert_eq!(hub.dropped_pushes(), 1);
    }
}
