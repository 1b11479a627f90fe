use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parley_proto::{ServerEvent, UserId};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one live transport connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

struct ConnectionEntry {
    user: Option<UserId>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Every open connection and the queue feeding its writer task.
///
/// Unlike the registry this includes connections that never identified
/// themselves and connections whose identity has been claimed by a newer one.
#[derive(Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<DashMap<SessionHandle, ConnectionEntry>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &self,
        user: Option<UserId>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new();
        self.inner.insert(handle, ConnectionEntry { user, tx });
        (handle, rx)
    }

    /// Forgets the connection, closing its queue once in-flight sends finish.
    pub fn close(&self, handle: SessionHandle) -> bool {
        self.inner.remove(&handle).is_some()
    }

    /// Queues `event` for one connection. Returns false if it is gone.
    pub fn send(&self, handle: SessionHandle, event: ServerEvent) -> bool {
        match self.inner.get(&handle) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Queues a clone of `event` for every open connection; returns how many accepted it.
    pub fn send_all(&self, event: &ServerEvent) -> usize {
        self.inner
            .iter()
            .filter(|entry| entry.tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn user(&self, handle: SessionHandle) -> Option<UserId> {
        self.inner
            .get(&handle)
            .and_then(|entry| entry.user.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn send_reaches_only_the_addressed_connection() {
        let table = ConnectionTable::new();
        let (a, mut rx_a) = table.open(Some(UserId::from("a")));
        let (_b, mut rx_b) = table.open(None);

        assert!(table.send(a, ServerEvent::CallEnded));
        assert_eq!(rx_a.try_recv().ok(), Some(ServerEvent::CallEnded));
        assert!(rx_b.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn closed_connections_refuse_sends() {
        let table = ConnectionTable::new();
        let (a, rx_a) = table.open(None);
        drop(rx_a);
        assert!(!table.send(a, ServerEvent::CallEnded));

        let (b, _rx_b) = table.open(None);
        assert!(table.close(b));
        assert!(!table.close(b));
        assert!(!table.send(b, ServerEvent::CallEnded));
    }

    #[test_timeout::timeout]
    fn send_all_counts_live_receivers() {
        let table = ConnectionTable::new();
        let (_a, _rx_a) = table.open(Some(UserId::from("a")));
        let (_b, rx_b) = table.open(None);
        drop(rx_b);
        assert_eq!(table.send_all(&ServerEvent::OnlineUsers(Vec::new())), 1);
        assert_eq!(table.len(), 2);
    }
}
