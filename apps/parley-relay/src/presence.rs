use parley_proto::ServerEvent;
use tracing::debug;

use crate::registry::{PresenceListener, PresenceSet};
use crate::session::ConnectionTable;

/// Pushes the full presence snapshot to every open connection.
///
/// Always the whole set rather than a delta, so a client that missed an
/// update converges on the next one.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    connections: ConnectionTable,
}

impl PresenceBroadcaster {
    pub fn new(connections: ConnectionTable) -> Self {
        Self { connections }
    }

    pub fn broadcast(&self, presence: &PresenceSet) -> usize {
        let event = ServerEvent::OnlineUsers(presence.to_vec());
        let delivered = self.connections.send_all(&event);
        debug!(online = presence.len(), delivered, "presence broadcast");
        delivered
    }
}

impl PresenceListener for PresenceBroadcaster {
    fn presence_changed(&self, presence: &PresenceSet) {
        self.broadcast(presence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use parley_proto::UserId;
    use std::sync::Arc;

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test_timeout::timeout]
    fn broadcast_reaches_identified_and_anonymous_connections() {
        let connections = ConnectionTable::new();
        let registry = SessionRegistry::new(Arc::new(PresenceBroadcaster::new(
            connections.clone(),
        )));
        let (_anon, mut anon_rx) = connections.open(None);
        let (a, mut a_rx) = connections.open(Some(UserId::from("a")));

        registry.register(UserId::from("a"), a);

        let expected = vec![ServerEvent::OnlineUsers(vec![UserId::from("a")])];
        assert_eq!(drain(&mut anon_rx), expected);
        assert_eq!(drain(&mut a_rx), expected);
    }

    #[test_timeout::timeout]
    fn snapshots_arrive_in_mutation_order() {
        let connections = ConnectionTable::new();
        let registry = SessionRegistry::new(Arc::new(PresenceBroadcaster::new(
            connections.clone(),
        )));
        let (watcher, mut rx) = connections.open(None);

        registry.register(UserId::from("b"), open_detached(&connections));
        registry.register(UserId::from("a"), watcher);
        registry.unregister(&UserId::from("b"));

        let seen: Vec<Vec<UserId>> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::OnlineUsers(users) => Some(users),
                _ => None,
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                vec![UserId::from("b")],
                vec![UserId::from("a"), UserId::from("b")],
                vec![UserId::from("a")],
            ]
        );
    }

    fn open_detached(connections: &ConnectionTable) -> crate::session::SessionHandle {
        connections.open(None).0
    }
}
