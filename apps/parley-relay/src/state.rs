use std::sync::Arc;

use parley_proto::{ServerEvent, UserId};
use tokio::sync::mpsc;
use tracing::info;

use crate::chat::{ChatService, DocumentStore};
use crate::presence::PresenceBroadcaster;
use crate::registry::{PresenceSet, SessionRegistry};
use crate::router::SignalRouter;
use crate::session::{ConnectionTable, SessionHandle};
use crate::upload::MediaUploader;

/// A freshly accepted connection and the queue its writer drains.
pub struct Connection {
    pub handle: SessionHandle,
    pub outbound: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Everything the relay owns for one process lifetime.
///
/// Created at startup and passed to the HTTP and WebSocket handlers; call
/// [`RelayState::shutdown`] when the listener stops.
pub struct RelayState {
    connections: ConnectionTable,
    registry: SessionRegistry,
    router: SignalRouter,
    chat: ChatService,
}

impl RelayState {
    pub fn new(store: Arc<dyn DocumentStore>, uploader: Arc<dyn MediaUploader>) -> Self {
        let connections = ConnectionTable::new();
        let broadcaster = Arc::new(PresenceBroadcaster::new(connections.clone()));
        let registry = SessionRegistry::new(broadcaster);
        let router = SignalRouter::new(registry.clone(), connections.clone());
        let chat = ChatService::new(store, uploader, registry.clone(), connections.clone());
        Self {
            connections,
            registry,
            router,
            chat,
        }
    }

    /// Accepts a connection and brings every client's presence view up to date.
    pub fn connect(&self, user: Option<UserId>) -> Connection {
        let (handle, outbound) = self.connections.open(user.clone());
        match user {
            Some(user) => self.registry.register(user, handle),
            None => self.registry.announce(),
        }
        Connection { handle, outbound }
    }

    pub fn disconnect(&self, user: Option<&UserId>, handle: SessionHandle) {
        self.connections.close(handle);
        if let Some(user) = user {
            self.registry.unregister_session(user, handle);
        }
    }

    pub fn router(&self) -> &SignalRouter {
        &self.router
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn presence(&self) -> PresenceSet {
        self.registry.presence()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn shutdown(&self) {
        info!(
            online = self.registry.len(),
            connections = self.connections.len(),
            "clearing session registry"
        );
        self.registry.clear();
    }
}
