use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use parley_proto::{ChatMessage, SendMessageRequest, ServerEvent, UserId, UserProfile};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::SessionRegistry;
use crate::session::ConnectionTable;
use crate::upload::{decode_inline_media, MediaKind, MediaUploader, UploadError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message has no content")]
    EmptyMessage,
    #[error("invalid {kind} payload: {reason}")]
    InvalidMedia { kind: &'static str, reason: String },
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type MessagePredicate<'a> = &'a (dyn Fn(&ChatMessage) -> bool + Send + Sync);
pub type UserPredicate<'a> = &'a (dyn Fn(&UserProfile) -> bool + Send + Sync);

/// The external document store holding users and messages.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_message(&self, message: ChatMessage) -> Result<(), StoreError>;
    async fn find_messages(
        &self,
        predicate: MessagePredicate<'_>,
    ) -> Result<Vec<ChatMessage>, StoreError>;
    async fn find_users(&self, predicate: UserPredicate<'_>)
        -> Result<Vec<UserProfile>, StoreError>;
}

/// In-process document store.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<Vec<UserProfile>>,
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().collect()),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn insert_user(&self, user: UserProfile) {
        let mut users = self.users.write();
        users.retain(|existing| existing.id != user.id);
        users.push(user);
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_message(&self, message: ChatMessage) -> Result<(), StoreError> {
        self.messages.write().push(message);
        Ok(())
    }

    async fn find_messages(
        &self,
        predicate: MessagePredicate<'_>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .messages
            .read()
            .iter()
            .filter(|message| predicate(message))
            .cloned()
            .collect())
    }

    async fn find_users(
        &self,
        predicate: UserPredicate<'_>,
    ) -> Result<Vec<UserProfile>, StoreError> {
        Ok(self
            .users
            .read()
            .iter()
            .filter(|user| predicate(user))
            .cloned()
            .collect())
    }
}

/// Sends and lists chat messages, pushing new ones to the receiver if online.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn DocumentStore>,
    uploader: Arc<dyn MediaUploader>,
    registry: SessionRegistry,
    connections: ConnectionTable,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        uploader: Arc<dyn MediaUploader>,
        registry: SessionRegistry,
        connections: ConnectionTable,
    ) -> Self {
        Self {
            store,
            uploader,
            registry,
            connections,
        }
    }

    /// Uploads any media, persists the message, then pushes it to `receiver`.
    ///
    /// A failed upload aborts the send before anything is stored.
    pub async fn send_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        request: SendMessageRequest,
    ) -> Result<ChatMessage, ChatError> {
        if request.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let image = self.upload_inline(MediaKind::Image, request.image).await?;
        let video = self.upload_inline(MediaKind::Video, request.video).await?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            text: request.text.filter(|text| !text.trim().is_empty()),
            image,
            video,
            created_at: Utc::now(),
        };
        self.store.insert_message(message.clone()).await?;
        info!(id = %message.id, from = %sender, to = %receiver, "message stored");

        match self.registry.lookup(receiver) {
            Some(session)
                if self
                    .connections
                    .send(session, ServerEvent::NewMessage(message.clone())) =>
            {
                debug!(id = %message.id, session = %session, "message pushed");
            }
            _ => debug!(id = %message.id, to = %receiver, "receiver offline; message not pushed"),
        }

        Ok(message)
    }

    /// Every message exchanged between `a` and `b`, oldest first.
    pub async fn conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let mut messages = self
            .store
            .find_messages(&|message: &ChatMessage| message.involves(a, b))
            .await?;
        messages.sort_by_key(|message| message.created_at);
        Ok(messages)
    }

    /// Every known user except `me`.
    pub async fn contacts(&self, me: &UserId) -> Result<Vec<UserProfile>, ChatError> {
        Ok(self
            .store
            .find_users(&|user: &UserProfile| &user.id != me)
            .await?)
    }

    async fn upload_inline(
        &self,
        kind: MediaKind,
        raw: Option<String>,
    ) -> Result<Option<String>, ChatError> {
        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            return Ok(None);
        };
        let bytes = decode_inline_media(&raw).map_err(|err| ChatError::InvalidMedia {
            kind: kind.as_str(),
            reason: err.to_string(),
        })?;
        match self.uploader.upload(kind, bytes).await {
            Ok(url) => Ok(Some(url)),
            Err(err) => {
                warn!(kind = kind.as_str(), error = %err, "media upload failed; aborting send");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceBroadcaster;
    use crate::upload::DisabledUploader;

    struct FixedUploader;

    #[async_trait]
    impl MediaUploader for FixedUploader {
        async fn upload(&self, kind: MediaKind, bytes: Vec<u8>) -> Result<String, UploadError> {
            Ok(format!("https://cdn.test/{}/{}", kind.as_str(), bytes.len()))
        }
    }

    fn service(
        uploader: Arc<dyn MediaUploader>,
    ) -> (ChatService, Arc<MemoryStore>, SessionRegistry, ConnectionTable) {
        let connections = ConnectionTable::new();
        let registry =
            SessionRegistry::new(Arc::new(PresenceBroadcaster::new(connections.clone())));
        let store = Arc::new(MemoryStore::with_users([
            profile("a", "Ada"),
            profile("b", "Bo"),
            profile("c", "Cy"),
        ]));
        let chat = ChatService::new(
            store.clone(),
            uploader,
            registry.clone(),
            connections.clone(),
        );
        (chat, store, registry, connections)
    }

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: UserId::from(id),
            full_name: name.to_string(),
            profile_pic: None,
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn sent_message_is_stored_and_pushed_to_online_receiver() {
        let (chat, store, registry, connections) = service(Arc::new(FixedUploader));
        let (b_session, mut b_rx) = connections.open(Some(UserId::from("b")));
        registry.register(UserId::from("b"), b_session);
        while b_rx.try_recv().is_ok() {}

        let message = chat
            .send_message(
                &UserId::from("a"),
                &UserId::from("b"),
                SendMessageRequest {
                    text: Some("hi".into()),
                    image: Some("data:image/png;base64,aGVsbG8=".into()),
                    video: None,
                },
            )
            .await
            .expect("send");

        assert_eq!(message.image.as_deref(), Some("https://cdn.test/image/5"));
        assert_eq!(store.message_count(), 1);
        assert_eq!(
            b_rx.try_recv().ok(),
            Some(ServerEvent::NewMessage(message))
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn upload_failure_persists_nothing() {
        let (chat, store, _, _) = service(Arc::new(DisabledUploader));
        let err = chat
            .send_message(
                &UserId::from("a"),
                &UserId::from("b"),
                SendMessageRequest {
                    text: Some("look".into()),
                    image: None,
                    video: Some("aGVsbG8=".into()),
                },
            )
            .await
            .expect_err("upload must fail");

        assert!(matches!(err, ChatError::Upload(UploadError::NotConfigured)));
        assert_eq!(store.message_count(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn empty_and_malformed_messages_are_rejected() {
        let (chat, store, _, _) = service(Arc::new(FixedUploader));
        let empty = chat
            .send_message(
                &UserId::from("a"),
                &UserId::from("b"),
                SendMessageRequest::text("   "),
            )
            .await;
        assert!(matches!(empty, Err(ChatError::EmptyMessage)));

        let malformed = chat
            .send_message(
                &UserId::from("a"),
                &UserId::from("b"),
                SendMessageRequest {
                    image: Some("not base64!".into()),
                    ..SendMessageRequest::default()
                },
            )
            .await;
        assert!(matches!(
            malformed,
            Err(ChatError::InvalidMedia { kind: "image", .. })
        ));
        assert_eq!(store.message_count(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn conversation_includes_both_directions_only() {
        let (chat, _, _, _) = service(Arc::new(FixedUploader));
        let a = UserId::from("a");
        let b = UserId::from("b");
        let c = UserId::from("c");
        chat.send_message(&a, &b, SendMessageRequest::text("1"))
            .await
            .expect("a->b");
        chat.send_message(&b, &a, SendMessageRequest::text("2"))
            .await
            .expect("b->a");
        chat.send_message(&a, &c, SendMessageRequest::text("3"))
            .await
            .expect("a->c");

        let texts: Vec<String> = chat
            .conversation(&a, &b)
            .await
            .expect("conversation")
            .into_iter()
            .filter_map(|message| message.text)
            .collect();
        assert_eq!(texts, vec!["1".to_string(), "2".to_string()]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn contacts_exclude_the_caller() {
        let (chat, _, _, _) = service(Arc::new(FixedUploader));
        let ids: Vec<UserId> = chat
            .contacts(&UserId::from("a"))
            .await
            .expect("contacts")
            .into_iter()
            .map(|user| user.id)
            .collect();
        assert_eq!(ids, vec![UserId::from("b"), UserId::from("c")]);
    }
}
