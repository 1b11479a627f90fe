//! Wire types shared by the parley relay and its clients.
//!
//! Every relay frame is a JSON text frame of the form
//! `{"event": "<name>", "data": <payload>}`. Negotiation payloads (offers,
//! answers, candidates) are carried as opaque [`serde_json::Value`]s; nothing
//! in this crate or the relay looks inside them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Path the relay serves its WebSocket endpoint on.
pub const SOCKET_PATH: &str = "/socket";

/// Query parameter carrying the connecting user's identity.
pub const USER_ID_QUERY: &str = "userId";

/// Header the upstream auth layer uses to assert the caller on HTTP routes.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Builds the relay WebSocket URL for `base` (e.g. `ws://localhost:8080`).
///
/// Without a user id the connection is served but never registered.
pub fn socket_url(base: &str, user_id: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match user_id {
        Some(id) => format!(
            "{base}{SOCKET_PATH}?{USER_ID_QUERY}={}",
            urlencoding::encode(id)
        ),
        None => format!("{base}{SOCKET_PATH}"),
    }
}

/// Opaque, stable identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a user id from untrusted input, treating blank values as absent.
    /// Anything else is kept exactly as sent.
    pub fn parse_optional(raw: Option<&str>) -> Option<Self> {
        raw.filter(|value| !value.trim().is_empty())
            .map(|value| Self(value.to_string()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    CallEnded,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::CallEnded => "call-ended",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events a client sends to the relay.
///
/// There is deliberately no `from` field: a client-supplied sender is ignored
/// during deserialization and the relay stamps the identity it knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "offer")]
    Offer { offer: Value, to: UserId },
    #[serde(rename = "answer")]
    Answer { answer: Value, to: UserId },
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: Value, to: UserId },
    #[serde(rename = "call-ended")]
    CallEnded { to: UserId },
}

impl ClientEvent {
    pub fn kind(&self) -> SignalKind {
        match self {
            ClientEvent::Offer { .. } => SignalKind::Offer,
            ClientEvent::Answer { .. } => SignalKind::Answer,
            ClientEvent::IceCandidate { .. } => SignalKind::IceCandidate,
            ClientEvent::CallEnded { .. } => SignalKind::CallEnded,
        }
    }

    pub fn target(&self) -> &UserId {
        match self {
            ClientEvent::Offer { to, .. }
            | ClientEvent::Answer { to, .. }
            | ClientEvent::IceCandidate { to, .. }
            | ClientEvent::CallEnded { to } => to,
        }
    }

    /// Binds the event to a server-asserted sender.
    pub fn into_envelope(self, from: UserId) -> SignalEnvelope {
        let kind = self.kind();
        let (payload, to) = match self {
            ClientEvent::Offer { offer, to } => (Some(offer), to),
            ClientEvent::Answer { answer, to } => (Some(answer), to),
            ClientEvent::IceCandidate { candidate, to } => (Some(candidate), to),
            ClientEvent::CallEnded { to } => (None, to),
        };
        SignalEnvelope {
            kind,
            payload,
            from,
            to,
        }
    }
}

/// A negotiation message in flight through the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    pub kind: SignalKind,
    pub payload: Option<Value>,
    pub from: UserId,
    pub to: UserId,
}

impl SignalEnvelope {
    /// Converts the envelope into the event delivered to the target session.
    pub fn into_delivery(self) -> ServerEvent {
        let payload = self.payload.unwrap_or(Value::Null);
        match self.kind {
            SignalKind::Offer => ServerEvent::Offer {
                offer: payload,
                from: self.from,
            },
            SignalKind::Answer => ServerEvent::Answer {
                answer: payload,
                from: self.from,
            },
            SignalKind::IceCandidate => ServerEvent::IceCandidate {
                candidate: payload,
                from: self.from,
            },
            SignalKind::CallEnded => ServerEvent::CallEnded,
        }
    }
}

/// Events the relay pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "offer")]
    Offer { offer: Value, from: UserId },
    #[serde(rename = "answer")]
    Answer { answer: Value, from: UserId },
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: Value, from: UserId },
    #[serde(rename = "call-ended")]
    CallEnded,
    /// Full presence snapshot, sorted.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),
    #[serde(rename = "newMessage")]
    NewMessage(ChatMessage),
}

impl ServerEvent {
    pub fn signal_kind(&self) -> Option<SignalKind> {
        match self {
            ServerEvent::Offer { .. } => Some(SignalKind::Offer),
            ServerEvent::Answer { .. } => Some(SignalKind::Answer),
            ServerEvent::IceCandidate { .. } => Some(SignalKind::IceCandidate),
            ServerEvent::CallEnded => Some(SignalKind::CallEnded),
            ServerEvent::OnlineUsers(_) | ServerEvent::NewMessage(_) => None,
        }
    }
}

/// A persisted chat entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Content URL returned by object storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn involves(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }
}

/// Body of `POST /api/messages/send/:id`.
///
/// `image` and `video` carry base64 media (optionally as a `data:` URL) that
/// the relay uploads before persisting the message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
}

impl SendMessageRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        let blank = |field: &Option<String>| field.as_deref().map_or(true, |v| v.trim().is_empty());
        blank(&self.text) && blank(&self.image) && blank(&self.video)
    }
}

/// Public profile returned by the contacts route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
}
