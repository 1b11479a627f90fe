use async_trait::async_trait;
use parley_proto::{ClientEvent, UserId};

use crate::error::{ChatPostError, SignalingError};

/// Outbound half of the relay connection.
pub trait SignalSink: Send + Sync {
    fn send(&self, event: ClientEvent) -> Result<(), SignalingError>;
}

/// Posts chat entries on behalf of the local user.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn post_text(&self, to: &UserId, text: &str) -> Result<(), ChatPostError>;
}
