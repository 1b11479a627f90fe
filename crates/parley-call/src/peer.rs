use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::CallError;
use crate::media::MediaStream;

/// Identifies one call attempt so late events from a torn-down transport are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u64);

/// Signals raised by the peer-to-peer transport outside the relay.
#[derive(Debug)]
pub enum TransportEvent {
    /// A network path candidate the remote peer needs.
    LocalCandidate(Value),
    RemoteStream(MediaStream),
    /// Media is flowing between the peers.
    Connected,
    Failed(String),
}

/// Where a transport reports its events, tagged with the call that owns it.
#[derive(Clone)]
pub struct TransportEvents {
    call: CallId,
    tx: mpsc::UnboundedSender<(CallId, TransportEvent)>,
}

impl TransportEvents {
    pub fn new(call: CallId, tx: mpsc::UnboundedSender<(CallId, TransportEvent)>) -> Self {
        Self { call, tx }
    }

    pub fn call(&self) -> CallId {
        self.call
    }

    /// Returns false once the coordinator is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        trace!(call = self.call.0, ?event, "transport event");
        self.tx.send((self.call, event)).is_ok()
    }
}

/// One negotiated peer connection. Payloads are opaque to the coordinator.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates and applies the local offer.
    async fn create_offer(&self) -> Result<Value, CallError>;
    /// Applies a remote offer and returns the local answer.
    async fn accept_offer(&self, offer: Value) -> Result<Value, CallError>;
    async fn accept_answer(&self, answer: Value) -> Result<(), CallError>;
    async fn add_candidate(&self, candidate: Value) -> Result<(), CallError>;
    fn close(&self);
}

pub trait PeerTransportFactory: Send + Sync {
    /// Builds a transport sending `local` and reporting through `events`.
    fn create(
        &self,
        local: &MediaStream,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>, CallError>;
}
