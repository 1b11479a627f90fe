//! Client side of a parley call.
//!
//! [`CallCoordinator`] owns the per-client call state machine. It talks to the
//! relay through a [`SignalSink`], to the device layer through [`MediaCapture`]
//! and [`PeerTransportFactory`], and records call ends through a [`ChatSink`].
//! [`CallDriver`] runs it on one task; [`SignalingClient`] and
//! [`HttpChatClient`] are the network implementations of the sinks.

pub mod chat;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod sink;

pub use chat::HttpChatClient;
pub use coordinator::{
    call_ended_text, CallConfig, CallCoordinator, CallDeps, CallRole, CallState, CallSummary,
    EndReason, DEFAULT_CHAT_POST_TIMEOUT, DEFAULT_NEGOTIATION_TIMEOUT,
};
pub use driver::{CallCommand, CallDriver, CallHandle, CallNotice};
pub use error::{CallError, ChatPostError, SignalingError};
pub use media::{CaptureTrack, MediaCapture, MediaStream, TrackKind};
pub use peer::{CallId, PeerTransport, PeerTransportFactory, TransportEvent, TransportEvents};
pub use signaling::SignalingClient;
pub use sink::{ChatSink, SignalSink};
