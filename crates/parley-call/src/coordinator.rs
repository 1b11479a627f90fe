use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parley_proto::{ClientEvent, ServerEvent, UserId};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::media::{MediaCapture, MediaStream, TrackKind};
use crate::peer::{CallId, PeerTransport, PeerTransportFactory, TransportEvent, TransportEvents};
use crate::sink::{ChatSink, SignalSink};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHAT_POST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Calling,
    Negotiating,
    Active,
    /// Cleanup in progress; always followed by `Idle`.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    HungUp,
    RemoteEnded,
    TimedOut,
    NegotiationFailed,
    TransportFailed,
    RelayLost,
}

impl EndReason {
    /// Locally decided ends tell the peer; the rest have no one to tell.
    pub fn notifies_peer(self) -> bool {
        matches!(
            self,
            EndReason::HungUp | EndReason::TimedOut | EndReason::NegotiationFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub remote: UserId,
    pub role: CallRole,
    pub reason: EndReason,
    /// Whether media ever connected.
    pub connected: bool,
    pub ended_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long an attempt may sit in `Calling`/`Negotiating` before it is abandoned.
    pub negotiation_timeout: Duration,
    /// Upper bound on recording the call end in chat.
    pub chat_post_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            chat_post_timeout: DEFAULT_CHAT_POST_TIMEOUT,
        }
    }
}

/// External collaborators a coordinator drives.
#[derive(Clone)]
pub struct CallDeps {
    pub capture: Arc<dyn MediaCapture>,
    pub transports: Arc<dyn PeerTransportFactory>,
    pub signals: Arc<dyn SignalSink>,
    pub chat: Arc<dyn ChatSink>,
}

/// Chat entry recorded when a call ends.
pub fn call_ended_text(at: DateTime<Local>) -> String {
    format!("Call Ended at {}", at.format("%H:%M:%S"))
}

struct CallSession {
    id: CallId,
    remote: UserId,
    role: CallRole,
    state: CallState,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    transport: Option<Arc<dyn PeerTransport>>,
    deadline: Instant,
    connected: bool,
    muted: bool,
    camera_off: bool,
}

/// Per-client call state machine: `Idle → Calling → Negotiating → Active → Ended → Idle`.
///
/// At most one call exists at a time. Every method runs to completion before the
/// next input is applied; [`crate::CallDriver`] feeds it from a single task.
pub struct CallCoordinator {
    local: UserId,
    config: CallConfig,
    deps: CallDeps,
    events_tx: mpsc::UnboundedSender<(CallId, TransportEvent)>,
    next_call: u64,
    session: Option<CallSession>,
    state_tx: watch::Sender<CallState>,
}

impl CallCoordinator {
    /// Returns the coordinator and the queue its transports report into.
    pub fn new(
        local: UserId,
        deps: CallDeps,
        config: CallConfig,
    ) -> (Self, mpsc::UnboundedReceiver<(CallId, TransportEvent)>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CallState::Idle);
        let coordinator = Self {
            local,
            config,
            deps,
            events_tx,
            next_call: 0,
            session: None,
            state_tx,
        };
        (coordinator, events_rx)
    }

    pub fn local_user(&self) -> &UserId {
        &self.local
    }

    pub fn state(&self) -> CallState {
        self.session
            .as_ref()
            .map_or(CallState::Idle, |session| session.state)
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    pub fn current_call(&self) -> Option<CallId> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn remote(&self) -> Option<&UserId> {
        self.session.as_ref().map(|session| &session.remote)
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.session.as_ref()?.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.session.as_ref()?.remote_stream.as_ref()
    }

    pub fn is_muted(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.muted)
    }

    pub fn is_camera_off(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.camera_off)
    }

    /// When the pending attempt gives up, if one is pending.
    pub fn negotiation_deadline(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .filter(|session| matches!(session.state, CallState::Calling | CallState::Negotiating))
            .map(|session| session.deadline)
    }

    /// Places a call to `remote`: capture, offer, then wait in `Negotiating`.
    pub async fn start_call(&mut self, remote: UserId) -> Result<(), CallError> {
        if remote == self.local {
            return Err(CallError::SelfCall);
        }
        if let Some(session) = &self.session {
            return Err(CallError::Busy(session.remote.to_string()));
        }

        let id = self.begin(remote.clone(), CallRole::Caller);
        self.publish(CallState::Calling);
        info!(call = id.0, to = %remote, "placing call");

        if let Err(err) = self.dial(id, &remote).await {
            warn!(call = id.0, to = %remote, error = %err, "call attempt failed");
            self.abandon();
            return Err(err);
        }
        Ok(())
    }

    async fn dial(&mut self, id: CallId, remote: &UserId) -> Result<(), CallError> {
        let transport = self.attach_media(id).await?;
        let offer = transport.create_offer().await?;
        self.deps.signals.send(ClientEvent::Offer {
            offer,
            to: remote.clone(),
        })?;
        self.publish(CallState::Negotiating);
        Ok(())
    }

    /// Applies one relay event. Returns the summary when it ended the call.
    pub async fn handle_signal(
        &mut self,
        event: ServerEvent,
    ) -> Result<Option<CallSummary>, CallError> {
        match event {
            ServerEvent::Offer { offer, from } => self.on_offer(offer, from).await.map(|_| None),
            ServerEvent::Answer { answer, from } => self.on_answer(answer, from).await,
            ServerEvent::IceCandidate { candidate, from } => {
                self.on_candidate(candidate, from).await;
                Ok(None)
            }
            ServerEvent::CallEnded => {
                if self.session.is_none() {
                    debug!("call-ended received with no call in progress");
                    return Ok(None);
                }
                Ok(self.end(EndReason::RemoteEnded).await)
            }
            ServerEvent::OnlineUsers(_) | ServerEvent::NewMessage(_) => Ok(None),
        }
    }

    async fn on_offer(&mut self, offer: Value, from: UserId) -> Result<(), CallError> {
        if let Some(session) = &self.session {
            if session.remote == from {
                warn!(from = %from, "duplicate offer from current peer ignored");
                return Ok(());
            }
            info!(from = %from, busy_with = %session.remote, "rejecting offer while busy");
            self.deps.signals.send(ClientEvent::CallEnded { to: from })?;
            return Ok(());
        }

        let id = self.begin(from.clone(), CallRole::Callee);
        info!(call = id.0, from = %from, "answering incoming call");
        match self.answer(id, &from, offer).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(call = id.0, from = %from, error = %err, "could not answer call");
                self.abandon();
                // The caller would otherwise wait out its timeout.
                if let Err(send_err) = self.deps.signals.send(ClientEvent::CallEnded { to: from }) {
                    debug!(error = %send_err, "could not decline call");
                }
                Err(err)
            }
        }
    }

    async fn answer(&mut self, id: CallId, from: &UserId, offer: Value) -> Result<(), CallError> {
        let transport = self.attach_media(id).await?;
        let answer = transport.accept_offer(offer).await?;
        self.deps.signals.send(ClientEvent::Answer {
            answer,
            to: from.clone(),
        })?;
        self.publish(CallState::Negotiating);
        Ok(())
    }

    async fn on_answer(
        &mut self,
        answer: Value,
        from: UserId,
    ) -> Result<Option<CallSummary>, CallError> {
        let Some(transport) = self.transport_for(&from) else {
            debug!(from = %from, "answer ignored: no matching call");
            return Ok(None);
        };
        if self.session.as_ref().map(|session| session.role) != Some(CallRole::Caller) {
            debug!(from = %from, "answer ignored: not the caller");
            return Ok(None);
        }
        match transport.accept_answer(answer).await {
            Ok(()) => {
                debug!(from = %from, "answer applied");
                Ok(None)
            }
            Err(err) => {
                warn!(from = %from, error = %err, "failed to apply answer");
                self.end(EndReason::NegotiationFailed).await;
                Err(err)
            }
        }
    }

    async fn on_candidate(&mut self, candidate: Value, from: UserId) {
        let Some(transport) = self.transport_for(&from) else {
            debug!(from = %from, "candidate ignored: no matching call");
            return;
        };
        if let Err(err) = transport.add_candidate(candidate).await {
            warn!(from = %from, error = %err, "remote candidate rejected");
        }
    }

    /// Applies a transport event. Events from an earlier call are dropped.
    pub async fn handle_transport_event(
        &mut self,
        call: CallId,
        event: TransportEvent,
    ) -> Option<CallSummary> {
        let Some(session) = self.session.as_mut().filter(|session| session.id == call) else {
            debug!(call = call.0, "stale transport event ignored");
            return None;
        };

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let to = session.remote.clone();
                if let Err(err) = self.deps.signals.send(ClientEvent::IceCandidate { candidate, to }) {
                    warn!(call = call.0, error = %err, "could not send local candidate");
                }
                None
            }
            TransportEvent::RemoteStream(stream) => {
                debug!(call = call.0, ?stream, "remote stream attached");
                if let Some(previous) = session.remote_stream.replace(stream) {
                    previous.stop_all();
                }
                None
            }
            TransportEvent::Connected => {
                if session.state == CallState::Negotiating {
                    session.state = CallState::Active;
                    session.connected = true;
                    self.state_tx.send_replace(CallState::Active);
                    info!(call = call.0, with = %session.remote, "call connected");
                }
                None
            }
            TransportEvent::Failed(reason) => {
                warn!(call = call.0, reason = %reason, "peer transport failed");
                self.end(EndReason::TransportFailed).await
            }
        }
    }

    /// Ends the current call at the user's request.
    pub async fn hang_up(&mut self) -> Option<CallSummary> {
        self.end(EndReason::HungUp).await
    }

    /// Ends a pending attempt whose deadline has passed.
    pub async fn check_deadline(&mut self) -> Option<CallSummary> {
        let deadline = self.negotiation_deadline()?;
        if Instant::now() < deadline {
            return None;
        }
        info!(to = ?self.remote().map(UserId::as_str), "call attempt timed out");
        self.end(EndReason::TimedOut).await
    }

    /// The relay connection is gone; nothing can reach the peer.
    pub async fn relay_lost(&mut self) -> Option<CallSummary> {
        self.end(EndReason::RelayLost).await
    }

    /// Flips the microphone and returns whether it is now muted.
    pub fn toggle_mute(&mut self) -> Option<bool> {
        let session = self.session.as_mut()?;
        let muted = session.local_stream.as_ref()?.toggle(TrackKind::Audio)?;
        session.muted = muted;
        Some(muted)
    }

    /// Flips the camera and returns whether it is now off.
    pub fn toggle_camera(&mut self) -> Option<bool> {
        let session = self.session.as_mut()?;
        let off = session.local_stream.as_ref()?.toggle(TrackKind::Video)?;
        session.camera_off = off;
        Some(off)
    }

    fn begin(&mut self, remote: UserId, role: CallRole) -> CallId {
        self.next_call += 1;
        let id = CallId(self.next_call);
        self.session = Some(CallSession {
            id,
            remote,
            role,
            state: CallState::Calling,
            local_stream: None,
            remote_stream: None,
            transport: None,
            deadline: Instant::now() + self.config.negotiation_timeout,
            connected: false,
            muted: false,
            camera_off: false,
        });
        id
    }

    async fn attach_media(&mut self, id: CallId) -> Result<Arc<dyn PeerTransport>, CallError> {
        let local = self.deps.capture.acquire().await?;
        let events = TransportEvents::new(id, self.events_tx.clone());
        let transport = match self.deps.transports.create(&local, events) {
            Ok(transport) => transport,
            Err(err) => {
                local.stop_all();
                return Err(err);
            }
        };
        if let Some(session) = self.session.as_mut() {
            session.local_stream = Some(local);
            session.transport = Some(transport.clone());
        }
        Ok(transport)
    }

    fn transport_for(&self, from: &UserId) -> Option<Arc<dyn PeerTransport>> {
        self.session
            .as_ref()
            .filter(|session| &session.remote == from)
            .and_then(|session| session.transport.clone())
    }

    fn publish(&mut self, state: CallState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        self.state_tx.send_replace(state);
    }

    /// Drops a call that never got going: no chat entry, no `call-ended`.
    fn abandon(&mut self) {
        if let Some(session) = self.session.take() {
            release(&session);
        }
        self.state_tx.send_replace(CallState::Idle);
    }

    async fn end(&mut self, reason: EndReason) -> Option<CallSummary> {
        let session = self.session.take()?;
        self.state_tx.send_replace(CallState::Ended);
        release(&session);

        if reason.notifies_peer() {
            let to = session.remote.clone();
            if let Err(err) = self.deps.signals.send(ClientEvent::CallEnded { to }) {
                warn!(call = session.id.0, error = %err, "could not notify peer of call end");
            }
        }
        self.state_tx.send_replace(CallState::Idle);
        info!(call = session.id.0, with = %session.remote, ?reason, "call ended");

        let ended_at = Local::now();
        let ended_text = call_ended_text(ended_at);
        let post = self
            .deps
            .chat
            .post_text(&session.remote, &ended_text);
        match tokio::time::timeout(self.config.chat_post_timeout, post).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(call = session.id.0, error = %err, "failed to record call end in chat");
            }
            Err(_) => {
                warn!(call = session.id.0, "timed out recording call end in chat");
            }
        }

        Some(CallSummary {
            remote: session.remote,
            role: session.role,
            reason,
            connected: session.connected,
            ended_at,
        })
    }
}

fn release(session: &CallSession) {
    if let Some(stream) = &session.local_stream {
        stream.stop_all();
    }
    if let Some(stream) = &session.remote_stream {
        stream.stop_all();
    }
    if let Some(transport) = &session.transport {
        transport.close();
    }
}
