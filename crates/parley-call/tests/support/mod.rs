#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parley_call::{
    CallConfig, CallCoordinator, CallDeps, CallError, CallId, CaptureTrack, ChatPostError,
    ChatSink, MediaCapture, MediaStream, PeerTransport, PeerTransportFactory, SignalSink,
    SignalingError, TrackKind, TransportEvent, TransportEvents,
};
use parley_proto::{ClientEvent, UserId};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub struct FakeTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

impl CaptureTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub fn camera_and_mic() -> MediaStream {
    let audio: Arc<dyn CaptureTrack> = FakeTrack::new(TrackKind::Audio);
    let video: Arc<dyn CaptureTrack> = FakeTrack::new(TrackKind::Video);
    MediaStream::new(vec![audio, video])
}

#[derive(Default)]
pub struct FakeCapture {
    pub deny: AtomicBool,
    acquired: Mutex<Vec<MediaStream>>,
}

impl FakeCapture {
    pub fn acquired(&self) -> Vec<MediaStream> {
        self.acquired.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire(&self) -> Result<MediaStream, CallError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::MediaUnavailable("permission denied".into()));
        }
        let stream = camera_and_mic();
        self.acquired.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

pub struct FakeTransport {
    pub events: TransportEvents,
    pub fail_answer: bool,
    pub closed: AtomicBool,
    pub remote_description: Mutex<Option<Value>>,
    pub remote_candidates: Mutex<Vec<Value>>,
}

impl FakeTransport {
    pub fn call(&self) -> CallId {
        self.events.call()
    }

    pub fn candidates(&self) -> Vec<Value> {
        self.remote_candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<Value, CallError> {
        Ok(json!({"type": "offer", "sdp": format!("offer-{}", self.call().0)}))
    }

    async fn accept_offer(&self, offer: Value) -> Result<Value, CallError> {
        *self.remote_description.lock().unwrap() = Some(offer);
        Ok(json!({"type": "answer", "sdp": format!("answer-{}", self.call().0)}))
    }

    async fn accept_answer(&self, answer: Value) -> Result<(), CallError> {
        if self.fail_answer {
            return Err(CallError::Transport("bad answer".into()));
        }
        *self.remote_description.lock().unwrap() = Some(answer);
        Ok(())
    }

    async fn add_candidate(&self, candidate: Value) -> Result<(), CallError> {
        self.remote_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeTransports {
    pub fail_answer: AtomicBool,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransports {
    pub fn latest(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created")
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

impl PeerTransportFactory for FakeTransports {
    fn create(
        &self,
        _local: &MediaStream,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        let transport = Arc::new(FakeTransport {
            events,
            fail_answer: self.fail_answer.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
            remote_description: Mutex::new(None),
            remote_candidates: Mutex::new(Vec::new()),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
pub struct RecordingSignals {
    sent: Mutex<Vec<ClientEvent>>,
}

impl RecordingSignals {
    pub fn take(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SignalSink for RecordingSignals {
    fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        self.sent.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChat {
    pub fail: AtomicBool,
    /// Posts are recorded but never complete.
    pub hang: AtomicBool,
    posts: Mutex<Vec<(UserId, String)>>,
}

impl RecordingChat {
    pub fn posts(&self) -> Vec<(UserId, String)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSink for RecordingChat {
    async fn post_text(&self, to: &UserId, text: &str) -> Result<(), ChatPostError> {
        self.posts.lock().unwrap().push((to.clone(), text.to_string()));
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChatPostError::Rejected {
                status: 503,
                message: "store unavailable".into(),
            });
        }
        Ok(())
    }
}

/// A coordinator wired to in-memory collaborators.
pub struct Harness {
    pub coordinator: CallCoordinator,
    pub transport_events: mpsc::UnboundedReceiver<(CallId, TransportEvent)>,
    pub capture: Arc<FakeCapture>,
    pub transports: Arc<FakeTransports>,
    pub signals: Arc<RecordingSignals>,
    pub chat: Arc<RecordingChat>,
}

impl Harness {
    pub fn new(local: &str) -> Self {
        Self::with_config(local, CallConfig::default())
    }

    pub fn with_config(local: &str, config: CallConfig) -> Self {
        let capture = Arc::new(FakeCapture::default());
        let transports = Arc::new(FakeTransports::default());
        let signals = Arc::new(RecordingSignals::default());
        let chat = Arc::new(RecordingChat::default());
        let deps = CallDeps {
            capture: capture.clone(),
            transports: transports.clone(),
            signals: signals.clone(),
            chat: chat.clone(),
        };
        let (coordinator, transport_events) = CallCoordinator::new(UserId::from(local), deps, config);
        Self {
            coordinator,
            transport_events,
            capture,
            transports,
            signals,
            chat,
        }
    }

    /// Feeds queued transport events into the coordinator.
    pub async fn pump(&mut self) {
        while let Ok((call, event)) = self.transport_events.try_recv() {
            self.coordinator.handle_transport_event(call, event).await;
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
