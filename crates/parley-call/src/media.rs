use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One capture or playback track owned by the platform media layer.
///
/// `enabled` is a soft mute; `stop` releases the underlying device and is final.
pub trait CaptureTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
    fn is_stopped(&self) -> bool;
}

/// A set of tracks captured or received together.
#[derive(Clone, Default)]
pub struct MediaStream {
    tracks: Vec<Arc<dyn CaptureTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn CaptureTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn CaptureTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn CaptureTrack>> {
        self.tracks.iter().filter(move |track| track.kind() == kind)
    }

    /// Flips `enabled` on every track of `kind` and returns whether they are
    /// now disabled. Returns `None` when the stream has no such track.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let mut disabled = None;
        for track in self.tracks_of(kind) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            disabled = Some(!enabled);
        }
        disabled
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(|track| track.is_stopped())
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("audio", &self.tracks_of(TrackKind::Audio).count())
            .field("video", &self.tracks_of(TrackKind::Video).count())
            .finish()
    }
}

/// Access to the local camera and microphone.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquires audio and video capture. Failing here is fatal to the call attempt.
    async fn acquire(&self) -> Result<MediaStream, CallError>;
}
