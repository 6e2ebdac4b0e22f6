//! Local device capture collaborator and media stream handles.
//!
//! Platform layers (web, mobile) implement [`MediaCapture`]; the engine
//! only sees [`MediaStream`] handles whose tracks it can enable,
//! disable, and stop. Track state is held in atomics so release and
//! mute are observable without renegotiation.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::types::CallMediaType;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device busy")]
    DeviceBusy,

    #[error("device error: {0}")]
    Device(String),
}

/// What to acquire from the local devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaOptions {
    pub audio: bool,
    pub video: bool,
    pub front_camera: bool,
}

impl MediaOptions {
    pub fn for_media(media: CallMediaType) -> Self {
        Self {
            audio: true,
            video: media == CallMediaType::Video,
            front_camera: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to one captured device track.
#[derive(Debug)]
pub struct MediaTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled flag, returning the new value.
    pub fn toggle(&self) -> bool {
        // fetch_xor returns the previous value
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Stop the track and release the underlying device.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A set of live device tracks. Clones share the same tracks.
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, options: MediaOptions) -> Self {
        let mut tracks = Vec::new();
        if options.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio));
        }
        if options.video {
            tracks.push(MediaTrack::new(TrackKind::Video));
        }
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Stop every track, releasing the devices.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.is_stopped())
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Acquires local audio/video device streams. May fail with permission
/// or device errors; a failed acquisition has no side effects.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, options: MediaOptions) -> Result<MediaStream, CaptureError>;
}
