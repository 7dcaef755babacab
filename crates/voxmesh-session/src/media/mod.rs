//! Local media capture.
//!
//! [`MediaCaptureService`] owns the capture device for the lifetime of a
//! voice session. The [`LocalStream`] it hands out is a cheap shared
//! handle: every peer link references the same tracks, and muting flips
//! an atomic flag on the track rather than renegotiating anything.

mod synthetic;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use voxmesh_common::{new_id, VoiceError};
use voxmesh_config::schema::MediaConfig;

pub use synthetic::SyntheticCapture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// What to capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    /// Preferred input device label; backend default when `None`.
    pub input_device: Option<String>,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
            input_device: None,
        }
    }

    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::audio_only()
    }
}

impl From<&MediaConfig> for MediaConstraints {
    fn from(config: &MediaConfig) -> Self {
        Self {
            audio: config.audio,
            video: config.video,
            input_device: match config.input_device.as_str() {
                "" | "default" => None,
                other => Some(other.to_string()),
            },
        }
    }
}

/// Opaque token for an opened capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    pub device_id: u64,
    pub label: String,
}

#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open the device(s). The hardware indicator is on until `close`.
    async fn open(&self, constraints: &MediaConstraints) -> Result<CaptureHandle, VoiceError>;

    fn close(&self, handle: &CaptureHandle);
}

// ---------------------------------------------------------------------------
// Local stream
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
}

impl LocalTrack {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct StreamInner {
    id: String,
    tracks: Vec<LocalTrack>,
    handle: CaptureHandle,
}

/// Shared handle to the captured local media.
#[derive(Debug, Clone)]
pub struct LocalStream {
    inner: Arc<StreamInner>,
}

impl LocalStream {
    fn new(handle: CaptureHandle, kinds: &[TrackKind]) -> Self {
        let id = new_id();
        let tracks = kinds
            .iter()
            .map(|kind| LocalTrack {
                id: format!("{id}-{}", kind.as_str()),
                kind: *kind,
                enabled: AtomicBool::new(true),
            })
            .collect();
        Self {
            inner: Arc::new(StreamInner { id, tracks, handle }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.inner.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.inner.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn kinds(&self) -> Vec<TrackKind> {
        self.inner.tracks.iter().map(|t| t.kind).collect()
    }

    pub fn handle(&self) -> &CaptureHandle {
        &self.inner.handle
    }

    /// Number of live handles to this stream (the session plus every link).
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn same_stream(&self, other: &LocalStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct MediaCaptureService {
    backend: Arc<dyn CaptureBackend>,
    held: HashMap<String, CaptureHandle>,
}

impl MediaCaptureService {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            held: HashMap::new(),
        }
    }

    /// Open the capture device and wrap it in a shared stream.
    pub async fn acquire(&mut self, constraints: &MediaConstraints) -> Result<LocalStream, VoiceError> {
        let kinds = constraints.kinds();
        if kinds.is_empty() {
            return Err(VoiceError::MediaAccessDenied(
                "no audio or video track requested".into(),
            ));
        }

        let handle = self.backend.open(constraints).await?;
        let stream = LocalStream::new(handle.clone(), &kinds);
        info!(
            stream = %stream.id(),
            device = %handle.label,
            tracks = kinds.len(),
            "Local media acquired"
        );
        self.held.insert(stream.id().to_string(), handle);
        Ok(stream)
    }

    /// Release the device behind `stream`. Releasing twice is a no-op.
    pub fn release(&mut self, stream: &LocalStream) {
        match self.held.remove(stream.id()) {
            Some(handle) => {
                self.backend.close(&handle);
                info!(stream = %stream.id(), "Local media released");
            }
            None => debug!(stream = %stream.id(), "Release of already released stream"),
        }
    }

    /// Enable or disable one track kind. Returns `false` if the stream has
    /// no track of that kind.
    pub fn set_track_enabled(&self, stream: &LocalStream, kind: TrackKind, enabled: bool) -> bool {
        match stream.track(kind) {
            Some(track) => {
                track.enabled.store(enabled, Ordering::Release);
                debug!(stream = %stream.id(), kind = kind.as_str(), enabled, "Track toggled");
                true
            }
            None => false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        !self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(capture: &Arc<SyntheticCapture>) -> MediaCaptureService {
        MediaCaptureService::new(Arc::clone(capture) as Arc<dyn CaptureBackend>)
    }

    #[tokio::test]
    async fn acquire_and_release_toggles_device() {
        let capture = Arc::new(SyntheticCapture::granting());
        let mut media = service(&capture);

        let stream = media.acquire(&MediaConstraints::audio_only()).await.unwrap();
        assert_eq!(capture.open_devices(), 1);
        assert!(media.is_capturing());
        assert_eq!(stream.kinds(), vec![TrackKind::Audio]);

        media.release(&stream);
        assert_eq!(capture.open_devices(), 0);
        assert!(!media.is_capturing());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let capture = Arc::new(SyntheticCapture::granting());
        let mut media = service(&capture);
        let stream = media.acquire(&MediaConstraints::audio_only()).await.unwrap();

        media.release(&stream);
        media.release(&stream);
        assert_eq!(capture.open_devices(), 0);
        assert_eq!(capture.close_calls(), 1);
    }

    #[tokio::test]
    async fn denied_backend_fails_acquire() {
        let capture = Arc::new(SyntheticCapture::denying());
        let mut media = service(&capture);

        let err = media.acquire(&MediaConstraints::audio_only()).await.unwrap_err();
        assert!(matches!(err, VoiceError::MediaAccessDenied(_)));
        assert!(!media.is_capturing());
    }

    #[tokio::test]
    async fn empty_constraints_are_denied() {
        let capture = Arc::new(SyntheticCapture::granting());
        let mut media = service(&capture);
        let constraints = MediaConstraints {
            audio: false,
            video: false,
            input_device: None,
        };

        assert!(media.acquire(&constraints).await.is_err());
        assert_eq!(capture.open_devices(), 0);
    }

    #[tokio::test]
    async fn track_toggle_is_visible_through_clones() {
        let capture = Arc::new(SyntheticCapture::granting());
        let mut media = service(&capture);
        let stream = media.acquire(&MediaConstraints::audio_only()).await.unwrap();
        let shared = stream.clone();

        assert!(media.set_track_enabled(&stream, TrackKind::Audio, false));
        assert!(!shared.track(TrackKind::Audio).unwrap().is_enabled());
        assert!(shared.same_stream(&stream));
        assert!(!media.set_track_enabled(&stream, TrackKind::Video, false));
    }
}
