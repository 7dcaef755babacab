//! RTC engine seam.
//!
//! The peer manager never talks to a media stack directly. It asks a
//! [`PeerConnector`] for one [`RtcPeer`] per link and receives the
//! engine's asynchronous facts (local candidates, connection state,
//! remote streams) as [`EngineNotice`]s on a channel tagged with the
//! link id they belong to.

pub mod loopback;
#[cfg(feature = "webrtc")]
pub mod webrtc_engine;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxmesh_common::VoiceError;

use crate::media::{LocalStream, TrackKind};
use crate::protocol::IceCandidate;

pub use loopback::{LoopbackConnector, LoopbackJournal, LoopbackOptions};
#[cfg(feature = "webrtc")]
pub use webrtc_engine::WebRtcConnector;

/// Identifies one incarnation of a peer link. A replaced or closed link
/// never reuses its id, so late engine output can be recognized.
pub type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Transport-level state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Media arriving from a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub user_id: String,
    pub kinds: Vec<TrackKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    StateChanged(PeerConnectionState),
    RemoteStream(RemoteStream),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineNotice {
    pub link_id: LinkId,
    pub remote_user_id: String,
    pub event: EngineEvent,
}

/// Sender half handed to each engine peer.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    tx: mpsc::UnboundedSender<EngineNotice>,
    link_id: LinkId,
    remote_user_id: String,
}

impl EngineEvents {
    pub fn new(
        tx: mpsc::UnboundedSender<EngineNotice>,
        link_id: LinkId,
        remote_user_id: impl Into<String>,
    ) -> Self {
        Self {
            tx,
            link_id,
            remote_user_id: remote_user_id.into(),
        }
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// Report an engine fact. Dropped silently once the manager is gone.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(EngineNotice {
            link_id: self.link_id,
            remote_user_id: self.remote_user_id.clone(),
            event,
        });
    }
}

/// Everything an engine needs to build one peer connection.
pub struct PeerParams {
    pub link_id: LinkId,
    pub local_user_id: String,
    pub remote_user_id: String,
    /// Shared by every link; never copied.
    pub local_stream: LocalStream,
    pub events: EngineEvents,
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_peer(&self, params: PeerParams) -> Result<Arc<dyn RtcPeer>, VoiceError>;
}

/// One engine-side peer connection.
#[async_trait]
pub trait RtcPeer: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, VoiceError>;

    async fn create_answer(&self) -> Result<SessionDescription, VoiceError>;

    /// Applying the local description starts candidate gathering.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), VoiceError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), VoiceError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), VoiceError>;

    async fn close(&self) -> Result<(), VoiceError>;
}
