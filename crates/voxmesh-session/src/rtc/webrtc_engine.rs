//! Engine backed by the `webrtc` crate.
//!
//! One `RTCPeerConnection` per link, each carrying an Opus track (plus VP8
//! when video was captured) bound to the shared local stream.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use voxmesh_common::VoiceError;
use voxmesh_config::schema::IceConfig;

use crate::media::{LocalStream, TrackKind};
use crate::protocol::IceCandidate;

use super::{
    EngineEvent, EngineEvents, PeerConnectionState, PeerConnector, PeerParams, RemoteStream,
    RtcPeer, SdpKind, SessionDescription,
};

fn engine_err(e: impl std::fmt::Display) -> VoiceError {
    VoiceError::Engine(e.to_string())
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/VP8".to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

pub struct WebRtcConnector {
    api: Arc<API>,
    config: RTCConfiguration,
}

impl WebRtcConnector {
    pub fn new(ice: &IceConfig) -> Result<Self, VoiceError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: 111,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(engine_err)?;
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: vp8_capability(),
                    payload_type: 96,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(engine_err)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(engine_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice
            .servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        info!(servers = ice.servers.len(), "WebRTC engine initialized");
        Ok(Self {
            api: Arc::new(api),
            config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    fn name(&self) -> &'static str {
        "webrtc"
    }

    async fn create_peer(&self, params: PeerParams) -> Result<Arc<dyn RtcPeer>, VoiceError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.config.clone())
                .await
                .map_err(engine_err)?,
        );

        for track in params.local_stream.tracks() {
            let capability = match track.kind() {
                TrackKind::Audio => opus_capability(),
                TrackKind::Video => vp8_capability(),
            };
            let local = Arc::new(TrackLocalStaticRTP::new(
                capability,
                track.id().to_string(),
                params.local_stream.id().to_string(),
            ));
            pc.add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(engine_err)?;
        }

        install_handlers(&pc, &params.events, &params.remote_user_id);
        debug!(
            link_id = params.link_id,
            remote = %params.remote_user_id,
            "WebRTC peer connection created"
        );
        Ok(Arc::new(WebRtcPeer {
            pc,
            _stream: params.local_stream,
        }))
    }
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, events: &EngineEvents, remote_user_id: &str) {
    let ice_events = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = ice_events.clone();
        Box::pin(async move {
            match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => events.emit(EngineEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => warn!(error = %e, "Failed to serialize ICE candidate"),
                },
                None => events.emit(EngineEvent::GatheringComplete),
            }
        })
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            let state = match s {
                RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
                RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
                RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
                RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
                RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
                _ => None,
            };
            if let Some(state) = state {
                events.emit(EngineEvent::StateChanged(state));
            }
        })
    }));

    let track_events = events.clone();
    let remote = remote_user_id.to_string();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let events = track_events.clone();
        let user_id = remote.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            info!(
                remote = %user_id,
                mime = %track.codec().capability.mime_type,
                "Remote track received"
            );
            events.emit(EngineEvent::RemoteStream(RemoteStream {
                id: track.stream_id(),
                user_id,
                kinds: vec![kind],
            }));
        })
    }));
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    _stream: LocalStream,
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, VoiceError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| VoiceError::IceNegotiation(e.to_string()))
}

#[async_trait]
impl RtcPeer for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, VoiceError> {
        let offer = self.pc.create_offer(None).await.map_err(engine_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, VoiceError> {
        let answer = self.pc.create_answer(None).await.map_err(engine_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), VoiceError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(engine_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), VoiceError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| VoiceError::IceNegotiation(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), VoiceError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| VoiceError::IceNegotiation(e.to_string()))
    }

    async fn close(&self) -> Result<(), VoiceError> {
        self.pc.close().await.map_err(engine_err)
    }
}
