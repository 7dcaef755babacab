//! Deterministic in-process engine.
//!
//! Produces well-formed but fake SDP, emits a fixed number of host
//! candidates once the local description is applied, and reports the link
//! connected as soon as both descriptions are in place. Every step is
//! written to a shared [`LoopbackJournal`] so callers can assert on what
//! the negotiation actually did.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use voxmesh_common::{short_id, VoiceError};

use crate::media::{LocalStream, TrackKind};
use crate::protocol::IceCandidate;

use super::{
    EngineEvent, EngineEvents, PeerConnectionState, PeerConnector, PeerParams, RemoteStream,
    RtcPeer, SdpKind, SessionDescription,
};

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Host candidates emitted per local description.
    pub candidates: usize,
    /// Delay before an offer is produced, to widen race windows.
    pub offer_delay: Option<Duration>,
    /// Remote users whose links report `failed` instead of `connected`.
    pub fail_toward: HashSet<String>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            candidates: 2,
            offer_delay: None,
            fail_toward: HashSet::new(),
        }
    }
}

/// Record of every negotiation step taken by peers of one connector.
#[derive(Debug, Clone, Default)]
pub struct LoopbackJournal {
    pub peers_created: usize,
    /// `(local, remote)` for each offer produced.
    pub offers: Vec<(String, String)>,
    /// `(local, remote)` for each answer produced.
    pub answers: Vec<(String, String)>,
    /// Remote candidates applied, keyed by `(local, remote)`, in order.
    pub applied: HashMap<(String, String), Vec<String>>,
    pub closed: usize,
}

impl LoopbackJournal {
    pub fn offers_from(&self, local: &str) -> usize {
        self.offers.iter().filter(|(l, _)| l == local).count()
    }

    pub fn applied_candidates(&self, local: &str, remote: &str) -> Vec<String> {
        self.applied
            .get(&(local.to_string(), remote.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Pull the `a=ice-ufrag:` value out of an SDP blob.
pub fn ice_ufrag(sdp: &str) -> Option<&str> {
    sdp.lines()
        .find_map(|line| line.trim().strip_prefix("a=ice-ufrag:"))
}

fn fake_sdp(ufrag: &str, kinds: &[TrackKind]) -> String {
    let mut sdp = format!(
        "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=voxmesh\r\nt=0 0\r\na=ice-ufrag:{ufrag}\r\na=ice-pwd:{}\r\n",
        u32::from_str_radix(ufrag, 16).unwrap_or(0),
        short_id()
    );
    for (mid, kind) in kinds.iter().enumerate() {
        match kind {
            TrackKind::Audio => sdp.push_str(&format!(
                "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\na=mid:{mid}\r\na=sendrecv\r\n"
            )),
            TrackKind::Video => sdp.push_str(&format!(
                "m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\na=mid:{mid}\r\na=sendrecv\r\n"
            )),
        }
    }
    sdp
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LoopbackConnector {
    options: Arc<LoopbackOptions>,
    journal: Arc<Mutex<LoopbackJournal>>,
}

impl LoopbackConnector {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options: Arc::new(options),
            journal: Arc::new(Mutex::new(LoopbackJournal::default())),
        }
    }

    /// Snapshot of the journal.
    pub fn journal(&self) -> LoopbackJournal {
        lock(&self.journal).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn create_peer(&self, params: PeerParams) -> Result<Arc<dyn RtcPeer>, VoiceError> {
        lock(&self.journal).peers_created += 1;
        let fail = self.options.fail_toward.contains(&params.remote_user_id);
        Ok(Arc::new(LoopbackPeer {
            local_user_id: params.local_user_id,
            remote_user_id: params.remote_user_id,
            kinds: params.local_stream.kinds(),
            _stream: params.local_stream,
            events: params.events,
            ufrag: short_id(),
            fail,
            options: Arc::clone(&self.options),
            journal: Arc::clone(&self.journal),
            state: Mutex::new(PeerState::default()),
        }))
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PeerState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    connected: bool,
    closed: bool,
}

struct LoopbackPeer {
    local_user_id: String,
    remote_user_id: String,
    kinds: Vec<TrackKind>,
    _stream: LocalStream,
    events: EngineEvents,
    ufrag: String,
    fail: bool,
    options: Arc<LoopbackOptions>,
    journal: Arc<Mutex<LoopbackJournal>>,
    state: Mutex<PeerState>,
}

impl LoopbackPeer {
    fn key(&self) -> (String, String) {
        (self.local_user_id.clone(), self.remote_user_id.clone())
    }

    fn ensure_open(&self) -> Result<(), VoiceError> {
        if lock(&self.state).closed {
            return Err(VoiceError::Engine("peer connection is closed".into()));
        }
        Ok(())
    }

    fn gather(&self) {
        for i in 0..self.options.candidates {
            let mut candidate = IceCandidate::new(format!(
                "candidate:{} 1 udp {} 127.0.0.1 {} typ host",
                i + 1,
                2_130_706_431u32.saturating_sub(i as u32),
                50_000 + i
            ));
            candidate.username_fragment = Some(self.ufrag.clone());
            self.events.emit(EngineEvent::LocalCandidate(candidate));
        }
        self.events.emit(EngineEvent::GatheringComplete);
    }

    fn check_connected(&self) {
        let remote_ufrag = {
            let mut state = lock(&self.state);
            if state.connected || state.closed || state.local.is_none() {
                return;
            }
            let Some(remote) = state.remote.as_ref() else {
                return;
            };
            let ufrag = ice_ufrag(&remote.sdp).unwrap_or("unknown").to_string();
            state.connected = true;
            ufrag
        };

        self.events
            .emit(EngineEvent::StateChanged(PeerConnectionState::Connecting));
        if self.fail {
            debug!(remote = %self.remote_user_id, "Loopback link failing on purpose");
            self.events
                .emit(EngineEvent::StateChanged(PeerConnectionState::Failed));
            return;
        }
        self.events
            .emit(EngineEvent::StateChanged(PeerConnectionState::Connected));
        self.events.emit(EngineEvent::RemoteStream(RemoteStream {
            id: format!("stream-{remote_ufrag}"),
            user_id: self.remote_user_id.clone(),
            kinds: self.kinds.clone(),
        }));
    }
}

#[async_trait]
impl RtcPeer for LoopbackPeer {
    async fn create_offer(&self) -> Result<SessionDescription, VoiceError> {
        if let Some(delay) = self.options.offer_delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_open()?;
        lock(&self.journal).offers.push(self.key());
        Ok(SessionDescription::offer(fake_sdp(&self.ufrag, &self.kinds)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, VoiceError> {
        self.ensure_open()?;
        let has_offer = matches!(
            lock(&self.state).remote.as_ref().map(|d| d.kind),
            Some(SdpKind::Offer)
        );
        if !has_offer {
            return Err(VoiceError::Engine(
                "cannot answer without a remote offer".into(),
            ));
        }
        lock(&self.journal).answers.push(self.key());
        Ok(SessionDescription::answer(fake_sdp(&self.ufrag, &self.kinds)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), VoiceError> {
        self.ensure_open()?;
        lock(&self.state).local = Some(desc);
        self.gather();
        self.check_connected();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), VoiceError> {
        self.ensure_open()?;
        if ice_ufrag(&desc.sdp).is_none() {
            return Err(VoiceError::IceNegotiation(
                "remote description has no ice-ufrag".into(),
            ));
        }
        lock(&self.state).remote = Some(desc);
        self.check_connected();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), VoiceError> {
        self.ensure_open()?;
        {
            let state = lock(&self.state);
            let Some(remote) = state.remote.as_ref() else {
                return Err(VoiceError::IceNegotiation(
                    "candidate applied before remote description".into(),
                ));
            };
            if let (Some(fragment), Some(expected)) =
                (candidate.username_fragment.as_deref(), ice_ufrag(&remote.sdp))
            {
                if fragment != expected {
                    return Err(VoiceError::IceNegotiation(format!(
                        "candidate for unknown ufrag {fragment}"
                    )));
                }
            }
        }
        lock(&self.journal)
            .applied
            .entry(self.key())
            .or_default()
            .push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), VoiceError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        lock(&self.journal).closed += 1;
        self.events
            .emit(EngineEvent::StateChanged(PeerConnectionState::Closed));
        Ok(())
    }
}
