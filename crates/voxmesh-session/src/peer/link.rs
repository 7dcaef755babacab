//! One remote participant's connection state.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinHandle;

use voxmesh_common::LinkState;

use crate::protocol::IceCandidate;
use crate::rtc::{LinkId, RemoteStream, RtcPeer, SessionDescription};

use super::LinkSnapshot;

pub(crate) struct PeerLink {
    pub link_id: LinkId,
    pub remote_user_id: String,
    pub state: LinkState,
    pub peer: Arc<dyn RtcPeer>,
    /// Set once the offer/answer has been handed to the transport.
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    /// Inbound candidates waiting for the remote description.
    pub pending_candidates: VecDeque<IceCandidate>,
    /// Local candidates not yet sent.
    pub held_candidates: Vec<IceCandidate>,
    pub gathering_complete: bool,
    pub batch_sent: bool,
    /// The engine reported the transport connected.
    pub ice_connected: bool,
    pub remote_stream: Option<RemoteStream>,
    /// Whether `remote_stream` has been handed to the sink.
    pub stream_surfaced: bool,
    timers: Vec<JoinHandle<()>>,
}

impl PeerLink {
    pub fn new(
        link_id: LinkId,
        remote_user_id: &str,
        state: LinkState,
        peer: Arc<dyn RtcPeer>,
    ) -> Self {
        Self {
            link_id,
            remote_user_id: remote_user_id.to_string(),
            state,
            peer,
            local_description: None,
            remote_description: None,
            pending_candidates: VecDeque::new(),
            held_candidates: Vec::new(),
            gathering_complete: false,
            batch_sent: false,
            ice_connected: false,
            remote_stream: None,
            stream_surfaced: false,
            timers: Vec::new(),
        }
    }

    pub fn add_timer(&mut self, handle: JoinHandle<()>) {
        self.timers.retain(|t| !t.is_finished());
        self.timers.push(handle);
    }

    /// Queue an inbound candidate if the remote description is missing.
    /// Returns the candidate back when it can be applied right away.
    pub fn queue_or_pass(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description.is_none() {
            self.pending_candidates.push_back(candidate);
            None
        } else {
            Some(candidate)
        }
    }

    /// Drain pending candidates in arrival order.
    pub fn take_pending(&mut self) -> Vec<IceCandidate> {
        self.pending_candidates.drain(..).collect()
    }

    /// Both descriptions exchanged and the engine reports connectivity.
    pub fn ready_to_connect(&self) -> bool {
        self.state != LinkState::Connected
            && self.ice_connected
            && self.local_sent()
            && self.remote_description.is_some()
    }

    pub fn local_sent(&self) -> bool {
        self.local_description.is_some()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            user_id: self.remote_user_id.clone(),
            link_id: self.link_id,
            state: self.state,
            has_remote_stream: self.stream_surfaced,
            pending_candidates: self.pending_candidates.len(),
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.abort();
        }
    }
}
