//! Peer connection manager: offer/answer, candidates, glare, teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxmesh_common::{LinkState, VoiceError};
use voxmesh_config::schema::{CandidateMode, NegotiationConfig};

use crate::protocol::{IceCandidate, SignalingEnvelope};
use crate::rtc::{
    EngineEvent, EngineEvents, EngineNotice, LinkId, PeerConnectionState, PeerConnector,
    PeerParams, SdpKind, SessionDescription,
};
use crate::signaling::SignalingTransport;

use super::link::PeerLink;
use super::{CloseReason, LinkSnapshot, LinkUpdate, LocalPeer, PeerNotice, PeerNotices};

/// Candidates kept per peer that has no link yet.
const EARLY_CANDIDATE_LIMIT: usize = 64;

pub struct PeerConnectionManager {
    connector: Arc<dyn PeerConnector>,
    transport: Arc<dyn SignalingTransport>,
    candidate_mode: CandidateMode,
    gathering_timeout: Duration,
    connect_timeout: Duration,
    local: Option<LocalPeer>,
    links: HashMap<String, PeerLink>,
    early_candidates: HashMap<String, Vec<IceCandidate>>,
    next_link_id: LinkId,
    engine_tx: mpsc::UnboundedSender<EngineNotice>,
    notice_tx: mpsc::UnboundedSender<PeerNotice>,
}

impl PeerConnectionManager {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        transport: Arc<dyn SignalingTransport>,
        config: &NegotiationConfig,
    ) -> (Self, PeerNotices) {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let mgr = Self {
            connector,
            transport,
            candidate_mode: config.candidate_mode,
            gathering_timeout: Duration::from_millis(u64::from(config.gathering_timeout_ms)),
            connect_timeout: Duration::from_millis(u64::from(config.connect_timeout_ms)),
            local: None,
            links: HashMap::new(),
            early_candidates: HashMap::new(),
            next_link_id: 1,
            engine_tx,
            notice_tx,
        };
        (
            mgr,
            PeerNotices {
                engine_rx,
                notice_rx,
            },
        )
    }

    // -----------------------------------------------------------------------
    // Session binding
    // -----------------------------------------------------------------------

    /// Bind to a joined session. Links are only created while attached.
    pub fn attach(&mut self, local: LocalPeer) {
        info!(
            room = %local.room,
            user = %local.user_id,
            engine = self.connector.name(),
            "Peer manager attached"
        );
        self.early_candidates.clear();
        self.local = Some(local);
    }

    /// Close every link and unbind.
    pub async fn detach(&mut self) -> Vec<LinkUpdate> {
        let mut remotes: Vec<String> = self.links.keys().cloned().collect();
        remotes.sort();
        let mut updates = Vec::new();
        for remote in remotes {
            updates.extend(self.close(&remote, CloseReason::LocalLeave).await);
        }
        self.early_candidates.clear();
        self.local = None;
        updates
    }

    pub fn is_attached(&self) -> bool {
        self.local.is_some()
    }

    pub fn links(&self) -> Vec<LinkSnapshot> {
        let mut out: Vec<LinkSnapshot> = self.links.values().map(PeerLink::snapshot).collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    pub fn link_state(&self, remote: &str) -> Option<LinkState> {
        self.links.get(remote).map(|l| l.state)
    }

    pub fn has_link(&self, remote: &str) -> bool {
        self.links.contains_key(remote)
    }

    // -----------------------------------------------------------------------
    // Signaling input
    // -----------------------------------------------------------------------

    /// Become the initiator toward `remote`. No-op if a link exists.
    pub async fn initiate(&mut self, remote: &str) -> Vec<LinkUpdate> {
        let Some(local) = self.local.as_ref() else {
            debug!(remote, "Not attached, not initiating");
            return Vec::new();
        };
        if local.user_id == remote || self.links.contains_key(remote) {
            return Vec::new();
        }

        let link_id = match self.create_link(remote, LinkState::Offering).await {
            Ok(id) => id,
            Err(e) => return vec![failed(remote, format!("create peer: {e}"))],
        };
        info!(remote, link_id, "Initiating peer link");
        self.spawn_local_description(remote, SdpKind::Offer);
        vec![LinkUpdate::State {
            user_id: remote.to_string(),
            state: LinkState::Offering,
        }]
    }

    /// Handle an inbound offer, resolving glare if we are offering too.
    pub async fn on_offer(&mut self, remote: &str, sdp: String) -> Vec<LinkUpdate> {
        let Some(local_id) = self.local.as_ref().map(|l| l.user_id.clone()) else {
            return Vec::new();
        };

        let mut updates = Vec::new();
        let mut carried = Vec::new();
        if let Some(existing) = self.links.get(remote) {
            if existing.state == LinkState::Offering {
                // The lexicographically smaller id keeps its own offer.
                if local_id.as_str() < remote {
                    info!(remote, "Glare: keeping local offer");
                    return vec![LinkUpdate::Glare {
                        user_id: remote.to_string(),
                        kept_local: true,
                    }];
                }
                info!(remote, "Glare: yielding to remote offer");
                updates.push(LinkUpdate::Glare {
                    user_id: remote.to_string(),
                    kept_local: false,
                });
            } else {
                info!(remote, state = %existing.state, "Fresh offer replaces existing link");
            }
            if let Some(mut old) = self.links.remove(remote) {
                carried = old.take_pending();
                updates.extend(self.finish_close(old, CloseReason::Replaced).await);
            }
        }

        if let Err(e) = self.create_link(remote, LinkState::Answering).await {
            updates.push(failed(remote, format!("create peer: {e}")));
            return updates;
        }
        if let Some(link) = self.links.get_mut(remote) {
            let early = std::mem::take(&mut link.pending_candidates);
            link.pending_candidates.extend(carried);
            link.pending_candidates.extend(early);
        }
        updates.push(LinkUpdate::State {
            user_id: remote.to_string(),
            state: LinkState::Answering,
        });

        if let Err(e) = self
            .apply_remote_description(remote, SessionDescription::offer(sdp))
            .await
        {
            updates.extend(self.fail(remote, format!("remote offer: {e}")).await);
            return updates;
        }
        self.spawn_local_description(remote, SdpKind::Answer);
        updates
    }

    pub async fn on_answer(&mut self, remote: &str, sdp: String) -> Vec<LinkUpdate> {
        let expected = self
            .links
            .get(remote)
            .is_some_and(|l| l.state == LinkState::Offering && l.remote_description.is_none());
        if !expected {
            debug!(remote, "Ignoring unexpected answer");
            return Vec::new();
        }
        if let Err(e) = self
            .apply_remote_description(remote, SessionDescription::answer(sdp))
            .await
        {
            return self.fail(remote, format!("remote answer: {e}")).await;
        }
        self.try_connect(remote)
    }

    /// Apply or queue inbound candidates, preserving arrival order.
    pub async fn on_candidates(&mut self, remote: &str, candidates: Vec<IceCandidate>) -> Vec<LinkUpdate> {
        if self.local.is_none() {
            return Vec::new();
        }
        let Some(link) = self.links.get_mut(remote) else {
            let early = self.early_candidates.entry(remote.to_string()).or_default();
            let room = EARLY_CANDIDATE_LIMIT.saturating_sub(early.len());
            early.extend(candidates.into_iter().take(room));
            debug!(remote, held = early.len(), "Candidates before any link");
            return Vec::new();
        };

        let ready: Vec<IceCandidate> = candidates
            .into_iter()
            .filter_map(|c| link.queue_or_pass(c))
            .collect();
        if ready.is_empty() {
            debug!(remote, queued = link.pending_candidates.len(), "Candidates queued");
            return Vec::new();
        }
        let peer = Arc::clone(&link.peer);
        for candidate in ready {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!(remote, error = %e, "Remote candidate rejected");
            }
        }
        Vec::new()
    }

    // -----------------------------------------------------------------------
    // Asynchronous input
    // -----------------------------------------------------------------------

    pub async fn on_engine(&mut self, notice: EngineNotice) -> Vec<LinkUpdate> {
        let remote = notice.remote_user_id;
        let mode = self.candidate_mode;
        let Some(link) = self.links.get_mut(&remote) else {
            return Vec::new();
        };
        if link.link_id != notice.link_id {
            debug!(remote = %remote, link_id = notice.link_id, "Dropping stale engine event");
            return Vec::new();
        }

        match notice.event {
            EngineEvent::LocalCandidate(candidate) => {
                let hold = !link.local_sent() || (mode == CandidateMode::Batched && !link.batch_sent);
                if hold {
                    link.held_candidates.push(candidate);
                    return Vec::new();
                }
                self.send_candidates(&remote, vec![candidate]).await
            }
            EngineEvent::GatheringComplete => {
                link.gathering_complete = true;
                if mode == CandidateMode::Batched && link.local_sent() && !link.batch_sent {
                    return self.flush_batch(&remote).await;
                }
                Vec::new()
            }
            EngineEvent::StateChanged(state) => match state {
                PeerConnectionState::Connected => {
                    link.ice_connected = true;
                    self.try_connect(&remote)
                }
                PeerConnectionState::Failed => self.fail(&remote, "ice connection failed".into()).await,
                PeerConnectionState::Closed => self.fail(&remote, "closed by engine".into()).await,
                PeerConnectionState::Disconnected => {
                    warn!(remote = %remote, "Peer link disconnected");
                    Vec::new()
                }
                PeerConnectionState::Connecting => {
                    debug!(remote = %remote, "Peer link connecting");
                    Vec::new()
                }
            },
            EngineEvent::RemoteStream(stream) => {
                link.remote_stream = Some(stream.clone());
                if link.state == LinkState::Connected && !link.stream_surfaced {
                    link.stream_surfaced = true;
                    return vec![LinkUpdate::StreamReady {
                        user_id: remote,
                        stream,
                    }];
                }
                Vec::new()
            }
        }
    }

    pub async fn on_notice(&mut self, notice: PeerNotice) -> Vec<LinkUpdate> {
        match notice {
            PeerNotice::LocalDescriptionReady {
                link_id,
                remote_user_id,
                result,
            } => {
                if !self.is_current(&remote_user_id, link_id) {
                    debug!(remote = %remote_user_id, link_id, "Discarding stale local description");
                    return Vec::new();
                }
                match result {
                    Ok(desc) => self.send_local_description(&remote_user_id, desc).await,
                    Err(e) => {
                        self.fail(&remote_user_id, format!("local description: {e}"))
                            .await
                    }
                }
            }
            PeerNotice::GatheringDeadline {
                link_id,
                remote_user_id,
            } => {
                let due = self.is_current(&remote_user_id, link_id)
                    && self
                        .links
                        .get(&remote_user_id)
                        .is_some_and(|l| l.local_sent() && !l.batch_sent);
                if !due {
                    return Vec::new();
                }
                info!(remote = %remote_user_id, "Gathering deadline reached, sending batch");
                self.flush_batch(&remote_user_id).await
            }
            PeerNotice::ConnectTimeout {
                link_id,
                remote_user_id,
            } => {
                let stuck = self.is_current(&remote_user_id, link_id)
                    && self.link_state(&remote_user_id) != Some(LinkState::Connected);
                if !stuck {
                    return Vec::new();
                }
                warn!(remote = %remote_user_id, link_id, "Peer link connect timeout");
                let mut updates = self.close(&remote_user_id, CloseReason::Timeout).await;
                updates.push(failed(&remote_user_id, "connect timeout".into()));
                updates
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Close the link to `remote`. No-op when there is none.
    pub async fn close(&mut self, remote: &str, reason: CloseReason) -> Vec<LinkUpdate> {
        self.early_candidates.remove(remote);
        let Some(link) = self.links.remove(remote) else {
            return Vec::new();
        };
        self.finish_close(link, reason).await
    }

    async fn finish_close(&self, link: PeerLink, reason: CloseReason) -> Vec<LinkUpdate> {
        info!(
            remote = %link.remote_user_id,
            link_id = link.link_id,
            reason = reason.as_str(),
            "Closing peer link"
        );
        if let Err(e) = link.peer.close().await {
            debug!(remote = %link.remote_user_id, error = %e, "Engine close failed");
        }
        let mut updates = Vec::new();
        if link.stream_surfaced {
            updates.push(LinkUpdate::StreamRemoved {
                user_id: link.remote_user_id.clone(),
            });
        }
        updates.push(LinkUpdate::State {
            user_id: link.remote_user_id.clone(),
            state: LinkState::Closed,
        });
        updates
    }

    async fn fail(&mut self, remote: &str, reason: String) -> Vec<LinkUpdate> {
        warn!(remote, reason = %reason, "Peer link failed");
        let mut updates = self.close(remote, CloseReason::Failed).await;
        updates.push(failed(remote, reason));
        updates
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn is_current(&self, remote: &str, link_id: LinkId) -> bool {
        self.links.get(remote).is_some_and(|l| l.link_id == link_id)
    }

    async fn create_link(&mut self, remote: &str, state: LinkState) -> Result<LinkId, VoiceError> {
        let local = self.local.as_ref().ok_or(VoiceError::NotJoined)?;
        let link_id = self.next_link_id;
        self.next_link_id += 1;

        let params = PeerParams {
            link_id,
            local_user_id: local.user_id.clone(),
            remote_user_id: remote.to_string(),
            local_stream: local.stream.clone(),
            events: EngineEvents::new(self.engine_tx.clone(), link_id, remote),
        };
        let peer = self.connector.create_peer(params).await?;
        let mut link = PeerLink::new(link_id, remote, state, peer);

        let tx = self.notice_tx.clone();
        let timeout = self.connect_timeout;
        let remote_user_id = remote.to_string();
        link.add_timer(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(PeerNotice::ConnectTimeout {
                link_id,
                remote_user_id,
            });
        }));

        if let Some(early) = self.early_candidates.remove(remote) {
            link.pending_candidates.extend(early);
        }
        self.links.insert(remote.to_string(), link);
        Ok(link_id)
    }

    /// Generate and apply the local offer/answer off the manager task.
    fn spawn_local_description(&self, remote: &str, kind: SdpKind) {
        let Some(link) = self.links.get(remote) else {
            return;
        };
        let peer = Arc::clone(&link.peer);
        let link_id = link.link_id;
        let remote_user_id = remote.to_string();
        let tx = self.notice_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let desc = match kind {
                    SdpKind::Offer => peer.create_offer().await?,
                    SdpKind::Answer => peer.create_answer().await?,
                };
                peer.set_local_description(desc.clone()).await?;
                Ok::<_, VoiceError>(desc)
            }
            .await;
            let _ = tx.send(PeerNotice::LocalDescriptionReady {
                link_id,
                remote_user_id,
                result,
            });
        });
    }

    /// Set the remote description, then flush queued candidates in order.
    async fn apply_remote_description(
        &mut self,
        remote: &str,
        desc: SessionDescription,
    ) -> Result<(), VoiceError> {
        let peer = match self.links.get(remote) {
            Some(link) => Arc::clone(&link.peer),
            None => return Err(VoiceError::NotJoined),
        };
        peer.set_remote_description(desc.clone()).await?;

        let pending = match self.links.get_mut(remote) {
            Some(link) => {
                link.remote_description = Some(desc);
                link.take_pending()
            }
            None => return Ok(()),
        };
        if !pending.is_empty() {
            debug!(remote, count = pending.len(), "Flushing queued candidates");
        }
        for candidate in pending {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!(remote, error = %e, "Queued candidate rejected");
            }
        }
        Ok(())
    }

    async fn send_local_description(
        &mut self,
        remote: &str,
        desc: SessionDescription,
    ) -> Vec<LinkUpdate> {
        let Some(local) = self.local.as_ref() else {
            return Vec::new();
        };
        let envelope = match desc.kind {
            SdpKind::Offer => SignalingEnvelope::offer(&local.room, &local.user_id, remote, &desc.sdp),
            SdpKind::Answer => SignalingEnvelope::answer(&local.room, &local.user_id, remote, &desc.sdp),
        };
        let mut updates = self.deliver(envelope).await;

        let mode = self.candidate_mode;
        let (held, start_deadline) = {
            let Some(link) = self.links.get_mut(remote) else {
                return updates;
            };
            link.local_description = Some(desc);
            match mode {
                CandidateMode::Trickle => (std::mem::take(&mut link.held_candidates), false),
                CandidateMode::Batched if link.gathering_complete => {
                    link.batch_sent = true;
                    (std::mem::take(&mut link.held_candidates), false)
                }
                CandidateMode::Batched => (Vec::new(), true),
            }
        };

        match mode {
            CandidateMode::Trickle => {
                for candidate in held {
                    updates.extend(self.send_candidates(remote, vec![candidate]).await);
                }
            }
            CandidateMode::Batched => {
                updates.extend(self.send_candidates(remote, held).await);
            }
        }
        if start_deadline {
            self.start_gathering_deadline(remote);
        }

        updates.extend(self.try_connect(remote));
        updates
    }

    fn start_gathering_deadline(&mut self, remote: &str) {
        let tx = self.notice_tx.clone();
        let timeout = self.gathering_timeout;
        let Some(link) = self.links.get_mut(remote) else {
            return;
        };
        let link_id = link.link_id;
        let remote_user_id = remote.to_string();
        link.add_timer(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(PeerNotice::GatheringDeadline {
                link_id,
                remote_user_id,
            });
        }));
    }

    async fn flush_batch(&mut self, remote: &str) -> Vec<LinkUpdate> {
        let held = match self.links.get_mut(remote) {
            Some(link) => {
                link.batch_sent = true;
                std::mem::take(&mut link.held_candidates)
            }
            None => return Vec::new(),
        };
        self.send_candidates(remote, held).await
    }

    async fn send_candidates(&self, remote: &str, candidates: Vec<IceCandidate>) -> Vec<LinkUpdate> {
        let Some(local) = self.local.as_ref() else {
            return Vec::new();
        };
        if candidates.is_empty() {
            return Vec::new();
        }
        let envelope = SignalingEnvelope::ice(&local.room, &local.user_id, remote, candidates);
        self.deliver(envelope).await
    }

    async fn deliver(&self, envelope: SignalingEnvelope) -> Vec<LinkUpdate> {
        let to = envelope.to.clone();
        let kind = envelope.kind.as_str();
        debug!(kind, to = ?to, "Sending envelope");
        match self.transport.send(envelope).await {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(kind, to = ?to, error = %e, "Envelope delivery failed");
                vec![LinkUpdate::DeliveryFailed {
                    to,
                    kind: kind.to_string(),
                    reason: e.to_string(),
                }]
            }
        }
    }

    /// Enter `Connected` once the engine and the exchange both allow it.
    fn try_connect(&mut self, remote: &str) -> Vec<LinkUpdate> {
        let Some(link) = self.links.get_mut(remote) else {
            return Vec::new();
        };
        if !link.ready_to_connect() {
            return Vec::new();
        }
        link.state = LinkState::Connected;
        info!(remote, link_id = link.link_id, "Peer link connected");

        let mut updates = vec![LinkUpdate::State {
            user_id: remote.to_string(),
            state: LinkState::Connected,
        }];
        if let Some(stream) = link.remote_stream.clone() {
            if !link.stream_surfaced {
                link.stream_surfaced = true;
                updates.push(LinkUpdate::StreamReady {
                    user_id: remote.to_string(),
                    stream,
                });
            }
        }
        updates
    }
}

fn failed(remote: &str, reason: String) -> LinkUpdate {
    LinkUpdate::Failed {
        user_id: remote.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests;
