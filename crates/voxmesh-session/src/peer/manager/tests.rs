use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxmesh_common::{LinkState, VoiceError};
use voxmesh_config::schema::{CandidateMode, NegotiationConfig};

use crate::media::{MediaCaptureService, MediaConstraints, SyntheticCapture};
use crate::peer::{CloseReason, LinkUpdate, LocalPeer, ManagerInput, PeerNotice, PeerNotices};
use crate::protocol::{EnvelopeKind, IceCandidate, Signal, SignalingEnvelope};
use crate::rtc::{LoopbackConnector, LoopbackOptions};
use crate::signaling::SignalingTransport;

use super::PeerConnectionManager;

const REMOTE_SDP: &str = "v=0\r\na=ice-ufrag:abcd\r\na=ice-pwd:secret\r\n";

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<SignalingEnvelope>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<SignalingEnvelope> {
        self.sent.lock().unwrap().clone()
    }

    fn kinds(&self) -> Vec<EnvelopeKind> {
        self.sent().iter().map(|e| e.kind).collect()
    }

    fn count(&self, kind: EnvelopeKind) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl SignalingTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn connect(
        &self,
        _room: &str,
        _local_user_id: &str,
    ) -> Result<mpsc::Receiver<SignalingEnvelope>, VoiceError> {
        Ok(mpsc::channel(1).1)
    }

    async fn send(&self, envelope: SignalingEnvelope) -> Result<(), VoiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::SignalingDelivery("link down".into()));
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn disconnect(&self) {}
}

struct Harness {
    mgr: PeerConnectionManager,
    notices: PeerNotices,
    transport: Arc<RecordingTransport>,
    connector: LoopbackConnector,
}

async fn harness(local: &str, options: LoopbackOptions, config: NegotiationConfig) -> Harness {
    let connector = LoopbackConnector::new(options);
    let transport = Arc::new(RecordingTransport::default());
    let (mut mgr, notices) =
        PeerConnectionManager::new(Arc::new(connector.clone()), transport.clone(), &config);
    let mut media = MediaCaptureService::new(Arc::new(SyntheticCapture::granting()));
    let stream = media.acquire(&MediaConstraints::audio_only()).await.unwrap();
    mgr.attach(LocalPeer {
        user_id: local.into(),
        room: "lobby".into(),
        stream,
    });
    Harness {
        mgr,
        notices,
        transport,
        connector,
    }
}

async fn default_harness(local: &str) -> Harness {
    harness(local, LoopbackOptions::default(), NegotiationConfig::default()).await
}

impl Harness {
    async fn step(&mut self) -> Vec<LinkUpdate> {
        let input = tokio::time::timeout(Duration::from_secs(3), self.notices.recv())
            .await
            .expect("timed out waiting for manager input")
            .expect("notice channels closed");
        match input {
            ManagerInput::Engine(n) => self.mgr.on_engine(n).await,
            ManagerInput::Notice(n) => self.mgr.on_notice(n).await,
        }
    }

    /// Feed asynchronous input until `done` holds.
    async fn pump_until(
        &mut self,
        mut done: impl FnMut(&PeerConnectionManager, &RecordingTransport, &[LinkUpdate]) -> bool,
    ) -> Vec<LinkUpdate> {
        let mut all = Vec::new();
        while !done(&self.mgr, &self.transport, &all) {
            all.extend(self.step().await);
        }
        all
    }

    /// Feed whatever arrives within `window`.
    async fn pump_for(&mut self, window: Duration) -> Vec<LinkUpdate> {
        let mut all = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(input)) = tokio::time::timeout_at(deadline, self.notices.recv()).await {
            all.extend(match input {
                ManagerInput::Engine(n) => self.mgr.on_engine(n).await,
                ManagerInput::Notice(n) => self.mgr.on_notice(n).await,
            });
        }
        all
    }
}

fn candidate(text: &str) -> IceCandidate {
    IceCandidate::new(text)
}

fn ice_batches(sent: &[SignalingEnvelope]) -> Vec<usize> {
    sent.iter()
        .filter(|e| e.kind == EnvelopeKind::Ice)
        .map(|e| match e.decode() {
            Ok(Signal::Ice(p)) => p.candidates.len(),
            _ => 0,
        })
        .collect()
}

#[tokio::test]
async fn initiate_sends_offer_before_candidates() {
    let mut h = default_harness("alice").await;

    let updates = h.mgr.initiate("bob").await;
    assert_eq!(
        updates,
        vec![LinkUpdate::State {
            user_id: "bob".into(),
            state: LinkState::Offering,
        }]
    );

    h.pump_until(|_, t, _| t.count(EnvelopeKind::Ice) == 2).await;
    let sent = h.transport.sent();
    assert_eq!(sent[0].kind, EnvelopeKind::Offer);
    assert_eq!(sent[0].to.as_deref(), Some("bob"));
    assert_eq!(ice_batches(&sent), vec![1, 1]);
    assert_eq!(h.mgr.link_state("bob"), Some(LinkState::Offering));
}

#[tokio::test]
async fn initiate_is_idempotent() {
    let mut h = default_harness("alice").await;
    h.mgr.initiate("bob").await;
    assert!(h.mgr.initiate("bob").await.is_empty());
    assert!(h.mgr.initiate("alice").await.is_empty());
    h.pump_until(|_, t, _| t.count(EnvelopeKind::Offer) == 1).await;
    assert_eq!(h.connector.journal().peers_created, 1);
    assert_eq!(h.mgr.links().len(), 1);
}

#[tokio::test]
async fn early_candidates_flush_in_arrival_order() {
    let mut h = default_harness("alice").await;
    h.mgr.initiate("bob").await;
    h.pump_until(|_, t, _| t.count(EnvelopeKind::Offer) == 1).await;

    h.mgr
        .on_candidates("bob", vec![candidate("c1"), candidate("c2")])
        .await;
    h.mgr.on_candidates("bob", vec![candidate("c3")]).await;
    assert_eq!(h.mgr.links()[0].pending_candidates, 3);
    assert!(h.connector.journal().applied_candidates("alice", "bob").is_empty());

    h.mgr.on_answer("bob", REMOTE_SDP.into()).await;
    assert_eq!(h.mgr.links()[0].pending_candidates, 0);
    assert_eq!(
        h.connector.journal().applied_candidates("alice", "bob"),
        vec!["c1", "c2", "c3"]
    );

    // Later candidates go straight to the engine.
    h.mgr.on_candidates("bob", vec![candidate("c4")]).await;
    assert_eq!(
        h.connector.journal().applied_candidates("alice", "bob").last().map(String::as_str),
        Some("c4")
    );
}

#[tokio::test]
async fn answer_leads_to_connected_with_stream() {
    let mut h = default_harness("alice").await;
    h.mgr.initiate("bob").await;
    h.pump_until(|_, t, _| t.count(EnvelopeKind::Offer) == 1).await;

    let mut updates = h.mgr.on_answer("bob", REMOTE_SDP.into()).await;
    updates.extend(
        h.pump_until(|_, _, u| u.iter().any(|x| matches!(x, LinkUpdate::StreamReady { .. })))
            .await,
    );
    assert!(updates.contains(&LinkUpdate::State {
        user_id: "bob".into(),
        state: LinkState::Connected,
    }));
    let snapshot = &h.mgr.links()[0];
    assert_eq!(snapshot.state, LinkState::Connected);
    assert!(snapshot.has_remote_stream);
}

#[tokio::test]
async fn offer_creates_answering_link() {
    let mut h = default_harness("bob").await;

    let updates = h.mgr.on_offer("alice", REMOTE_SDP.into()).await;
    assert_eq!(
        updates,
        vec![LinkUpdate::State {
            user_id: "alice".into(),
            state: LinkState::Answering,
        }]
    );

    h.pump_until(|m, _, _| m.link_state("alice") == Some(LinkState::Connected))
        .await;
    let kinds = h.transport.kinds();
    assert_eq!(kinds[0], EnvelopeKind::Answer);
    assert_eq!(h.transport.count(EnvelopeKind::Offer), 0);
    assert_eq!(h.transport.count(EnvelopeKind::Ice), 2);
}

#[tokio::test]
async fn glare_smaller_id_keeps_its_offer() {
    let mut h = default_harness("alice").await;
    h.mgr.initiate("bob").await;
    let before = h.mgr.links()[0].link_id;

    let updates = h.mgr.on_offer("bob", REMOTE_SDP.into()).await;
    assert_eq!(
        updates,
        vec![LinkUpdate::Glare {
            user_id: "bob".into(),
            kept_local: true,
        }]
    );
    let link = &h.mgr.links()[0];
    assert_eq!(link.link_id, before);
    assert_eq!(link.state, LinkState::Offering);

    h.pump_until(|_, t, _| t.count(EnvelopeKind::Offer) == 1).await;
    assert_eq!(h.transport.count(EnvelopeKind::Answer), 0);
}

#[tokio::test]
async fn glare_larger_id_answers_and_carries_candidates() {
    let mut h = default_harness("bob").await;
    h.mgr.initiate("alice").await;
    h.pump_until(|_, t, _| t.count(EnvelopeKind::Offer) == 1).await;
    let before = h.mgr.links()[0].link_id;

    h.mgr.on_candidates("alice", vec![candidate("early")]).await;
    let updates = h.mgr.on_offer("alice", REMOTE_SDP.into()).await;

    assert_eq!(
        updates,
        vec![
            LinkUpdate::Glare {
                user_id: "alice".into(),
                kept_local: false,
            },
            LinkUpdate::State {
                user_id: "alice".into(),
                state: LinkState::Closed,
            },
            LinkUpdate::State {
                user_id: "alice".into(),
                state: LinkState::Answering,
            },
        ]
    );
    let link = &h.mgr.links()[0];
    assert_ne!(link.link_id, before);
    assert_eq!(link.state, LinkState::Answering);
    assert_eq!(
        h.connector.journal().applied_candidates("bob", "alice"),
        vec!["early"]
    );

    h.pump_until(|m, _, _| m.link_state("alice") == Some(LinkState::Connected))
        .await;
    assert_eq!(h.transport.count(EnvelopeKind::Answer), 1);
    assert_eq!(h.connector.journal().closed, 1);
}

#[tokio::test]
async fn stale_offer_is_discarded_after_close() {
    let options = LoopbackOptions {
        offer_delay: Some(Duration::from_millis(40)),
        ..Default::default()
    };
    let mut h = harness("alice", options, NegotiationConfig::default()).await;
    h.mgr.initiate("bob").await;
    let updates = h.mgr.close("bob", CloseReason::RemoteLeft).await;
    assert_eq!(
        updates,
        vec![LinkUpdate::State {
            user_id: "bob".into(),
            state: LinkState::Closed,
        }]
    );

    h.pump_for(Duration::from_millis(200)).await;
    assert!(h.transport.sent().is_empty());
    assert!(!h.mgr.has_link("bob"));

    let stale = h
        .mgr
        .on_notice(PeerNotice::LocalDescriptionReady {
            link_id: 999,
            remote_user_id: "bob".into(),
            result: Ok(crate::rtc::SessionDescription::offer(REMOTE_SDP)),
        })
        .await;
    assert!(stale.is_empty());
}

#[tokio::test]
async fn engine_failure_closes_only_that_link() {
    let options = LoopbackOptions {
        fail_toward: HashSet::from(["bob".to_string()]),
        ..Default::default()
    };
    let mut h = harness("alice", options, NegotiationConfig::default()).await;
    h.mgr.initiate("bob").await;
    h.mgr.initiate("carol").await;
    h.pump_until(|_, t, _| t.count(EnvelopeKind::Offer) == 2).await;

    h.mgr.on_answer("bob", REMOTE_SDP.into()).await;
    h.mgr.on_answer("carol", REMOTE_SDP.into()).await;
    let updates = h
        .pump_until(|m, _, _| {
            !m.has_link("bob") && m.link_state("carol") == Some(LinkState::Connected)
        })
        .await;

    assert!(updates.iter().any(|u| matches!(
        u,
        LinkUpdate::Failed { user_id, .. } if user_id == "bob"
    )));
    assert_eq!(h.mgr.links().len(), 1);
}

#[tokio::test]
async fn batched_mode_sends_one_candidate_envelope() {
    let config = NegotiationConfig {
        candidate_mode: CandidateMode::Batched,
        ..Default::default()
    };
    let options = LoopbackOptions {
        candidates: 3,
        ..Default::default()
    };
    let mut h = harness("alice", options, config).await;
    h.mgr.initiate("bob").await;
    h.pump_until(|_, t, _| t.count(EnvelopeKind::Ice) == 1).await;

    assert_eq!(ice_batches(&h.transport.sent()), vec![3]);
    assert_eq!(h.transport.kinds()[0], EnvelopeKind::Offer);
}

#[tokio::test]
async fn connect_timeout_closes_link() {
    let config = NegotiationConfig {
        connect_timeout_ms: 50,
        ..Default::default()
    };
    let mut h = harness("alice", LoopbackOptions::default(), config).await;
    h.mgr.initiate("bob").await;

    let updates = h.pump_until(|m, _, _| !m.has_link("bob")).await;
    assert!(updates.contains(&LinkUpdate::Failed {
        user_id: "bob".into(),
        reason: "connect timeout".into(),
    }));
}

#[tokio::test]
async fn delivery_failure_keeps_link_state() {
    let mut h = default_harness("alice").await;
    h.transport.fail.store(true, Ordering::SeqCst);
    h.mgr.initiate("bob").await;

    let updates = h
        .pump_until(|_, _, u| {
            u.iter()
                .any(|x| matches!(x, LinkUpdate::DeliveryFailed { kind, .. } if kind == "offer"))
        })
        .await;
    assert!(!updates.iter().any(|u| matches!(u, LinkUpdate::Failed { .. })));
    assert_eq!(h.mgr.link_state("bob"), Some(LinkState::Offering));
}

#[tokio::test]
async fn candidates_before_offer_are_kept_for_the_new_link() {
    let mut h = default_harness("bob").await;
    h.mgr
        .on_candidates("carol", vec![candidate("x1"), candidate("x2")])
        .await;
    assert!(!h.mgr.has_link("carol"));

    h.mgr.on_offer("carol", REMOTE_SDP.into()).await;
    assert_eq!(
        h.connector.journal().applied_candidates("bob", "carol"),
        vec!["x1", "x2"]
    );
}

#[tokio::test]
async fn detach_closes_every_link_once() {
    let mut h = default_harness("alice").await;
    h.mgr.initiate("bob").await;
    h.mgr.initiate("carol").await;

    let updates = h.mgr.detach().await;
    let closed: Vec<_> = updates
        .iter()
        .filter(|u| matches!(u, LinkUpdate::State { state: LinkState::Closed, .. }))
        .collect();
    assert_eq!(closed.len(), 2);
    assert!(h.mgr.links().is_empty());
    assert!(!h.mgr.is_attached());

    assert!(h.mgr.detach().await.is_empty());
    assert!(h.mgr.initiate("dave").await.is_empty());
}
