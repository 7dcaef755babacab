//! The single task that owns a voice session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxmesh_common::{EventBus, VoiceError, VoiceEvent};
use voxmesh_config::schema::NegotiationConfig;

use crate::media::{LocalStream, MediaCaptureService, MediaConstraints, TrackKind};
use crate::peer::{
    CloseReason, LinkUpdate, LocalPeer, ManagerInput, PeerConnectionManager, PeerNotices,
};
use crate::protocol::{PresencePayload, Signal, SignalingEnvelope};
use crate::signaling::SignalingTransport;
use crate::sink::AudioSink;

use super::{Command, Participant, SessionServices, SessionStatus};

/// State that exists only while joined.
struct VoiceSession {
    room: String,
    local_user_id: String,
    muted: bool,
    stream: LocalStream,
    roster: HashMap<String, Participant>,
}

enum Input {
    Command(Option<Command>),
    Envelope(Option<SignalingEnvelope>),
    Peer(Option<ManagerInput>),
}

pub(super) struct SessionTask {
    media: MediaCaptureService,
    constraints: MediaConstraints,
    transport: Arc<dyn SignalingTransport>,
    peers: PeerConnectionManager,
    notices: PeerNotices,
    inbound: Option<mpsc::Receiver<SignalingEnvelope>>,
    sink: Arc<dyn AudioSink>,
    events: EventBus,
    commands: mpsc::Receiver<Command>,
    session: Option<VoiceSession>,
}

impl SessionTask {
    pub(super) fn new(
        services: SessionServices,
        constraints: MediaConstraints,
        negotiation: &NegotiationConfig,
        events: EventBus,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (peers, notices) = PeerConnectionManager::new(
            services.connector,
            Arc::clone(&services.transport),
            negotiation,
        );
        Self {
            media: MediaCaptureService::new(services.capture),
            constraints,
            transport: services.transport,
            peers,
            notices,
            inbound: None,
            sink: services.sink,
            events,
            commands,
            session: None,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            let input = tokio::select! {
                cmd = self.commands.recv() => Input::Command(cmd),
                env = recv_inbound(&mut self.inbound) => Input::Envelope(env),
                peer = self.notices.recv() => Input::Peer(peer),
            };

            match input {
                Input::Command(Some(Command::Shutdown { reply })) => {
                    self.leave().await;
                    let _ = reply.send(());
                    break;
                }
                Input::Command(Some(cmd)) => self.handle_command(cmd).await,
                Input::Command(None) => {
                    self.leave().await;
                    break;
                }
                Input::Envelope(Some(env)) => self.handle_envelope(env).await,
                Input::Envelope(None) => {
                    warn!("Signaling transport closed its inbound stream");
                    self.inbound = None;
                    self.events
                        .publish(VoiceEvent::Error("signaling transport closed".into()));
                }
                Input::Peer(Some(ManagerInput::Engine(notice))) => {
                    let updates = self.peers.on_engine(notice).await;
                    self.apply_updates(updates);
                }
                Input::Peer(Some(ManagerInput::Notice(notice))) => {
                    let updates = self.peers.on_notice(notice).await;
                    self.apply_updates(updates);
                }
                Input::Peer(None) => break,
            }
        }
        debug!("Voice session task stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Join {
                room,
                user_id,
                reply,
            } => {
                let result = self.join(&room, &user_id).await;
                let _ = reply.send(result);
            }
            Command::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(());
            }
            Command::ToggleMute { reply } => {
                let result = self.toggle_mute().await;
                let _ = reply.send(result);
            }
            Command::Links { reply } => {
                let _ = reply.send(self.peers.links());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                // Handled by the run loop.
                let _ = reply.send(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    async fn join(&mut self, room: &str, user_id: &str) -> Result<(), VoiceError> {
        if let Some(session) = &self.session {
            return Err(VoiceError::AlreadyJoined(session.room.clone()));
        }

        let stream = self.media.acquire(&self.constraints).await?;
        let inbound = match self.transport.connect(room, user_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(room, error = %e, "Signaling connect failed, releasing media");
                self.media.release(&stream);
                return Err(e);
            }
        };

        self.peers.attach(LocalPeer {
            user_id: user_id.to_string(),
            room: room.to_string(),
            stream: stream.clone(),
        });
        self.inbound = Some(inbound);
        self.session = Some(VoiceSession {
            room: room.to_string(),
            local_user_id: user_id.to_string(),
            muted: false,
            stream,
            roster: HashMap::new(),
        });

        info!(room, user = user_id, transport = self.transport.name(), "Joined voice session");
        self.events.publish(VoiceEvent::SessionJoined {
            room: room.to_string(),
            user_id: user_id.to_string(),
        });
        self.announce(room, user_id, PresencePayload::joined(false))
            .await;
        Ok(())
    }

    async fn leave(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("Leave while not joined");
            return;
        };

        self.announce(&session.room, &session.local_user_id, PresencePayload::left())
            .await;
        let updates = self.peers.detach().await;
        self.apply_updates(updates);

        self.inbound = None;
        self.transport.disconnect().await;
        self.media.release(&session.stream);

        info!(room = %session.room, "Left voice session");
        self.events.publish(VoiceEvent::SessionLeft { room: session.room });
    }

    async fn toggle_mute(&mut self) -> Result<bool, VoiceError> {
        let Some(session) = self.session.as_mut() else {
            return Err(VoiceError::NotJoined);
        };
        session.muted = !session.muted;
        let muted = session.muted;
        self.media
            .set_track_enabled(&session.stream, TrackKind::Audio, !muted);
        let (room, user) = (session.room.clone(), session.local_user_id.clone());

        info!(muted, "Local mute toggled");
        self.events.publish(VoiceEvent::LocalMuteChanged { muted });
        self.announce(&room, &user, PresencePayload::joined(muted))
            .await;
        Ok(muted)
    }

    fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| {
            let mut participants: Vec<Participant> = s.roster.values().cloned().collect();
            participants.sort_by(|a, b| a.user_id.cmp(&b.user_id));
            SessionStatus {
                room: s.room.clone(),
                user_id: s.local_user_id.clone(),
                muted: s.muted,
                participants,
            }
        })
    }

    /// Broadcast presence. Failures are surfaced, not retried.
    async fn announce(&self, room: &str, user_id: &str, presence: PresencePayload) {
        let envelope = SignalingEnvelope::presence(room, user_id, &presence);
        if let Err(e) = self.transport.send(envelope).await {
            warn!(room, error = %e, "Presence broadcast failed");
            self.events.publish(VoiceEvent::SignalingFailed {
                to: None,
                kind: "presence".into(),
                reason: e.to_string(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------------

    async fn handle_envelope(&mut self, env: SignalingEnvelope) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !env.is_for(&session.room, &session.local_user_id) {
            return;
        }
        let signal = match env.decode() {
            Ok(signal) => signal,
            Err(e) => {
                debug!(from = %env.from, kind = env.kind.as_str(), error = %e, "Dropping malformed payload");
                return;
            }
        };

        let from = env.from;
        debug!(from = %from, kind = env.kind.as_str(), "Envelope received");
        let updates = match signal {
            Signal::Presence(presence) => self.on_presence(&from, presence).await,
            Signal::Offer(sdp) => {
                self.note_participant(&from);
                self.peers.on_offer(&from, sdp).await
            }
            Signal::Answer(sdp) => self.peers.on_answer(&from, sdp).await,
            Signal::Ice(ice) => self.peers.on_candidates(&from, ice.candidates).await,
        };
        self.apply_updates(updates);
    }

    async fn on_presence(&mut self, from: &str, presence: PresencePayload) -> Vec<LinkUpdate> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };

        if !presence.in_voice {
            if session.roster.remove(from).is_some() {
                info!(remote = from, "Participant left");
                self.events.publish(VoiceEvent::ParticipantLeft {
                    user_id: from.to_string(),
                });
            }
            return self.peers.close(from, CloseReason::RemoteLeft).await;
        }

        match session.roster.get_mut(from) {
            Some(participant) => {
                if participant.muted != presence.muted {
                    participant.muted = presence.muted;
                    self.events.publish(VoiceEvent::ParticipantMuteChanged {
                        user_id: from.to_string(),
                        muted: presence.muted,
                    });
                }
                // A known participant without a live link rejoined.
                if self.peers.has_link(from) {
                    return Vec::new();
                }
            }
            None => {
                session.roster.insert(
                    from.to_string(),
                    Participant {
                        user_id: from.to_string(),
                        muted: presence.muted,
                    },
                );
                info!(remote = from, muted = presence.muted, "Participant joined");
                self.events.publish(VoiceEvent::ParticipantJoined {
                    user_id: from.to_string(),
                    muted: presence.muted,
                });
            }
        }
        self.peers.initiate(from).await
    }

    /// Record a participant first seen through its offer.
    fn note_participant(&mut self, from: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.roster.contains_key(from) {
            return;
        }
        session.roster.insert(
            from.to_string(),
            Participant {
                user_id: from.to_string(),
                muted: false,
            },
        );
        self.events.publish(VoiceEvent::ParticipantJoined {
            user_id: from.to_string(),
            muted: false,
        });
    }

    fn apply_updates(&self, updates: Vec<LinkUpdate>) {
        for update in updates {
            let event = match update {
                LinkUpdate::State { user_id, state } => {
                    VoiceEvent::LinkStateChanged { user_id, state }
                }
                LinkUpdate::StreamReady { user_id, stream } => {
                    self.sink.show(&stream, &user_id);
                    VoiceEvent::StreamAdded {
                        user_id,
                        stream_id: stream.id,
                    }
                }
                LinkUpdate::StreamRemoved { user_id } => {
                    self.sink.remove(&user_id);
                    VoiceEvent::StreamRemoved { user_id }
                }
                LinkUpdate::Failed { user_id, reason } => VoiceEvent::LinkFailed { user_id, reason },
                LinkUpdate::Glare {
                    user_id,
                    kept_local,
                } => VoiceEvent::GlareResolved {
                    user_id,
                    kept_local,
                },
                LinkUpdate::DeliveryFailed { to, kind, reason } => {
                    VoiceEvent::SignalingFailed { to, kind, reason }
                }
            };
            self.events.publish(event);
        }
    }
}

async fn recv_inbound(
    inbound: &mut Option<mpsc::Receiver<SignalingEnvelope>>,
) -> Option<SignalingEnvelope> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
