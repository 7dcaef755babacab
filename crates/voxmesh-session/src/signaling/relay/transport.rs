//! Envelope transport over a dedicated realtime channel per room.
//!
//! Each envelope type is its own broadcast event on topic `voice:<room>`.
//! Channel presence is tracked as well, so a participant whose socket
//! drops without saying goodbye still produces a departure.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use voxmesh_common::VoiceError;
use voxmesh_config::schema::RelayConfig;

use crate::protocol::{EnvelopeKind, PresencePayload, SignalingEnvelope};
use crate::signaling::{SignalingTransport, INBOUND_CAPACITY};

use super::client::RealtimeClient;
use super::types::{ChannelConfig, RealtimeConfig, RealtimeEvent};

/// Broadcast event names on the voice channel.
pub mod events {
    pub const PRESENCE: &str = "voice_presence";
    pub const OFFER: &str = "voice_offer";
    pub const ANSWER: &str = "voice_answer";
    pub const ICE: &str = "voice_ice";
}

pub fn event_for(kind: EnvelopeKind) -> &'static str {
    match kind {
        EnvelopeKind::Presence => events::PRESENCE,
        EnvelopeKind::Offer => events::OFFER,
        EnvelopeKind::Answer => events::ANSWER,
        EnvelopeKind::Ice => events::ICE,
    }
}

pub fn kind_for(event: &str) -> Option<EnvelopeKind> {
    match event {
        events::PRESENCE => Some(EnvelopeKind::Presence),
        events::OFFER => Some(EnvelopeKind::Offer),
        events::ANSWER => Some(EnvelopeKind::Answer),
        events::ICE => Some(EnvelopeKind::Ice),
        _ => None,
    }
}

pub fn topic_for(room: &str) -> String {
    format!("voice:{room}")
}

struct Joined {
    client: RealtimeClient,
    topic: String,
    translator: JoinHandle<()>,
}

pub struct RelayTransport {
    config: RealtimeConfig,
    joined: Mutex<Option<Joined>>,
}

impl RelayTransport {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            config: RealtimeConfig::from(config),
            joined: Mutex::new(None),
        }
    }

    async fn leave(&self) {
        if let Some(joined) = self.joined.lock().await.take() {
            joined.client.leave_channel(&joined.topic).await;
            joined.client.disconnect().await;
            joined.translator.abort();
            info!(topic = %joined.topic, "Relay signaling detached");
        }
    }
}

#[async_trait]
impl SignalingTransport for RelayTransport {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn connect(
        &self,
        room: &str,
        local_user_id: &str,
    ) -> Result<mpsc::Receiver<SignalingEnvelope>, VoiceError> {
        self.leave().await;

        let topic = topic_for(room);
        let (client, mut rt_events) = RealtimeClient::connect(self.config.clone());
        client
            .join_channel(&topic, ChannelConfig::for_user(local_user_id))
            .await;

        let deadline = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        let outcome = tokio::time::timeout(deadline, wait_for_join(&mut rt_events, &topic)).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(_) => Some(format!("no join reply within {}s", deadline.as_secs())),
        };
        if let Some(reason) = failure {
            client.disconnect().await;
            return Err(VoiceError::TransportUnavailable(reason));
        }

        client
            .presence_track(&topic, serde_json::json!({ "user_id": local_user_id }))
            .await;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let translator = tokio::spawn(translate_events(
            rt_events,
            tx,
            topic.clone(),
            room.to_string(),
            local_user_id.to_string(),
        ));
        info!(topic = %topic, user = local_user_id, "Relay signaling attached");
        *self.joined.lock().await = Some(Joined {
            client,
            topic,
            translator,
        });
        Ok(rx)
    }

    async fn send(&self, envelope: SignalingEnvelope) -> Result<(), VoiceError> {
        let joined = self.joined.lock().await;
        let Some(joined) = joined.as_ref() else {
            return Err(VoiceError::SignalingDelivery("relay not connected".into()));
        };
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| VoiceError::SignalingDelivery(format!("encode failed: {e}")))?;
        debug!(kind = envelope.kind.as_str(), to = ?envelope.to, "Relay send");
        joined
            .client
            .broadcast(&joined.topic, event_for(envelope.kind), payload)
            .await
    }

    async fn disconnect(&self) {
        self.leave().await;
    }
}

async fn wait_for_join(
    events: &mut mpsc::Receiver<RealtimeEvent>,
    topic: &str,
) -> Result<(), String> {
    while let Some(event) = events.recv().await {
        match event {
            RealtimeEvent::ChannelJoined { topic: t } if t == topic => return Ok(()),
            RealtimeEvent::ChannelError { topic: t, message } if t == topic => return Err(message),
            RealtimeEvent::Error(message) => return Err(message),
            _ => {}
        }
    }
    Err("realtime client stopped".into())
}

type PresenceMetas = HashMap<String, Vec<serde_json::Value>>;

/// Presence metas still live per key, identified by `phx_ref`.
///
/// A reconnecting socket shows up as one diff that leaves the old ref and
/// joins the new one, so a key is only gone once its last ref has left.
#[derive(Debug, Default)]
struct LiveMetas(HashMap<String, HashSet<String>>);

fn meta_ref(meta: &serde_json::Value) -> String {
    meta.get("phx_ref")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| meta.to_string())
}

impl LiveMetas {
    fn reset(&mut self, state: &PresenceMetas) {
        self.0 = state
            .iter()
            .map(|(key, metas)| (key.clone(), metas.iter().map(meta_ref).collect()))
            .collect();
    }

    /// Apply a diff and return the keys left with no metas.
    fn apply(&mut self, joins: &PresenceMetas, leaves: &PresenceMetas) -> Vec<String> {
        for (key, metas) in joins {
            self.0
                .entry(key.clone())
                .or_default()
                .extend(metas.iter().map(meta_ref));
        }
        let mut gone = Vec::new();
        for (key, metas) in leaves {
            let Some(refs) = self.0.get_mut(key) else {
                // joined before we subscribed
                gone.push(key.clone());
                continue;
            };
            for meta in metas {
                refs.remove(&meta_ref(meta));
            }
            if refs.is_empty() {
                self.0.remove(key);
                gone.push(key.clone());
            }
        }
        gone
    }
}

/// Turn realtime events on our topic into envelopes for the session.
async fn translate_events(
    mut rt_events: mpsc::Receiver<RealtimeEvent>,
    tx: mpsc::Sender<SignalingEnvelope>,
    topic: String,
    room: String,
    local_user_id: String,
) {
    let mut live = LiveMetas::default();
    while let Some(event) = rt_events.recv().await {
        let envelopes = match event {
            RealtimeEvent::Broadcast {
                topic: t,
                event,
                payload,
            } if t == topic => {
                let Some(kind) = kind_for(&event) else {
                    continue;
                };
                match serde_json::from_value::<SignalingEnvelope>(payload) {
                    Ok(env) if env.kind == kind && env.is_for(&room, &local_user_id) => vec![env],
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(event = %event, error = %e, "Dropping malformed relay envelope");
                        continue;
                    }
                }
            }
            RealtimeEvent::PresenceState { topic: t, state } if t == topic => {
                live.reset(&state);
                continue;
            }
            RealtimeEvent::PresenceDiff {
                topic: t,
                joins,
                leaves,
            } if t == topic => live
                .apply(&joins, &leaves)
                .into_iter()
                .filter(|user| *user != local_user_id)
                .map(|user| SignalingEnvelope::presence(&room, &user, &PresencePayload::left()))
                .collect(),
            RealtimeEvent::Disconnected => {
                warn!(topic = %topic, "Relay connection lost, waiting for reconnect");
                continue;
            }
            RealtimeEvent::Connected => {
                info!(topic = %topic, "Relay connection (re)established");
                continue;
            }
            _ => continue,
        };

        for env in envelopes {
            if tx.send(env).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_map_both_ways() {
        for kind in [
            EnvelopeKind::Presence,
            EnvelopeKind::Offer,
            EnvelopeKind::Answer,
            EnvelopeKind::Ice,
        ] {
            assert_eq!(kind_for(event_for(kind)), Some(kind));
        }
        assert_eq!(kind_for("chat_message"), None);
    }

    #[test]
    fn topic_is_scoped_to_room() {
        assert_eq!(topic_for("lobby"), "voice:lobby");
    }

    #[tokio::test]
    async fn presence_leave_becomes_departure() {
        let (rt_tx, rt_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(translate_events(
            rt_rx,
            tx,
            "voice:lobby".into(),
            "lobby".into(),
            "alice".into(),
        ));

        let mut leaves = std::collections::HashMap::new();
        leaves.insert("bob".to_string(), vec![serde_json::json!({})]);
        leaves.insert("alice".to_string(), vec![serde_json::json!({})]);
        rt_tx
            .send(RealtimeEvent::PresenceDiff {
                topic: "voice:lobby".into(),
                joins: Default::default(),
                leaves,
            })
            .await
            .unwrap();
        drop(rt_tx);

        let env = rx.recv().await.unwrap();
        assert_eq!(env.from, "bob");
        match env.decode().unwrap() {
            crate::protocol::Signal::Presence(p) => assert!(!p.in_voice),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.recv().await.is_none());
        task.await.unwrap();
    }

    fn metas(entries: &[(&str, &str)]) -> PresenceMetas {
        let mut map = PresenceMetas::new();
        for (key, phx_ref) in entries {
            map.entry(key.to_string())
                .or_default()
                .push(serde_json::json!({ "phx_ref": phx_ref, "user_id": key }));
        }
        map
    }

    #[tokio::test]
    async fn reconnect_in_one_diff_is_not_a_departure() {
        let (rt_tx, rt_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(translate_events(
            rt_rx,
            tx,
            "voice:lobby".into(),
            "lobby".into(),
            "alice".into(),
        ));

        rt_tx
            .send(RealtimeEvent::PresenceState {
                topic: "voice:lobby".into(),
                state: metas(&[("alice", "a1"), ("bob", "b1")]),
            })
            .await
            .unwrap();
        // bob's socket dropped and came back: old ref out, new ref in
        rt_tx
            .send(RealtimeEvent::PresenceDiff {
                topic: "voice:lobby".into(),
                joins: metas(&[("bob", "b2")]),
                leaves: metas(&[("bob", "b1")]),
            })
            .await
            .unwrap();
        drop(rt_tx);

        assert!(rx.recv().await.is_none());
        task.await.unwrap();
    }

    #[test]
    fn key_is_gone_only_after_last_ref_leaves() {
        let mut live = LiveMetas::default();
        live.reset(&metas(&[("bob", "b1"), ("bob", "b2")]));

        let gone = live.apply(&PresenceMetas::new(), &metas(&[("bob", "b1")]));
        assert!(gone.is_empty());

        let gone = live.apply(&PresenceMetas::new(), &metas(&[("bob", "b2")]));
        assert_eq!(gone, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn broadcast_with_mismatched_event_is_dropped() {
        let (rt_tx, rt_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(translate_events(
            rt_rx,
            tx,
            "voice:lobby".into(),
            "lobby".into(),
            "bob".into(),
        ));

        let offer = SignalingEnvelope::offer("lobby", "alice", "bob", "v=0");
        rt_tx
            .send(RealtimeEvent::Broadcast {
                topic: "voice:lobby".into(),
                event: events::ICE.into(),
                payload: serde_json::to_value(&offer).unwrap(),
            })
            .await
            .unwrap();
        rt_tx
            .send(RealtimeEvent::Broadcast {
                topic: "voice:lobby".into(),
                event: events::OFFER.into(),
                payload: serde_json::to_value(&offer).unwrap(),
            })
            .await
            .unwrap();
        drop(rt_tx);

        assert_eq!(rx.recv().await, Some(offer));
        assert!(rx.recv().await.is_none());
    }
}
