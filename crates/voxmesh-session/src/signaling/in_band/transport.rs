//! Envelope transport riding on the room's text chat.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxmesh_common::VoiceError;
use voxmesh_config::schema::InBandConfig;

use crate::protocol::SignalingEnvelope;
use crate::signaling::{SignalingTransport, INBOUND_CAPACITY};

use super::codec;
use super::dedup::RecentIds;
use super::pipe::{ChatLine, ChatPipe};

struct Attached {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

pub struct InBandTransport {
    pipe: Arc<dyn ChatPipe>,
    config: InBandConfig,
    attached: Mutex<Option<Attached>>,
}

impl InBandTransport {
    pub fn new(pipe: Arc<dyn ChatPipe>, config: InBandConfig) -> Self {
        Self {
            pipe,
            config,
            attached: Mutex::new(None),
        }
    }

    async fn detach(&self) {
        if let Some(attached) = self.attached.lock().await.take() {
            attached.cancel.cancel();
            attached.pump.abort();
        }
    }
}

#[async_trait]
impl SignalingTransport for InBandTransport {
    fn name(&self) -> &'static str {
        "in_band"
    }

    async fn connect(
        &self,
        room: &str,
        local_user_id: &str,
    ) -> Result<mpsc::Receiver<SignalingEnvelope>, VoiceError> {
        if !self.pipe.is_online() {
            return Err(VoiceError::TransportUnavailable(
                "chat pipe is offline".into(),
            ));
        }
        self.detach().await;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump(
            self.pipe.subscribe(),
            tx,
            cancel.clone(),
            self.config.prefix.clone(),
            RecentIds::new(self.config.dedup_window as usize),
            room.to_string(),
            local_user_id.to_string(),
        ));
        *self.attached.lock().await = Some(Attached { cancel, pump });

        info!(room, user = local_user_id, "In-band signaling attached");
        Ok(rx)
    }

    async fn send(&self, envelope: SignalingEnvelope) -> Result<(), VoiceError> {
        let line = codec::encode(&self.config.prefix, &envelope)?;
        debug!(kind = envelope.kind.as_str(), to = ?envelope.to, "In-band send");
        self.pipe.send_text(line).await
    }

    async fn disconnect(&self) {
        self.detach().await;
    }
}

/// Read chat lines, keep the ones that are signaling addressed to us.
async fn pump(
    mut lines: broadcast::Receiver<ChatLine>,
    tx: mpsc::Sender<SignalingEnvelope>,
    cancel: CancellationToken,
    prefix: String,
    mut recent: RecentIds,
    room: String,
    local_user_id: String,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let line = match line {
            Ok(line) => line,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "In-band signaling lagged behind chat");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(envelope) = codec::decode(&prefix, &line.text) else {
            continue;
        };
        if envelope.from != line.sender {
            debug!(sender = %line.sender, from = %envelope.from, "Dropping spoofed envelope");
            continue;
        }
        if !envelope.is_for(&room, &local_user_id) {
            continue;
        }
        if let Some(id) = envelope.id.as_deref() {
            if !recent.insert(id) {
                debug!(id, "Dropping duplicate envelope");
                continue;
            }
        }
        if tx.send(envelope).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EnvelopeKind, PresencePayload};
    use crate::signaling::in_band::LocalChatRoom;
    use std::time::Duration;

    fn transport(room: &LocalChatRoom, user: &str) -> InBandTransport {
        InBandTransport::new(Arc::new(room.pipe(user)), InBandConfig::default())
    }

    async fn next(rx: &mut mpsc::Receiver<SignalingEnvelope>) -> Option<SignalingEnvelope> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn presence_reaches_other_members_only() {
        let chat = LocalChatRoom::new();
        let alice = transport(&chat, "alice");
        let bob = transport(&chat, "bob");
        let mut alice_rx = alice.connect("lobby", "alice").await.unwrap();
        let mut bob_rx = bob.connect("lobby", "bob").await.unwrap();

        alice
            .send(SignalingEnvelope::presence("lobby", "alice", &PresencePayload::joined(false)))
            .await
            .unwrap();

        let got = next(&mut bob_rx).await.unwrap();
        assert_eq!(got.kind, EnvelopeKind::Presence);
        assert_eq!(got.from, "alice");
        assert!(next(&mut alice_rx).await.is_none());
    }

    #[tokio::test]
    async fn ordinary_chat_and_misaddressed_envelopes_are_dropped() {
        let chat = LocalChatRoom::new();
        let alice = transport(&chat, "alice");
        let bob = transport(&chat, "bob");
        let _alice_rx = alice.connect("lobby", "alice").await.unwrap();
        let mut bob_rx = bob.connect("lobby", "bob").await.unwrap();

        chat.say("alice", "anyone up for a call?");
        chat.say("alice", "[voxmesh] {garbage");
        alice
            .send(SignalingEnvelope::offer("lobby", "alice", "carol", "v=0"))
            .await
            .unwrap();
        alice
            .send(SignalingEnvelope::offer("other-room", "alice", "bob", "v=0"))
            .await
            .unwrap();
        alice
            .send(SignalingEnvelope::offer("lobby", "alice", "bob", "v=0 real"))
            .await
            .unwrap();

        let got = next(&mut bob_rx).await.unwrap();
        assert_eq!(got.payload["sdp"], "v=0 real");
        assert!(next(&mut bob_rx).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_deliveries_are_suppressed() {
        let chat = LocalChatRoom::new();
        chat.set_duplicate_delivery(true);
        let alice = transport(&chat, "alice");
        let bob = transport(&chat, "bob");
        let mut bob_rx = bob.connect("lobby", "bob").await.unwrap();

        alice
            .send(SignalingEnvelope::answer("lobby", "alice", "bob", "v=0"))
            .await
            .unwrap();

        assert!(next(&mut bob_rx).await.is_some());
        assert!(next(&mut bob_rx).await.is_none());
    }

    #[tokio::test]
    async fn spoofed_sender_is_dropped() {
        let chat = LocalChatRoom::new();
        let bob = transport(&chat, "bob");
        let mut bob_rx = bob.connect("lobby", "bob").await.unwrap();

        let forged = SignalingEnvelope::offer("lobby", "alice", "bob", "v=0");
        let line = codec::encode("[voxmesh]", &forged).unwrap();
        chat.say("mallory", &line);

        assert!(next(&mut bob_rx).await.is_none());
    }

    #[tokio::test]
    async fn offline_pipe_is_unavailable() {
        let chat = LocalChatRoom::new();
        chat.set_online(false);
        let alice = transport(&chat, "alice");
        let err = alice.connect("lobby", "alice").await.unwrap_err();
        assert!(matches!(err, VoiceError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn failed_send_is_a_delivery_error() {
        let chat = LocalChatRoom::new();
        let alice = transport(&chat, "alice");
        let _rx = alice.connect("lobby", "alice").await.unwrap();
        chat.set_fail_sends(true);

        let err = alice
            .send(SignalingEnvelope::offer("lobby", "alice", "bob", "v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::SignalingDelivery(_)));
    }

    #[tokio::test]
    async fn disconnect_closes_inbound_stream() {
        let chat = LocalChatRoom::new();
        let bob = transport(&chat, "bob");
        let mut rx = bob.connect("lobby", "bob").await.unwrap();
        bob.disconnect().await;
        bob.disconnect().await;

        let closed = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }
}
