//! Chat pipe backed by `chat_message` broadcasts on a realtime channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use voxmesh_common::VoiceError;
use voxmesh_config::schema::RelayConfig;

use crate::signaling::relay::{
    BroadcastConfig, ChannelConfig, PresenceConfig, RealtimeClient, RealtimeConfig, RealtimeEvent,
};

use super::pipe::{ChatLine, ChatPipe};

pub const CHAT_MESSAGE: &str = "chat_message";

/// Payload of a chat broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub user_id: String,
    pub content: String,
}

pub struct RealtimeChatPipe {
    client: RealtimeClient,
    topic: String,
    user_id: String,
    lines: broadcast::Sender<ChatLine>,
    online: Arc<AtomicBool>,
}

impl RealtimeChatPipe {
    /// Join `chat:<channel>` as `user_id` and start relaying lines.
    pub async fn open(config: &RelayConfig, channel: &str, user_id: &str) -> Self {
        let (client, events) = RealtimeClient::connect(RealtimeConfig::from(config));
        let topic = format!("chat:{channel}");
        client
            .join_channel(
                &topic,
                ChannelConfig {
                    broadcast: BroadcastConfig {
                        self_send: true,
                        ack: false,
                    },
                    presence: PresenceConfig {
                        key: user_id.to_string(),
                    },
                },
            )
            .await;

        let (lines, _) = broadcast::channel(1024);
        let online = Arc::new(AtomicBool::new(false));
        tokio::spawn(forward_lines(
            events,
            lines.clone(),
            Arc::clone(&online),
            topic.clone(),
        ));

        Self {
            client,
            topic,
            user_id: user_id.to_string(),
            lines,
            online,
        }
    }

    pub async fn close(&self) {
        self.client.disconnect().await;
    }
}

#[async_trait]
impl ChatPipe for RealtimeChatPipe {
    async fn send_text(&self, text: String) -> Result<(), VoiceError> {
        let payload = ChatMessagePayload {
            user_id: self.user_id.clone(),
            content: text,
        };
        let value = serde_json::to_value(&payload)
            .map_err(|e| VoiceError::SignalingDelivery(e.to_string()))?;
        self.client.broadcast(&self.topic, CHAT_MESSAGE, value).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatLine> {
        self.lines.subscribe()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

async fn forward_lines(
    mut events: mpsc::Receiver<RealtimeEvent>,
    lines: broadcast::Sender<ChatLine>,
    online: Arc<AtomicBool>,
    topic: String,
) {
    while let Some(event) = events.recv().await {
        match event {
            RealtimeEvent::ChannelJoined { topic: t } if t == topic => {
                online.store(true, Ordering::SeqCst);
            }
            RealtimeEvent::Disconnected => online.store(false, Ordering::SeqCst),
            RealtimeEvent::Broadcast {
                topic: t,
                event,
                payload,
            } if t == topic && event == CHAT_MESSAGE => {
                match serde_json::from_value::<ChatMessagePayload>(payload) {
                    Ok(msg) => {
                        let _ = lines.send(ChatLine {
                            sender: msg.user_id,
                            text: msg.content,
                        });
                    }
                    Err(e) => debug!(error = %e, "Ignoring malformed chat message"),
                }
            }
            _ => {}
        }
    }
    online.store(false, Ordering::SeqCst);
}
