//! Public handle for interacting with the realtime relay connection.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use voxmesh_common::VoiceError;

use super::connection::connection_loop;
use super::types::{ChannelConfig, RealtimeCommand, RealtimeConfig, RealtimeEvent};

/// Handle for interacting with the realtime connection.
///
/// All methods are non-blocking and send commands to the background
/// connection task.
pub struct RealtimeClient {
    command_tx: mpsc::Sender<RealtimeCommand>,
    connected: Arc<RwLock<bool>>,
    cancel: CancellationToken,
}

impl RealtimeClient {
    /// Create a new client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(config: RealtimeConfig) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(RwLock::new(false));
        let cancel = CancellationToken::new();

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
            cancel: cancel.clone(),
        };

        tokio::spawn(connection_loop(config, connected, event_tx, command_rx, cancel));

        (client, event_rx)
    }

    pub async fn join_channel(&self, topic: &str, config: ChannelConfig) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::JoinChannel {
                topic: topic.to_string(),
                config,
            })
            .await;
    }

    /// Leave a channel, dropping its tracked presence so peers see us go.
    pub async fn leave_channel(&self, topic: &str) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::LeaveChannel {
                topic: topic.to_string(),
            })
            .await;
    }

    /// Queue a broadcast event on a channel.
    pub async fn broadcast(
        &self,
        topic: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), VoiceError> {
        if !self.is_connected().await {
            return Err(VoiceError::SignalingDelivery(
                "realtime relay is not connected".into(),
            ));
        }
        self.command_tx
            .send(RealtimeCommand::Broadcast {
                topic: topic.to_string(),
                event: event.to_string(),
                payload,
            })
            .await
            .map_err(|_| VoiceError::SignalingDelivery("realtime client stopped".into()))
    }

    /// Track presence on a channel; restored automatically after reconnect.
    pub async fn presence_track(&self, topic: &str, payload: serde_json::Value) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::PresenceTrack {
                topic: topic.to_string(),
                payload,
            })
            .await;
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Leave every channel, close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        if self.is_connected().await
            && self.command_tx.send(RealtimeCommand::Disconnect).await.is_ok()
        {
            return;
        }
        self.cancel.cancel();
    }
}
