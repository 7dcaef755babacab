//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::handle_phoenix_message;
use super::types::{
    ChannelConfig, PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent,
};

// ---------------------------------------------------------------------------
// Ref Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// State for channels that should be (re)joined on reconnect.
#[derive(Clone)]
pub(crate) struct PendingChannel {
    pub(crate) config: ChannelConfig,
    pub(crate) presence_payload: Option<serde_json::Value>,
}

type Channels = Arc<RwLock<HashMap<String, PendingChannel>>>;

fn phoenix(topic: &str, event: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: event.to_string(),
        payload,
        msg_ref: Some(next_ref()),
    }
}

fn presence_track(topic: &str, payload: serde_json::Value) -> PhoenixMessage {
    phoenix(
        topic,
        "presence",
        serde_json::json!({
            "type": "presence",
            "event": "track",
            "payload": payload
        }),
    )
}

/// Serialize and write one frame. Returns `false` once the socket is gone.
async fn write_frame<S>(writer: &Mutex<S>, msg: &PhoenixMessage) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    let Ok(json) = serde_json::to_string(msg) else {
        return true;
    };
    writer
        .lock()
        .await
        .send(WsMessage::Text(json.into()))
        .await
        .is_ok()
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
/// Runs until `cancel` fires.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
    cancel: CancellationToken,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let joined_channels: Channels = Arc::new(RwLock::new(HashMap::new()));
    let mut reconnect_delay = config.reconnect_delay_secs.max(1);
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

    loop {
        let url = config.ws_url();
        info!(url = %url.split('?').next().unwrap_or(""), "Connecting to realtime relay");

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(&url)) => attempt,
        };

        match attempt {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs.max(1);
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, mut ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                // Rejoin previously-joined channels and restore presence.
                {
                    let channels = joined_channels.read().await;
                    for (topic, pending) in channels.iter() {
                        let join = phoenix(topic, "phx_join", pending.config.to_join_payload());
                        write_frame(&ws_write, &join).await;
                        if let Some(payload) = &pending.presence_payload {
                            write_frame(&ws_write, &presence_track(topic, payload.clone())).await;
                        }
                    }
                }

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));
                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&joined_channels),
                    event_tx.clone(),
                    cancel.clone(),
                ));

                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => None,
                        frame = ws_read.next() => frame,
                    };
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<PhoenixMessage>(&text) {
                                Ok(msg) => handle_phoenix_message(&msg, &event_tx).await,
                                Err(_) => debug!(text = %text, "Unrecognized message from relay"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            info!("Realtime relay closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to realtime relay");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!(timeout_secs = config.connect_timeout_secs, "WebSocket connection timed out");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!(
                        "Connection timed out after {}s",
                        config.connect_timeout_secs
                    )))
                    .await;
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        // Exponential backoff reconnect.
        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(reconnect_delay)) => {}
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs.max(1));
    }

    *connected.write().await = false;
    debug!("Realtime connection loop stopped");
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let msg = phoenix("phoenix", "heartbeat", serde_json::json!({}));
        if !write_frame(&ws_write, &msg).await {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    writer: Arc<Mutex<S>>,
    channels: Channels,
    event_tx: mpsc::Sender<RealtimeEvent>,
    cancel: CancellationToken,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::JoinChannel { topic, config } => {
                let msg = phoenix(&topic, "phx_join", config.to_join_payload());
                write_frame(&writer, &msg).await;
                channels.write().await.insert(
                    topic,
                    PendingChannel {
                        config,
                        presence_payload: None,
                    },
                );
            }
            RealtimeCommand::LeaveChannel { topic } => {
                let msg = phoenix(&topic, "phx_leave", serde_json::json!({}));
                write_frame(&writer, &msg).await;
                channels.write().await.remove(&topic);
            }
            RealtimeCommand::Broadcast {
                topic,
                event,
                payload,
            } => {
                let msg = phoenix(
                    &topic,
                    "broadcast",
                    serde_json::json!({
                        "type": "broadcast",
                        "event": event,
                        "payload": payload
                    }),
                );
                if !write_frame(&writer, &msg).await {
                    warn!(topic = %topic, event = %event, "Broadcast dropped, socket closed");
                }
            }
            RealtimeCommand::PresenceTrack { topic, payload } => {
                write_frame(&writer, &presence_track(&topic, payload.clone())).await;
                if let Some(ch) = channels.write().await.get_mut(&topic) {
                    ch.presence_payload = Some(payload);
                }
            }
            RealtimeCommand::Disconnect => {
                let topics: Vec<String> = channels.read().await.keys().cloned().collect();
                for topic in topics {
                    let msg = phoenix(&topic, "phx_leave", serde_json::json!({}));
                    write_frame(&writer, &msg).await;
                }
                let _ = writer.lock().await.send(WsMessage::Close(None)).await;
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
                cancel.cancel();
                return;
            }
        }
    }
}
