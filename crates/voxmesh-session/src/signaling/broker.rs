//! Peer-id broker strategy.
//!
//! The broker assigns each participant a connection id on `hello`.
//! Presence is fanned out to the room with our connection id attached;
//! offers, answers and candidates are routed only to the recipient's
//! connection id, learned from the envelopes it sent us.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxmesh_common::{ClientFrame, ServerFrame, VoiceError};
use voxmesh_config::schema::BrokerConfig;

use crate::protocol::{EnvelopeKind, PresencePayload, SignalingEnvelope};
use crate::signaling::{SignalingTransport, INBOUND_CAPACITY};

/// user id <-> broker connection id.
#[derive(Debug, Default)]
struct Directory {
    by_user: HashMap<String, String>,
    by_connection: HashMap<String, String>,
}

impl Directory {
    fn learn(&mut self, user_id: &str, connection_id: &str) {
        if let Some(old) = self.by_user.insert(user_id.to_string(), connection_id.to_string()) {
            if old != connection_id {
                self.by_connection.remove(&old);
            }
        }
        self.by_connection
            .insert(connection_id.to_string(), user_id.to_string());
    }

    fn forget_connection(&mut self, connection_id: &str) -> Option<String> {
        let user = self.by_connection.remove(connection_id)?;
        if self.by_user.get(&user).map(String::as_str) == Some(connection_id) {
            self.by_user.remove(&user);
        }
        Some(user)
    }
}

struct Session {
    connection_id: String,
    outbound: mpsc::Sender<ClientFrame>,
    directory: Arc<RwLock<Directory>>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct BrokerTransport {
    config: BrokerConfig,
    session: Mutex<Option<Session>>,
}

impl BrokerTransport {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            config: config.clone(),
            session: Mutex::new(None),
        }
    }

    /// Connection id assigned by the broker, while connected.
    pub async fn connection_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.connection_id.clone())
    }

    async fn teardown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.cancel.cancel();
            session.reader.abort();
            // The writer sends a close frame on cancel and exits.
            drop(session.writer);
            info!(connection = %session.connection_id, "Broker signaling detached");
        }
    }
}

fn unavailable(reason: impl std::fmt::Display) -> VoiceError {
    VoiceError::TransportUnavailable(reason.to_string())
}

#[async_trait]
impl SignalingTransport for BrokerTransport {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn connect(
        &self,
        room: &str,
        local_user_id: &str,
    ) -> Result<mpsc::Receiver<SignalingEnvelope>, VoiceError> {
        self.teardown().await;

        let deadline = Duration::from_secs(u64::from(self.config.connect_timeout_secs.max(1)));
        let (ws, _) = tokio::time::timeout(
            deadline,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        )
        .await
        .map_err(|_| unavailable(format!("broker connect timed out after {}s", deadline.as_secs())))?
        .map_err(unavailable)?;
        let (mut sink, mut stream) = ws.split();

        let hello = serde_json::to_string(&ClientFrame::Hello {
            room: room.to_string(),
            user_id: local_user_id.to_string(),
        })
        .map_err(unavailable)?;
        sink.send(WsMessage::Text(hello.into()))
            .await
            .map_err(unavailable)?;

        let connection_id = tokio::time::timeout(deadline, async {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(unavailable(e)),
                };
                match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Registered { connection_id, .. }) => return Ok(connection_id),
                    Ok(ServerFrame::Error { message }) => return Err(unavailable(message)),
                    _ => continue,
                }
            }
            Err(unavailable("broker closed before registering"))
        })
        .await
        .map_err(|_| unavailable("no registration from broker"))??;

        let cancel = CancellationToken::new();
        let directory = Arc::new(RwLock::new(Directory::default()));
        let (outbound, outbound_rx) = mpsc::channel::<ClientFrame>(INBOUND_CAPACITY);
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            let mut outbound_rx = outbound_rx;
            loop {
                let frame = tokio::select! {
                    _ = writer_cancel.cancelled() => None,
                    frame = outbound_rx.recv() => frame,
                };
                let Some(frame) = frame else { break };
                let Ok(json) = serde_json::to_string(&frame) else {
                    continue;
                };
                if sink.send(WsMessage::Text(json.into())).await.is_err() {
                    warn!("Broker socket closed while sending");
                    break;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        });

        let reader = tokio::spawn(read_frames(
            stream,
            tx,
            Arc::clone(&directory),
            cancel.clone(),
            room.to_string(),
            local_user_id.to_string(),
        ));

        info!(room, user = local_user_id, connection = %connection_id, "Broker signaling attached");
        *self.session.lock().await = Some(Session {
            connection_id,
            outbound,
            directory,
            cancel,
            reader,
            writer,
        });
        Ok(rx)
    }

    async fn send(&self, mut envelope: SignalingEnvelope) -> Result<(), VoiceError> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return Err(VoiceError::SignalingDelivery("broker not connected".into()));
        };

        let to = match (&envelope.kind, envelope.to.as_deref()) {
            (EnvelopeKind::Presence, _) => {
                if let Some(obj) = envelope.payload.as_object_mut() {
                    obj.insert(
                        "connectionId".into(),
                        serde_json::Value::String(session.connection_id.clone()),
                    );
                }
                None
            }
            (_, Some(user)) => match session.directory.read().await.by_user.get(user) {
                Some(connection) => Some(connection.clone()),
                None => {
                    return Err(VoiceError::SignalingDelivery(format!(
                        "no broker connection known for {user}"
                    )))
                }
            },
            (_, None) => {
                return Err(VoiceError::SignalingDelivery(
                    "directed envelope without recipient".into(),
                ))
            }
        };

        let data = envelope
            .to_json()
            .map_err(|e| VoiceError::SignalingDelivery(e.to_string()))?;
        debug!(kind = envelope.kind.as_str(), to = ?to, "Broker send");
        session
            .outbound
            .send(ClientFrame::Route { to, data })
            .await
            .map_err(|_| VoiceError::SignalingDelivery("broker connection closed".into()))
    }

    async fn disconnect(&self) {
        self.teardown().await;
    }
}

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
>;

async fn read_frames(
    mut stream: WsRead,
    tx: mpsc::Sender<SignalingEnvelope>,
    directory: Arc<RwLock<Directory>>,
    cancel: CancellationToken,
    room: String,
    local_user_id: String,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => {
                warn!("Broker closed the connection");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Broker socket error");
                break;
            }
            Some(Ok(_)) => continue,
        };

        let envelope = match serde_json::from_str::<ServerFrame>(&text) {
            Ok(ServerFrame::Deliver {
                from,
                user_id,
                data,
            }) => {
                let Ok(env) = SignalingEnvelope::from_json(&data) else {
                    debug!(from = %from, "Dropping malformed broker envelope");
                    continue;
                };
                if env.room != room {
                    continue;
                }
                if env.from != user_id {
                    warn!(
                        claimed = %env.from,
                        sender = %user_id,
                        connection = %from,
                        "Dropping broker envelope with a forged sender"
                    );
                    continue;
                }
                directory.write().await.learn(&env.from, &from);
                env
            }
            Ok(ServerFrame::PeerLeft {
                connection_id,
                user_id,
            }) => {
                let known = directory.write().await.forget_connection(&connection_id);
                let user = known.unwrap_or(user_id);
                debug!(user = %user, connection = %connection_id, "Broker peer left");
                SignalingEnvelope::presence(&room, &user, &PresencePayload::left())
            }
            Ok(ServerFrame::Error { message }) => {
                warn!(message = %message, "Broker reported an error");
                continue;
            }
            Ok(ServerFrame::Registered { .. }) => continue,
            Err(e) => {
                debug!(error = %e, "Unrecognized broker frame");
                continue;
            }
        };

        if !envelope.is_for(&room, &local_user_id) {
            continue;
        }
        if tx.send(envelope).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_tracks_latest_connection() {
        let mut dir = Directory::default();
        dir.learn("alice", "c1");
        dir.learn("alice", "c2");
        assert_eq!(dir.by_user.get("alice").map(String::as_str), Some("c2"));
        assert!(!dir.by_connection.contains_key("c1"));

        // A stale connection leaving does not erase the newer mapping.
        dir.by_connection.insert("c1".into(), "alice".into());
        assert_eq!(dir.forget_connection("c1").as_deref(), Some("alice"));
        assert_eq!(dir.by_user.get("alice").map(String::as_str), Some("c2"));

        assert_eq!(dir.forget_connection("c2").as_deref(), Some("alice"));
        assert!(dir.by_user.is_empty());
    }

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = BrokerTransport::new(&BrokerConfig::default());
        let err = transport
            .send(SignalingEnvelope::offer("lobby", "a", "b", "v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::SignalingDelivery(_)));
    }

    #[tokio::test]
    async fn unreachable_broker_is_unavailable() {
        let transport = BrokerTransport::new(&BrokerConfig {
            url: "ws://127.0.0.1:1".into(),
            connect_timeout_secs: 2,
        });
        let err = transport.connect("lobby", "alice").await.unwrap_err();
        assert!(matches!(err, VoiceError::TransportUnavailable(_)));
    }
}
