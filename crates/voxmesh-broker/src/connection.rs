//! Per-connection handler: register, then route frames by connection id.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use voxmesh_common::{ClientFrame, ServerFrame};

use crate::rooms::RoomStore;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection until it closes.
pub async fn handle_connection(ws: WebSocketStream<TcpStream>, addr: SocketAddr, store: RoomStore) {
    let (mut sink, mut stream) = ws.split();

    let Some((room, user_id)) = read_hello(&mut sink, &mut stream, addr).await else {
        return;
    };

    let (tx, mut rx) = mpsc::channel::<String>(256);
    let connection_id = store.register(&room, &user_id, tx).await;
    tracing::info!(
        peer = %addr,
        room = %room,
        user = %user_id,
        connection = %connection_id,
        "Client registered"
    );

    let registered = ServerFrame::Registered {
        connection_id: connection_id.clone(),
        room: room.clone(),
    };
    if send_frame(&mut sink, &registered).await.is_err() {
        store.unregister(&room, &connection_id).await;
        return;
    }

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                if sink.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Route { to, data }) => {
                                let delivered = store
                                    .route(&room, &connection_id, to.as_deref(), data)
                                    .await;
                                if delivered == 0 {
                                    if let Some(target) = to {
                                        tracing::debug!(room = %room, to = %target, "No such connection");
                                        let _ = send_frame(&mut sink, &ServerFrame::Error {
                                            message: format!("unknown connection {target}"),
                                        }).await;
                                    }
                                }
                            }
                            Ok(ClientFrame::Hello { .. }) => {
                                let _ = send_frame(&mut sink, &ServerFrame::Error {
                                    message: "already registered".into(),
                                }).await;
                            }
                            Err(e) => {
                                tracing::debug!(peer = %addr, error = %e, "Unparseable frame");
                                let _ = send_frame(&mut sink, &ServerFrame::Error {
                                    message: format!("invalid frame: {e}"),
                                }).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    tracing::info!(
        peer = %addr,
        room = %room,
        connection = %connection_id,
        "Client disconnected"
    );
    if let Some(user_id) = store.unregister(&room, &connection_id).await {
        store.notify_peer_left(&room, &connection_id, &user_id).await;
    }
}

/// Wait for the hello frame. Invalid hellos get an error frame back.
async fn read_hello(
    sink: &mut WsSink,
    stream: &mut WsStream,
    addr: SocketAddr,
) -> Option<(String, String)> {
    let frame = tokio::time::timeout(HELLO_TIMEOUT, stream.next()).await;

    let reason = match frame {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Hello { room, user_id }) if !room.is_empty() && !user_id.is_empty() => {
                return Some((room, user_id));
            }
            Ok(_) => "expected hello".to_string(),
            Err(e) => format!("invalid hello: {e}"),
        },
        Ok(Some(Ok(_))) => "expected text hello".to_string(),
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during hello");
            return None;
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before hello");
            return None;
        }
        Err(_) => {
            tracing::warn!(peer = %addr, "Hello timeout");
            return None;
        }
    };

    tracing::warn!(peer = %addr, reason = %reason, "Rejecting hello");
    let _ = send_frame(sink, &ServerFrame::Error { message: reason }).await;
    None
}

async fn send_frame(
    sink: &mut WsSink,
    frame: &ServerFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(frame)
        .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))?;
    sink.send(Message::Text(json.into())).await
}
