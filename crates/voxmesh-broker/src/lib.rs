//! Peer-id signaling broker.
//!
//! Clients register into a room with a hello frame and receive a connection
//! id. Frames are then routed to one connection id or fanned out to the rest
//! of the room. Payloads are opaque to the broker.

pub mod connection;
pub mod rooms;

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;

pub use rooms::RoomStore;

/// Accept connections until the listener fails for good.
pub async fn serve(listener: TcpListener, store: RoomStore) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => connection::handle_connection(ws, addr, store).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Periodically drop members whose connection went away without cleanup.
pub fn spawn_reaper(store: RoomStore, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let dropped = store.reap_stale().await;
            let rooms = store.count().await;
            tracing::debug!(rooms, dropped, "Reaper tick");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn reaper_task_clears_abandoned_rooms() {
        let store = RoomStore::new();
        let (tx, rx) = mpsc::channel(8);
        store.register("lobby", "alice", tx).await;
        drop(rx);

        let reaper = spawn_reaper(store.clone(), Duration::from_millis(10));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while store.count().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        reaper.abort();
        assert_eq!(store.count().await, 0);
    }
}
