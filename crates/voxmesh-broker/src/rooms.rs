//! Room store: maps room names to their connected members.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};

use voxmesh_common::{new_id, ServerFrame};

/// One registered connection.
pub struct Member {
    pub user_id: String,
    pub tx: mpsc::Sender<String>,
    pub joined_at: Instant,
}

/// Members keyed by broker-assigned connection id.
pub struct Room {
    pub members: HashMap<String, Member>,
    pub created_at: Instant,
}

/// Thread-safe room store.
#[derive(Clone, Default)]
pub struct RoomStore {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member and return its connection id.
    pub async fn register(&self, room: &str, user_id: &str, tx: mpsc::Sender<String>) -> String {
        let connection_id = new_id();
        let mut map = self.rooms.write().await;
        let entry = map.entry(room.to_string()).or_insert_with(|| Room {
            members: HashMap::new(),
            created_at: Instant::now(),
        });
        entry.members.insert(
            connection_id.clone(),
            Member {
                user_id: user_id.to_string(),
                tx,
                joined_at: Instant::now(),
            },
        );
        connection_id
    }

    /// Forward `data` from `from` to one member, or to every other member
    /// when `to` is `None`. Returns how many members it was queued for.
    ///
    /// Deliveries carry the user id the sender registered with, so
    /// receivers can check it against whatever the payload claims.
    pub async fn route(&self, room: &str, from: &str, to: Option<&str>, data: String) -> usize {
        let (user_id, targets): (String, Vec<mpsc::Sender<String>>) = {
            let map = self.rooms.read().await;
            let Some(room) = map.get(room) else {
                return 0;
            };
            let Some(sender) = room.members.get(from) else {
                return 0;
            };
            let targets = match to {
                Some(target) => room
                    .members
                    .get(target)
                    .map(|m| vec![m.tx.clone()])
                    .unwrap_or_default(),
                None => room
                    .members
                    .iter()
                    .filter(|(id, _)| id.as_str() != from)
                    .map(|(_, m)| m.tx.clone())
                    .collect(),
            };
            (sender.user_id.clone(), targets)
        };

        let frame = ServerFrame::Deliver {
            from: from.to_string(),
            user_id,
            data,
        };
        let Ok(json) = serde_json::to_string(&frame) else {
            return 0;
        };
        let mut delivered = 0;
        for tx in targets {
            if tx.send(json.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Tell the rest of the room that a connection went away.
    pub async fn notify_peer_left(&self, room: &str, connection_id: &str, user_id: &str) {
        let targets: Vec<mpsc::Sender<String>> = {
            let map = self.rooms.read().await;
            match map.get(room) {
                Some(room) => room
                    .members
                    .iter()
                    .filter(|(id, _)| id.as_str() != connection_id)
                    .map(|(_, m)| m.tx.clone())
                    .collect(),
                None => return,
            }
        };
        let frame = ServerFrame::PeerLeft {
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
        };
        let Ok(json) = serde_json::to_string(&frame) else {
            return;
        };
        for tx in targets {
            let _ = tx.send(json.clone()).await;
        }
    }

    /// Remove a member. Returns its user id; the room goes once empty.
    pub async fn unregister(&self, room: &str, connection_id: &str) -> Option<String> {
        let mut map = self.rooms.write().await;
        let entry = map.get_mut(room)?;
        let member = entry.members.remove(connection_id)?;
        if entry.members.is_empty() {
            map.remove(room);
        }
        Some(member.user_id)
    }

    /// Drop members whose connection task is gone, then empty rooms.
    /// Returns how many members were dropped.
    pub async fn reap_stale(&self) -> usize {
        let mut map = self.rooms.write().await;
        let mut dropped = 0;
        map.retain(|name, room| {
            room.members.retain(|id, member| {
                let gone = member.tx.is_closed();
                if gone {
                    tracing::info!(room = %name, connection = %id, "Reaping dead member");
                    dropped += 1;
                }
                !gone
            });
            if room.members.is_empty() {
                tracing::debug!(
                    room = %name,
                    age_secs = room.created_at.elapsed().as_secs(),
                    "Reaping empty room"
                );
                return false;
            }
            true
        });
        dropped
    }

    /// Number of active rooms.
    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|r| r.members.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver_data(json: &str) -> (String, String) {
        match serde_json::from_str::<ServerFrame>(json).unwrap() {
            ServerFrame::Deliver { from, data, .. } => (from, data),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let store = RoomStore::new();
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let a = store.register("lobby", "alice", a_tx).await;
        store.register("lobby", "bob", b_tx).await;

        assert_eq!(store.route("lobby", &a, None, "hi".into()).await, 1);
        assert_eq!(deliver_data(&b_rx.recv().await.unwrap()), (a, "hi".into()));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn directed_route_reaches_only_target() {
        let store = RoomStore::new();
        let (a_tx, _a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let (c_tx, mut c_rx) = mpsc::channel(8);
        let a = store.register("lobby", "alice", a_tx).await;
        let b = store.register("lobby", "bob", b_tx).await;
        store.register("lobby", "carol", c_tx).await;

        assert_eq!(store.route("lobby", &a, Some(&b), "x".into()).await, 1);
        assert!(b_rx.recv().await.is_some());
        assert!(c_rx.try_recv().is_err());

        assert_eq!(store.route("lobby", &a, Some("nobody"), "x".into()).await, 0);
        assert_eq!(store.route("elsewhere", &a, None, "x".into()).await, 0);
    }

    #[tokio::test]
    async fn delivery_names_the_registered_sender() {
        let store = RoomStore::new();
        let (a_tx, _a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let a = store.register("lobby", "alice", a_tx).await;
        store.register("lobby", "bob", b_tx).await;

        store.route("lobby", &a, None, "hi".into()).await;
        match serde_json::from_str::<ServerFrame>(&b_rx.recv().await.unwrap()).unwrap() {
            ServerFrame::Deliver { from, user_id, .. } => {
                assert_eq!(from, a);
                assert_eq!(user_id, "alice");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn route_from_unknown_connection_goes_nowhere() {
        let store = RoomStore::new();
        let (b_tx, mut b_rx) = mpsc::channel(8);
        store.register("lobby", "bob", b_tx).await;

        assert_eq!(store.route("lobby", "ghost", None, "hi".into()).await, 0);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_empty_room() {
        let store = RoomStore::new();
        let (tx, _rx) = mpsc::channel(8);
        let id = store.register("lobby", "alice", tx).await;
        assert_eq!(store.count().await, 1);

        assert_eq!(store.unregister("lobby", &id).await.as_deref(), Some("alice"));
        assert_eq!(store.count().await, 0);
        assert!(store.unregister("lobby", &id).await.is_none());
    }

    #[tokio::test]
    async fn peer_left_goes_to_the_others() {
        let store = RoomStore::new();
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, _b_rx) = mpsc::channel(8);
        store.register("lobby", "alice", a_tx).await;
        let b = store.register("lobby", "bob", b_tx).await;

        store.notify_peer_left("lobby", &b, "bob").await;
        let frame: ServerFrame = serde_json::from_str(&a_rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            ServerFrame::PeerLeft {
                connection_id: b,
                user_id: "bob".into()
            }
        );
    }

    #[tokio::test]
    async fn reaper_drops_closed_members() {
        let store = RoomStore::new();
        let (a_tx, a_rx) = mpsc::channel(8);
        let (b_tx, _b_rx) = mpsc::channel(8);
        store.register("lobby", "alice", a_tx).await;
        store.register("lobby", "bob", b_tx).await;
        let (c_tx, c_rx) = mpsc::channel(8);
        store.register("quiet", "carol", c_tx).await;

        drop(a_rx);
        drop(c_rx);
        assert_eq!(store.reap_stale().await, 2);
        assert_eq!(store.member_count("lobby").await, 1);
        assert_eq!(store.count().await, 1);
    }
}
