//! Host text-chat pipe abstraction and an in-memory implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use voxmesh_common::VoiceError;

/// One line of room chat as seen by every member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub sender: String,
    pub text: String,
}

/// Send primitive and message stream of the host messaging layer.
#[async_trait]
pub trait ChatPipe: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), VoiceError>;

    /// Every line posted to the room, including our own.
    fn subscribe(&self) -> broadcast::Receiver<ChatLine>;

    fn is_online(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// LocalChatRoom
// ---------------------------------------------------------------------------

struct RoomInner {
    tx: broadcast::Sender<ChatLine>,
    online: AtomicBool,
    fail_sends: AtomicBool,
    duplicate: AtomicBool,
}

/// In-process chat room shared by any number of [`LocalChatPipe`]s.
#[derive(Clone)]
pub struct LocalChatRoom {
    inner: Arc<RoomInner>,
}

impl LocalChatRoom {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RoomInner {
                tx,
                online: AtomicBool::new(true),
                fail_sends: AtomicBool::new(false),
                duplicate: AtomicBool::new(false),
            }),
        }
    }

    /// A pipe that posts as `user_id`.
    pub fn pipe(&self, user_id: &str) -> LocalChatPipe {
        LocalChatPipe {
            room: self.clone(),
            user_id: user_id.to_string(),
        }
    }

    /// Post an ordinary chat line as `sender`.
    pub fn say(&self, sender: &str, text: &str) {
        let _ = self.inner.tx.send(ChatLine {
            sender: sender.to_string(),
            text: text.to_string(),
        });
    }

    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Deliver every line twice, like an at-least-once chat backend.
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.inner.duplicate.store(duplicate, Ordering::SeqCst);
    }
}

impl Default for LocalChatRoom {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct LocalChatPipe {
    room: LocalChatRoom,
    user_id: String,
}

#[async_trait]
impl ChatPipe for LocalChatPipe {
    async fn send_text(&self, text: String) -> Result<(), VoiceError> {
        let inner = &self.room.inner;
        if !inner.online.load(Ordering::SeqCst) {
            return Err(VoiceError::SignalingDelivery("chat room offline".into()));
        }
        if inner.fail_sends.load(Ordering::SeqCst) {
            return Err(VoiceError::SignalingDelivery("chat send rejected".into()));
        }
        let line = ChatLine {
            sender: self.user_id.clone(),
            text,
        };
        if inner.duplicate.load(Ordering::SeqCst) {
            let _ = inner.tx.send(line.clone());
        }
        let _ = inner.tx.send(line);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatLine> {
        self.room.inner.tx.subscribe()
    }

    fn is_online(&self) -> bool {
        self.room.inner.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_reach_every_subscriber() {
        let room = LocalChatRoom::new();
        let alice = room.pipe("alice");
        let bob = room.pipe("bob");
        let mut rx = bob.subscribe();

        alice.send_text("hi".into()).await.unwrap();
        let line = rx.recv().await.unwrap();
        assert_eq!(line.sender, "alice");
        assert_eq!(line.text, "hi");
    }

    #[tokio::test]
    async fn duplicate_delivery_sends_twice() {
        let room = LocalChatRoom::new();
        room.set_duplicate_delivery(true);
        let alice = room.pipe("alice");
        let mut rx = alice.subscribe();

        alice.send_text("x".into()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "x");
        assert_eq!(rx.recv().await.unwrap().text, "x");
    }

    #[tokio::test]
    async fn offline_room_rejects_sends() {
        let room = LocalChatRoom::new();
        room.set_online(false);
        let alice = room.pipe("alice");
        assert!(!alice.is_online());
        assert!(alice.send_text("x".into()).await.is_err());
    }
}
