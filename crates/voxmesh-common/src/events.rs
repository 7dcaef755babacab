use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Connection state of a single peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    New,
    Offering,
    Answering,
    Connected,
    Closed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::New => "new",
            LinkState::Offering => "offering",
            LinkState::Answering => "answering",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-level events republished to the rest of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum VoiceEvent {
    SessionJoined {
        room: String,
        user_id: String,
    },
    SessionLeft {
        room: String,
    },
    LocalMuteChanged {
        muted: bool,
    },
    ParticipantJoined {
        user_id: String,
        muted: bool,
    },
    ParticipantLeft {
        user_id: String,
    },
    ParticipantMuteChanged {
        user_id: String,
        muted: bool,
    },
    LinkStateChanged {
        user_id: String,
        state: LinkState,
    },
    StreamAdded {
        user_id: String,
        stream_id: String,
    },
    StreamRemoved {
        user_id: String,
    },
    /// A link was closed because negotiation or the transport failed.
    LinkFailed {
        user_id: String,
        reason: String,
    },
    SignalingFailed {
        to: Option<String>,
        kind: String,
        reason: String,
    },
    /// Both sides offered at once; `kept_local` tells whether our offer won.
    GlareResolved {
        user_id: String,
        kept_local: bool,
    },
    Error(String),
    #[serde(other)]
    Unknown,
}

pub struct EventBus {
    sender: broadcast::Sender<VoiceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn publish(&self, event: VoiceEvent) -> usize {
        tracing::trace!(?event, "publish");
        self.sender.send(event).unwrap_or(0)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
