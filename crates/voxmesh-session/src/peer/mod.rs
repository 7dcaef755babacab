//! Per-peer connection state machines.
//!
//! [`PeerConnectionManager`] owns one [`link::PeerLink`] per remote
//! participant, keyed by user id. It is driven from a single task: every
//! input (signaling, engine output, timers) goes through `&mut self`, and
//! every method returns the [`LinkUpdate`]s the caller should surface.

mod link;
mod manager;

use tokio::sync::mpsc;

use voxmesh_common::{LinkState, VoiceError};

use crate::media::LocalStream;
use crate::rtc::{EngineNotice, LinkId, RemoteStream, SessionDescription};

pub use manager::PeerConnectionManager;

/// The local side of every link.
#[derive(Clone)]
pub struct LocalPeer {
    pub user_id: String,
    pub room: String,
    pub stream: LocalStream,
}

/// Why a link was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    LocalLeave,
    RemoteLeft,
    Failed,
    Timeout,
    /// Superseded by a fresh link to the same peer.
    Replaced,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::LocalLeave => "local_leave",
            CloseReason::RemoteLeft => "remote_left",
            CloseReason::Failed => "failed",
            CloseReason::Timeout => "timeout",
            CloseReason::Replaced => "replaced",
        }
    }
}

/// Something the session layer should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkUpdate {
    State {
        user_id: String,
        state: LinkState,
    },
    StreamReady {
        user_id: String,
        stream: RemoteStream,
    },
    StreamRemoved {
        user_id: String,
    },
    Failed {
        user_id: String,
        reason: String,
    },
    Glare {
        user_id: String,
        kept_local: bool,
    },
    DeliveryFailed {
        to: Option<String>,
        kind: String,
        reason: String,
    },
}

/// Read-only view of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub user_id: String,
    pub link_id: LinkId,
    pub state: LinkState,
    pub has_remote_stream: bool,
    pub pending_candidates: usize,
}

/// Completions of work the manager started in the background.
#[derive(Debug)]
pub enum PeerNotice {
    /// An offer or answer was generated and applied locally.
    LocalDescriptionReady {
        link_id: LinkId,
        remote_user_id: String,
        result: Result<SessionDescription, VoiceError>,
    },
    GatheringDeadline {
        link_id: LinkId,
        remote_user_id: String,
    },
    ConnectTimeout {
        link_id: LinkId,
        remote_user_id: String,
    },
}

/// Either kind of asynchronous input for the manager.
#[derive(Debug)]
pub enum ManagerInput {
    Engine(EngineNotice),
    Notice(PeerNotice),
}

/// Receiving side for everything the manager's links report later.
pub struct PeerNotices {
    engine_rx: mpsc::UnboundedReceiver<EngineNotice>,
    notice_rx: mpsc::UnboundedReceiver<PeerNotice>,
}

impl PeerNotices {
    /// Next input, or `None` once the manager is dropped. Engine output
    /// is drained first.
    pub async fn recv(&mut self) -> Option<ManagerInput> {
        tokio::select! {
            biased;

            Some(n) = self.engine_rx.recv() => Some(ManagerInput::Engine(n)),
            Some(n) = self.notice_rx.recv() => Some(ManagerInput::Notice(n)),
            else => None,
        }
    }
}
