//! Voice session coordinator.
//!
//! The façade the rest of the application talks to. A single tokio task
//! owns all session state (media, transport, peer links, roster); the
//! cloneable [`VoiceSessionCoordinator`] handle sends it commands and
//! waits on oneshot replies. Everything observable is republished on the
//! [`EventBus`].

mod task;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use voxmesh_common::{EventBus, VoiceError, VoiceEvent};
use voxmesh_config::schema::MeshConfig;

use crate::media::{CaptureBackend, MediaConstraints};
use crate::peer::LinkSnapshot;
use crate::rtc::PeerConnector;
use crate::signaling::SignalingTransport;
use crate::sink::AudioSink;

use task::SessionTask;

const COMMAND_CAPACITY: usize = 32;

/// Collaborators injected into a coordinator.
pub struct SessionServices {
    pub capture: Arc<dyn CaptureBackend>,
    pub connector: Arc<dyn PeerConnector>,
    pub transport: Arc<dyn SignalingTransport>,
    pub sink: Arc<dyn AudioSink>,
}

/// A remote participant as seen through presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: String,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub room: String,
    pub user_id: String,
    pub muted: bool,
    pub participants: Vec<Participant>,
}

pub(crate) enum Command {
    Join {
        room: String,
        user_id: String,
        reply: oneshot::Sender<Result<(), VoiceError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    ToggleMute {
        reply: oneshot::Sender<Result<bool, VoiceError>>,
    },
    Links {
        reply: oneshot::Sender<Vec<LinkSnapshot>>,
    },
    Status {
        reply: oneshot::Sender<Option<SessionStatus>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running session task.
#[derive(Clone)]
pub struct VoiceSessionCoordinator {
    commands: mpsc::Sender<Command>,
    events: EventBus,
}

impl VoiceSessionCoordinator {
    /// Spawn the session task on the current runtime.
    pub fn spawn(config: &MeshConfig, services: SessionServices) -> Self {
        let events = EventBus::new(config.events.bus_capacity.max(1) as usize);
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = SessionTask::new(
            services,
            MediaConstraints::from(&config.media),
            &config.negotiation,
            events.clone(),
            command_rx,
        );
        tokio::spawn(task.run());
        Self { commands, events }
    }

    /// Acquire media, connect signaling and announce presence.
    ///
    /// Fails with `MediaAccessDenied` or `TransportUnavailable` without
    /// leaving any partial state behind.
    pub async fn join(&self, room: &str, user_id: &str) -> Result<(), VoiceError> {
        self.request(|reply| Command::Join {
            room: room.to_string(),
            user_id: user_id.to_string(),
            reply,
        })
        .await?
    }

    /// Tear everything down. A no-op when not joined.
    pub async fn leave(&self) -> Result<(), VoiceError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    /// Flip the local mute state and return the new value.
    pub async fn toggle_mute(&self) -> Result<bool, VoiceError> {
        self.request(|reply| Command::ToggleMute { reply }).await?
    }

    pub async fn links(&self) -> Result<Vec<LinkSnapshot>, VoiceError> {
        self.request(|reply| Command::Links { reply }).await
    }

    pub async fn status(&self) -> Result<Option<SessionStatus>, VoiceError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Leave and stop the task. Later calls fail with `Shutdown`.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, VoiceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| VoiceError::Shutdown)?;
        rx.await.map_err(|_| VoiceError::Shutdown)
    }
}

#[cfg(test)]
mod tests;
