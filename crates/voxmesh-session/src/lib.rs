//! Peer-mesh voice sessions.
//!
//! Establishes and tears down one audio link per pair of participants in a
//! room. Signaling rides on any [`signaling::SignalingTransport`]
//! (in-band chat, realtime relay, or a peer-id broker); media negotiation
//! goes through an [`rtc::PeerConnector`] engine.
//!
//! The entry point is [`VoiceSessionCoordinator`].

pub mod coordinator;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod rtc;
pub mod signaling;
pub mod sink;

pub use coordinator::{Participant, SessionServices, SessionStatus, VoiceSessionCoordinator};
pub use media::{
    CaptureBackend, LocalStream, MediaCaptureService, MediaConstraints, SyntheticCapture,
    TrackKind,
};
pub use peer::{CloseReason, LinkSnapshot, LinkUpdate, PeerConnectionManager};
pub use protocol::{EnvelopeKind, IceCandidate, PresencePayload, Signal, SignalingEnvelope};
pub use rtc::{LoopbackConnector, LoopbackOptions, PeerConnector};
pub use signaling::{
    BrokerTransport, ChatPipe, InBandTransport, LocalChatRoom, RelayTransport,
    SignalingTransport,
};
pub use sink::{AudioSink, LoggingSink, RecordingSink};
