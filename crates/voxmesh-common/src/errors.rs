use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures of the voice session layer.
///
/// Only `MediaAccessDenied` and `TransportUnavailable` abort a `join`.
/// Delivery and negotiation failures are scoped to a single peer link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("signaling transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("signaling delivery failed: {0}")]
    SignalingDelivery(String),

    #[error("ice negotiation failed: {0}")]
    IceNegotiation(String),

    #[error("rtc engine error: {0}")]
    Engine(String),

    #[error("not joined to a voice session")]
    NotJoined,

    #[error("already joined to room {0}")]
    AlreadyJoined(String),

    #[error("voice session task has shut down")]
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
