pub mod broker;
pub mod errors;
pub mod events;
pub mod id;

pub use broker::{ClientFrame, ServerFrame};
pub use errors::{ConfigError, MeshError, VoiceError};
pub use events::{EventBus, LinkState, VoiceEvent};
pub use id::{new_envelope_id, new_id, short_id};

pub type Result<T> = std::result::Result<T, MeshError>;
