//! Configuration schema types for voxmesh.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod events;
mod ice;
mod logging;
mod media;
mod negotiation;
mod transport;

pub use events::*;
pub use ice::*;
pub use logging::*;
pub use media::*;
pub use negotiation::*;
pub use transport::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub ice: IceConfig,
    pub negotiation: NegotiationConfig,
    pub media: MediaConfig,
    pub transport: TransportConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}
