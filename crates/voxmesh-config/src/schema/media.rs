use serde::{Deserialize, Serialize};

/// Which capture tracks to request on join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
    pub input_device: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
            input_device: "default".into(),
        }
    }
}
