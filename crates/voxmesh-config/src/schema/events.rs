use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of the session event bus; slow subscribers lag past this.
    pub bus_capacity: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { bus_capacity: 256 }
    }
}
