//! Signaling transport selection and per-strategy settings.

use serde::{Deserialize, Serialize};

/// Which signaling strategy carries envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStrategy {
    /// Piggyback on the text-chat message stream.
    #[default]
    InBand,
    /// Dedicated pub/sub realtime channel per room.
    Relay,
    /// Peer-id broker that routes by connection id.
    Broker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InBandConfig {
    /// Marker that distinguishes signaling lines from ordinary chat.
    pub prefix: String,
    /// How many recent envelope ids are remembered for duplicate suppression.
    pub dedup_window: u32,
}

impl Default for InBandConfig {
    fn default() -> Self {
        Self {
            prefix: "[voxmesh]".into(),
            dedup_window: 256,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Realtime websocket endpoint.
    pub url: String,
    pub api_key: String,
    pub heartbeat_interval_secs: u32,
    pub reconnect_delay_secs: u32,
    pub max_reconnect_delay_secs: u32,
    pub connect_timeout_secs: u32,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "wss://realtime.voxmesh.dev/socket/websocket".into(),
            api_key: String::new(),
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
            connect_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub connect_timeout_secs: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787".into(),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub strategy: TransportStrategy,
    pub in_band: InBandConfig,
    pub relay: RelayConfig,
    pub broker: BrokerConfig,
}
