//! Realtime relay strategy.
//!
//! A thin Phoenix-channels client over `tokio-tungstenite` (heartbeats,
//! channel join/leave, broadcast, presence tracking, reconnect with
//! backoff) and the [`RelayTransport`] that maps envelopes onto it.

mod client;
mod connection;
mod handler;
mod transport;
mod types;

pub use client::RealtimeClient;
pub use transport::{event_for, events, kind_for, topic_for, RelayTransport};
pub use types::{
    BroadcastConfig, ChannelConfig, PhoenixMessage, PresenceConfig, RealtimeConfig, RealtimeEvent,
};
