//! Signaling transports.
//!
//! Three interchangeable strategies deliver [`SignalingEnvelope`]s between
//! the participants of a room: in-band over the text-chat pipe, a
//! dedicated realtime relay channel, or a peer-id broker. The coordinator
//! and the peer manager only ever see the [`SignalingTransport`] trait.

pub mod broker;
pub mod in_band;
pub mod relay;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxmesh_common::VoiceError;

use crate::protocol::SignalingEnvelope;

pub use broker::BrokerTransport;
pub use in_band::{ChatLine, ChatPipe, InBandTransport, LocalChatPipe, LocalChatRoom};
pub use relay::RelayTransport;

/// Capacity of the inbound envelope channel handed back by `connect`.
pub const INBOUND_CAPACITY: usize = 256;

/// Best-effort envelope delivery scoped to one room.
///
/// Envelopes between a fixed pair of participants arrive in the order they
/// were sent. Nothing is promised across pairs.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attach to `room` as `local_user_id`. Inbound envelopes addressed to
    /// this participant (or broadcast presence) arrive on the returned
    /// receiver, already filtered and de-duplicated.
    async fn connect(
        &self,
        room: &str,
        local_user_id: &str,
    ) -> Result<mpsc::Receiver<SignalingEnvelope>, VoiceError>;

    /// Deliver one envelope. Failures are reported, never retried.
    async fn send(&self, envelope: SignalingEnvelope) -> Result<(), VoiceError>;

    /// Detach. Safe to call when not connected.
    async fn disconnect(&self);
}
