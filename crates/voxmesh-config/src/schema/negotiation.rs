//! Offer/answer and candidate exchange settings.

use serde::{Deserialize, Serialize};

/// How locally gathered ICE candidates are shipped to the remote peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateMode {
    /// Send each candidate as soon as it is gathered.
    #[default]
    Trickle,
    /// Hold candidates until gathering completes or the gathering timeout fires.
    Batched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub candidate_mode: CandidateMode,
    pub gathering_timeout_ms: u32,
    /// A link that has not reached `connected` by then is closed.
    pub connect_timeout_ms: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            candidate_mode: CandidateMode::Trickle,
            gathering_timeout_ms: 2_000,
            connect_timeout_ms: 15_000,
        }
    }
}
