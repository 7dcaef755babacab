//! Signaling envelope and payload types.
//!
//! Every strategy carries the same envelope:
//! `{ "type", "from", "to"?, "room", "payload", "id"? }`. Payloads stay as
//! raw JSON on the envelope and are decoded into typed structs on demand,
//! so an unknown or malformed payload only fails the message it rides in.

use serde::{Deserialize, Serialize};

use voxmesh_common::new_envelope_id;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Kind of signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Presence,
    Offer,
    Answer,
    Ice,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Presence => "presence",
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
            EnvelopeKind::Ice => "ice",
        }
    }
}

/// A transient signaling message between participants of one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub from: String,
    /// Recipient; `None` for broadcast (presence).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub room: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Unique per envelope, used to drop duplicate deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SignalingEnvelope {
    fn build(
        kind: EnvelopeKind,
        room: &str,
        from: &str,
        to: Option<&str>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            from: from.to_string(),
            to: to.map(str::to_string),
            room: room.to_string(),
            payload,
            id: Some(new_envelope_id()),
        }
    }

    pub fn presence(room: &str, from: &str, presence: &PresencePayload) -> Self {
        let payload = serde_json::to_value(presence).unwrap_or(serde_json::Value::Null);
        Self::build(EnvelopeKind::Presence, room, from, None, payload)
    }

    pub fn offer(room: &str, from: &str, to: &str, sdp: &str) -> Self {
        let payload = serde_json::json!({ "sdp": sdp });
        Self::build(EnvelopeKind::Offer, room, from, Some(to), payload)
    }

    pub fn answer(room: &str, from: &str, to: &str, sdp: &str) -> Self {
        let payload = serde_json::json!({ "sdp": sdp });
        Self::build(EnvelopeKind::Answer, room, from, Some(to), payload)
    }

    pub fn ice(room: &str, from: &str, to: &str, candidates: Vec<IceCandidate>) -> Self {
        let payload =
            serde_json::to_value(IcePayload { candidates }).unwrap_or(serde_json::Value::Null);
        Self::build(EnvelopeKind::Ice, room, from, Some(to), payload)
    }

    /// Decode the payload according to the envelope kind.
    pub fn decode(&self) -> Result<Signal, serde_json::Error> {
        let payload = self.payload.clone();
        Ok(match self.kind {
            EnvelopeKind::Presence => Signal::Presence(serde_json::from_value(payload)?),
            EnvelopeKind::Offer => {
                Signal::Offer(serde_json::from_value::<SdpPayload>(payload)?.sdp)
            }
            EnvelopeKind::Answer => {
                Signal::Answer(serde_json::from_value::<SdpPayload>(payload)?.sdp)
            }
            EnvelopeKind::Ice => Signal::Ice(serde_json::from_value(payload)?),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Whether a participant `local_user_id` in `room` should consume this.
    pub fn is_for(&self, room: &str, local_user_id: &str) -> bool {
        if self.room != room || self.from == local_user_id {
            return false;
        }
        match &self.to {
            Some(to) => to == local_user_id,
            None => self.kind == EnvelopeKind::Presence,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Decoded envelope payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Presence(PresencePayload),
    Offer(String),
    Answer(String),
    Ice(IcePayload),
}

/// Join/leave/mute announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub in_voice: bool,
    #[serde(default)]
    pub muted: bool,
    /// Broker-assigned connection id (peer-id broker strategy only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl PresencePayload {
    pub fn joined(muted: bool) -> Self {
        Self {
            in_voice: true,
            muted,
            connection_id: None,
        }
    }

    pub fn left() -> Self {
        Self {
            in_voice: false,
            muted: false,
            connection_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
}

/// One ICE candidate, shaped like the browser `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

/// One or more candidates; a single entry when trickling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcePayload {
    pub candidates: Vec<IceCandidate>,
}
