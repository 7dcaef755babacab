//! Chat-line encoding for in-band envelopes.

use voxmesh_common::VoiceError;

use crate::protocol::SignalingEnvelope;

/// `"<prefix> <envelope json>"`.
pub fn encode(prefix: &str, envelope: &SignalingEnvelope) -> Result<String, VoiceError> {
    let json = envelope
        .to_json()
        .map_err(|e| VoiceError::SignalingDelivery(format!("encode failed: {e}")))?;
    Ok(format!("{prefix} {json}"))
}

/// `None` for ordinary chat and for anything that does not parse.
pub fn decode(prefix: &str, line: &str) -> Option<SignalingEnvelope> {
    let body = line.trim_start().strip_prefix(prefix)?;
    SignalingEnvelope::from_json(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PresencePayload;

    const PREFIX: &str = "[voxmesh]";

    #[test]
    fn encoded_line_decodes() {
        let env = SignalingEnvelope::offer("lobby", "alice", "bob", "v=0");
        let line = encode(PREFIX, &env).unwrap();
        assert!(line.starts_with("[voxmesh] {"));
        assert_eq!(decode(PREFIX, &line), Some(env));
    }

    #[test]
    fn ordinary_chat_is_ignored() {
        assert!(decode(PREFIX, "hello everyone").is_none());
        assert!(decode(PREFIX, "").is_none());
    }

    #[test]
    fn malformed_payload_is_ignored() {
        assert!(decode(PREFIX, "[voxmesh] {not json").is_none());
        assert!(decode(PREFIX, r#"[voxmesh] {"type":"dance"}"#).is_none());
    }

    #[test]
    fn custom_prefix_must_match() {
        let env = SignalingEnvelope::presence("lobby", "alice", &PresencePayload::joined(false));
        let line = encode("<<sig>>", &env).unwrap();
        assert!(decode(PREFIX, &line).is_none());
        assert!(decode("<<sig>>", &line).is_some());
    }
}
