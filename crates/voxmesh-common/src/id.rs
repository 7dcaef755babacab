pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Id attached to signaling envelopes so receivers can drop duplicates.
pub fn new_envelope_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// First eight hex characters of a fresh uuid, for log-friendly tags.
pub fn short_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}
