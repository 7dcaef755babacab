//! Audio sink capability handed to the coordinator.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

use crate::rtc::RemoteStream;

/// Renders remote media for a participant.
pub trait AudioSink: Send + Sync {
    fn show(&self, stream: &RemoteStream, user_id: &str);

    fn remove(&self, user_id: &str);
}

/// Sink that only logs. Used when nothing renders audio.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl AudioSink for LoggingSink {
    fn show(&self, stream: &RemoteStream, user_id: &str) {
        info!(remote = user_id, stream = %stream.id, "Remote stream attached");
    }

    fn remove(&self, user_id: &str) {
        info!(remote = user_id, "Remote stream detached");
    }
}

/// Sink that remembers what is currently shown.
#[derive(Debug, Default)]
pub struct RecordingSink {
    shown: Mutex<HashMap<String, String>>,
    removals: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream id currently shown for `user_id`.
    pub fn showing(&self, user_id: &str) -> Option<String> {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(user_id)
            .cloned()
    }

    pub fn shown_count(&self) -> usize {
        self.shown.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn removals(&self) -> Vec<String> {
        self.removals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl AudioSink for RecordingSink {
    fn show(&self, stream: &RemoteStream, user_id: &str) {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(user_id.to_string(), stream.id.clone());
    }

    fn remove(&self, user_id: &str) {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(user_id);
        self.removals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(user_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackKind;

    #[test]
    fn recording_sink_tracks_show_and_remove() {
        let sink = RecordingSink::new();
        let stream = RemoteStream {
            id: "stream-1".into(),
            user_id: "bob".into(),
            kinds: vec![TrackKind::Audio],
        };
        sink.show(&stream, "bob");
        assert_eq!(sink.showing("bob").as_deref(), Some("stream-1"));
        assert_eq!(sink.shown_count(), 1);

        sink.remove("bob");
        assert!(sink.showing("bob").is_none());
        assert_eq!(sink.removals(), vec!["bob".to_string()]);
    }
}
