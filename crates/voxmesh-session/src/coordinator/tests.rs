use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use voxmesh_common::{VoiceError, VoiceEvent};
use voxmesh_config::schema::{InBandConfig, MeshConfig};

use crate::media::SyntheticCapture;
use crate::protocol::{EnvelopeKind, Signal};
use crate::rtc::LoopbackConnector;
use crate::signaling::in_band::codec;
use crate::signaling::{ChatPipe, InBandTransport, LocalChatRoom};
use crate::sink::RecordingSink;

use super::{SessionServices, VoiceSessionCoordinator};

struct Fixture {
    coordinator: VoiceSessionCoordinator,
    capture: Arc<SyntheticCapture>,
    room: LocalChatRoom,
}

fn fixture(capture: SyntheticCapture) -> Fixture {
    let room = LocalChatRoom::new();
    let capture = Arc::new(capture);
    let transport = InBandTransport::new(Arc::new(room.pipe("alice")), InBandConfig::default());
    let coordinator = VoiceSessionCoordinator::spawn(
        &MeshConfig::default(),
        SessionServices {
            capture: capture.clone(),
            connector: Arc::new(LoopbackConnector::default()),
            transport: Arc::new(transport),
            sink: Arc::new(RecordingSink::new()),
        },
    );
    Fixture {
        coordinator,
        capture,
        room,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<VoiceEvent>) -> VoiceEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no event")
        .expect("bus closed")
}

#[tokio::test]
async fn join_publishes_and_announces_presence() {
    let f = fixture(SyntheticCapture::granting());
    let mut lines = f.room.pipe("observer").subscribe();
    let mut events = f.coordinator.subscribe();

    f.coordinator.join("lobby", "alice").await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        VoiceEvent::SessionJoined {
            room: "lobby".into(),
            user_id: "alice".into(),
        }
    );
    let line = lines.recv().await.unwrap();
    let env = codec::decode(&InBandConfig::default().prefix, &line.text).unwrap();
    assert_eq!(env.kind, EnvelopeKind::Presence);
    match env.decode().unwrap() {
        Signal::Presence(p) => assert!(p.in_voice && !p.muted),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(f.capture.open_devices(), 1);

    let status = f.coordinator.status().await.unwrap().unwrap();
    assert_eq!(status.room, "lobby");
    assert!(!status.muted);
}

#[tokio::test]
async fn denied_media_aborts_join_without_state() {
    let f = fixture(SyntheticCapture::denying());
    let err = f.coordinator.join("lobby", "alice").await.unwrap_err();
    assert!(matches!(err, VoiceError::MediaAccessDenied(_)));
    assert!(f.coordinator.status().await.unwrap().is_none());
    assert_eq!(f.capture.open_devices(), 0);
}

#[tokio::test]
async fn unavailable_transport_releases_media() {
    let f = fixture(SyntheticCapture::granting());
    f.room.set_online(false);

    let err = f.coordinator.join("lobby", "alice").await.unwrap_err();
    assert!(matches!(err, VoiceError::TransportUnavailable(_)));
    assert_eq!(f.capture.open_devices(), 0);
    assert_eq!(f.capture.close_calls(), 1);
    assert!(f.coordinator.status().await.unwrap().is_none());

    // A later join succeeds once the transport is back.
    f.room.set_online(true);
    f.coordinator.join("lobby", "alice").await.unwrap();
}

#[tokio::test]
async fn second_join_is_rejected() {
    let f = fixture(SyntheticCapture::granting());
    f.coordinator.join("lobby", "alice").await.unwrap();
    let err = f.coordinator.join("other", "alice").await.unwrap_err();
    assert_eq!(err, VoiceError::AlreadyJoined("lobby".into()));
}

#[tokio::test]
async fn mute_requires_a_session() {
    let f = fixture(SyntheticCapture::granting());
    assert_eq!(
        f.coordinator.toggle_mute().await.unwrap_err(),
        VoiceError::NotJoined
    );

    f.coordinator.join("lobby", "alice").await.unwrap();
    assert!(f.coordinator.toggle_mute().await.unwrap());
    assert!(!f.coordinator.toggle_mute().await.unwrap());
}

#[tokio::test]
async fn leave_is_idempotent() {
    let f = fixture(SyntheticCapture::granting());
    let mut events = f.coordinator.subscribe();
    f.coordinator.join("lobby", "alice").await.unwrap();
    f.coordinator.leave().await.unwrap();
    f.coordinator.leave().await.unwrap();

    assert_eq!(f.capture.open_devices(), 0);
    assert!(f.coordinator.status().await.unwrap().is_none());
    assert!(f.coordinator.links().await.unwrap().is_empty());

    let mut left = 0;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await
    {
        if matches!(event, VoiceEvent::SessionLeft { .. }) {
            left += 1;
        }
    }
    assert_eq!(left, 1);
}

#[tokio::test]
async fn shutdown_stops_the_task() {
    let f = fixture(SyntheticCapture::granting());
    f.coordinator.join("lobby", "alice").await.unwrap();
    f.coordinator.shutdown().await;

    assert_eq!(f.capture.open_devices(), 0);
    assert_eq!(
        f.coordinator.join("lobby", "alice").await.unwrap_err(),
        VoiceError::Shutdown
    );
}
