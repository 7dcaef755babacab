//! `voxmesh join`: one participant driven from the terminal.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use voxmesh_common::{MeshError, VoiceEvent};
use voxmesh_config::schema::TransportStrategy;
use voxmesh_config::MeshConfig;
use voxmesh_session::signaling::in_band::RealtimeChatPipe;
use voxmesh_session::{
    BrokerTransport, InBandTransport, LoggingSink, PeerConnector, RelayTransport,
    SessionServices, SignalingTransport, SyntheticCapture, VoiceSessionCoordinator,
};

pub async fn run(
    config: MeshConfig,
    room: &str,
    user: &str,
    strategy: Option<TransportStrategy>,
) -> Result<(), MeshError> {
    let strategy = strategy.unwrap_or(config.transport.strategy);
    let transport = build_transport(&config, strategy, room, user).await;
    let services = SessionServices {
        capture: Arc::new(SyntheticCapture::granting()),
        connector: build_connector(&config)?,
        transport,
        sink: Arc::new(LoggingSink),
    };

    let coordinator = VoiceSessionCoordinator::spawn(&config, services);
    let printer = tokio::spawn(print_events(coordinator.subscribe()));

    coordinator.join(room, user).await?;
    println!("joined {room} as {user} ({strategy:?}); m = mute, s = status, q = leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line?.as_deref().map(str::trim) {
                    Some("m") => {
                        let muted = coordinator.toggle_mute().await?;
                        println!("{}", if muted { "muted" } else { "unmuted" });
                    }
                    Some("s") => print_status(&coordinator).await?,
                    Some("q") | None => break,
                    Some("") => {}
                    Some(other) => println!("unknown command {other:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    coordinator.leave().await?;
    coordinator.shutdown().await;
    printer.abort();
    Ok(())
}

async fn build_transport(
    config: &MeshConfig,
    strategy: TransportStrategy,
    room: &str,
    user: &str,
) -> Arc<dyn SignalingTransport> {
    match strategy {
        TransportStrategy::InBand => {
            let pipe = RealtimeChatPipe::open(&config.transport.relay, room, user).await;
            Arc::new(InBandTransport::new(
                Arc::new(pipe),
                config.transport.in_band.clone(),
            ))
        }
        TransportStrategy::Relay => Arc::new(RelayTransport::new(&config.transport.relay)),
        TransportStrategy::Broker => Arc::new(BrokerTransport::new(&config.transport.broker)),
    }
}

#[cfg(feature = "webrtc")]
fn build_connector(config: &MeshConfig) -> Result<Arc<dyn PeerConnector>, MeshError> {
    let connector = voxmesh_session::rtc::WebRtcConnector::new(&config.ice)?;
    Ok(Arc::new(connector))
}

#[cfg(not(feature = "webrtc"))]
fn build_connector(_config: &MeshConfig) -> Result<Arc<dyn PeerConnector>, MeshError> {
    tracing::warn!("Built without the webrtc feature; links only form inside this process");
    Ok(Arc::new(voxmesh_session::LoopbackConnector::default()))
}

async fn print_status(coordinator: &VoiceSessionCoordinator) -> Result<(), MeshError> {
    let Some(status) = coordinator.status().await? else {
        println!("not in a session");
        return Ok(());
    };
    println!(
        "{} in {}{}",
        status.user_id,
        status.room,
        if status.muted { " (muted)" } else { "" }
    );
    let links = coordinator.links().await?;
    for p in &status.participants {
        let state = links
            .iter()
            .find(|l| l.user_id == p.user_id)
            .map(|l| l.state.as_str())
            .unwrap_or("no link");
        println!(
            "  {:<16} {:<10}{}",
            p.user_id,
            state,
            if p.muted { " muted" } else { "" }
        );
    }
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<VoiceEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event {
                VoiceEvent::ParticipantJoined { user_id, muted } => {
                    println!("+ {user_id}{}", if muted { " (muted)" } else { "" });
                }
                VoiceEvent::ParticipantLeft { user_id } => println!("- {user_id}"),
                VoiceEvent::LinkStateChanged { user_id, state } => {
                    println!("  {user_id}: {state}");
                }
                VoiceEvent::LinkFailed { user_id, reason } => {
                    println!("! {user_id}: {reason}");
                }
                VoiceEvent::Error(message) => println!("! {message}"),
                other => tracing::debug!(event = ?other, "Voice event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
