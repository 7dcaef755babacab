//! `voxmesh simulate`: a whole room in one process over the loopback engine.

use std::sync::Arc;
use std::time::Duration;

use voxmesh_common::{LinkState, MeshError};
use voxmesh_config::MeshConfig;
use voxmesh_session::{
    InBandTransport, LocalChatRoom, LoggingSink, LoopbackConnector, SessionServices,
    SyntheticCapture, VoiceSessionCoordinator,
};

const ROOM: &str = "simulation";

pub async fn run(config: &MeshConfig, participants: usize, depart: bool) -> Result<(), MeshError> {
    if participants < 2 {
        return Err(MeshError::Other("simulate needs at least 2 participants".into()));
    }

    let room = LocalChatRoom::new();
    let connector = LoopbackConnector::default();
    let mut members = Vec::with_capacity(participants);
    for i in 1..=participants {
        let user = format!("p{i}");
        let transport = InBandTransport::new(
            Arc::new(room.pipe(&user)),
            config.transport.in_band.clone(),
        );
        let coordinator = VoiceSessionCoordinator::spawn(
            config,
            SessionServices {
                capture: Arc::new(SyntheticCapture::granting()),
                connector: Arc::new(connector.clone()),
                transport: Arc::new(transport),
                sink: Arc::new(LoggingSink),
            },
        );
        coordinator.join(ROOM, &user).await?;
        members.push((user, coordinator));
    }

    let deadline = Duration::from_millis(u64::from(config.negotiation.connect_timeout_ms));
    let formed = settle(&members, deadline).await?;
    let links = print_mesh(&members).await?;
    println!(
        "{} links across {} participants (full mesh is {})",
        links,
        participants,
        participants * (participants - 1) / 2
    );
    let journal = connector.journal();
    println!(
        "{} offers, {} answers, {} engine peers{}",
        journal.offers.len(),
        journal.answers.len(),
        journal.peers_created,
        if formed { "" } else { " (mesh incomplete)" }
    );

    if depart {
        if let Some((user, leaver)) = members.pop() {
            leaver.leave().await?;
            leaver.shutdown().await;
            println!("{user} left");
            settle(&members, deadline).await?;
            print_mesh(&members).await?;
        }
    }

    for (_, coordinator) in &members {
        coordinator.shutdown().await;
    }
    Ok(())
}

/// Wait until every member holds a connected link to every other one.
async fn settle(
    members: &[(String, VoiceSessionCoordinator)],
    deadline: Duration,
) -> Result<bool, MeshError> {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        let mut complete = true;
        for (_, c) in members {
            let links = c.links().await?;
            let connected = links
                .iter()
                .filter(|l| l.state == LinkState::Connected)
                .count();
            if links.len() != members.len() - 1 || connected != links.len() {
                complete = false;
                break;
            }
        }
        if complete {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(false)
}

/// Print each member's links and return the number of connected pairs.
async fn print_mesh(members: &[(String, VoiceSessionCoordinator)]) -> Result<usize, MeshError> {
    let mut connected = 0;
    for (user, c) in members {
        let links = c.links().await?;
        connected += links
            .iter()
            .filter(|l| l.state == LinkState::Connected)
            .count();
        let peers: Vec<String> = links
            .into_iter()
            .map(|l| format!("{}:{}", l.user_id, l.state))
            .collect();
        println!("{user:<6} {}", peers.join(" "));
    }
    Ok(connected / 2)
}
