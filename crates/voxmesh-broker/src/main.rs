//! voxmesh-broker: WebSocket signaling broker for voice meshes.

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use voxmesh_broker::{serve, spawn_reaper, RoomStore};

#[derive(Parser)]
#[command(name = "voxmesh-broker", about = "Peer-id signaling broker for voxmesh")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8787)]
    port: u16,

    /// Seconds between sweeps for dead members.
    #[arg(long, default_value_t = 60)]
    reap_interval_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxmesh_broker=info".into()),
        )
        .init();

    let args = Args::parse();
    let store = RoomStore::new();

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("voxmesh-broker listening on {}", addr);

    spawn_reaper(store.clone(), Duration::from_secs(args.reap_interval_secs));
    serve(listener, store).await;
}
