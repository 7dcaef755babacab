mod cli;
mod join;
mod simulate;

use std::path::Path;

use tracing_subscriber::EnvFilter;

use voxmesh_common::ConfigError;
use voxmesh_config::MeshConfig;

fn load_config(path: Option<&str>) -> Result<MeshConfig, ConfigError> {
    match path {
        Some(p) => voxmesh_config::load_from_path(Path::new(p)),
        None => voxmesh_config::load_config(),
    }
}

#[tokio::main]
async fn main() {
    let args = cli::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("voxmesh: {e}");
            std::process::exit(2);
        }
    };

    let log_directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| format!("voxmesh={}", config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                log_directive
                    .parse()
                    .unwrap_or_else(|_| "voxmesh=info".parse().unwrap()),
            ),
        )
        .init();

    let result = match args.command {
        cli::Command::Join {
            room,
            user,
            transport,
        } => join::run(config, &room, &user, transport.map(Into::into)).await,
        cli::Command::Simulate {
            participants,
            depart,
        } => simulate::run(&config, participants, depart).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "voxmesh failed");
        eprintln!("voxmesh: {e}");
        std::process::exit(1);
    }
}
