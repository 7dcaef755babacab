use clap::{Parser, Subcommand, ValueEnum};

use voxmesh_config::schema::TransportStrategy;

/// voxmesh: peer-mesh voice sessions over pluggable signaling.
#[derive(Parser, Debug)]
#[command(name = "voxmesh", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log level override (e.g. "voxmesh=debug").
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join a room and stay until `q` or end of input.
    Join {
        #[arg(short, long)]
        room: String,

        #[arg(short, long)]
        user: String,

        /// Signaling strategy; defaults to the configured one.
        #[arg(short, long, value_enum)]
        transport: Option<TransportArg>,
    },
    /// Run an in-process mesh and print the links each participant holds.
    Simulate {
        #[arg(short, long, default_value_t = 4)]
        participants: usize,

        /// Have the last participant leave once the mesh is up.
        #[arg(long)]
        depart: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportArg {
    #[value(name = "in_band")]
    InBand,
    Relay,
    Broker,
}

impl From<TransportArg> for TransportStrategy {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::InBand => TransportStrategy::InBand,
            TransportArg::Relay => TransportStrategy::Relay,
            TransportArg::Broker => TransportStrategy::Broker,
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
