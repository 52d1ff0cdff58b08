//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Agentlink - ship events to the local agent
#[derive(Parser, Debug)]
#[command(name = "agentlink")]
#[command(version)]
#[command(about = "Ship telemetry events to the co-located collection agent")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Agent endpoint (socket path or host:port), overriding the config
    #[arg(short, long, global = true)]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish a heartbeat event every period until interrupted
    Run {
        /// Data id of the heartbeat stream
        #[arg(short, long)]
        data_id: Option<i32>,

        /// Seconds between heartbeats
        #[arg(short, long)]
        period: Option<u64>,
    },

    /// Publish a single JSON event
    Send {
        /// Event object, e.g. '{"dataid": 1001, "msg": "hi"}'
        event: String,
    },

    /// Print the resolved configuration
    CheckConfig,
}
