//! Operator CLI.

pub mod doctor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use doctor::{run_doctor_command, run_events_command};

#[derive(Parser, Debug)]
#[command(
    name = "registry-sync",
    version,
    about = "Diagnostics for the registry synchronization layer"
)]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "REGISTRY_LOG_JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Check configuration, RPC reachability, chain id and contract deployments.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,

        /// Config file to use instead of ~/.registry-sync/config.toml.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the contract events bridged to local notifications, as JSON.
    Events,
}
