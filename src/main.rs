use clap::Parser;
use tracing_subscriber::EnvFilter;

use registry_sync::cli::{Cli, Command, run_doctor_command, run_events_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Command::Doctor { strict, config } => run_doctor_command(config.as_deref(), strict).await,
        Command::Events => run_events_command(),
    }
}
