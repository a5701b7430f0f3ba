use anyhow::Result;
use clap::{Parser, Subcommand};
use kinring_client::cli;
use kinring_client::config::KinringConfig;
use kinring_client::telemetry;

#[derive(Parser)]
#[command(author, version, about = "Kinring care-circle store and demo CLI")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scripted two-actor circle walkthrough against the local store
    Demo,
    /// Dump a collection from the local store
    Inspect { collection: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();
    let config = KinringConfig::from_env()?;

    match args.command.unwrap_or(Command::Demo) {
        Command::Demo => cli::run_demo(config).await,
        Command::Inspect { collection } => cli::run_inspect(config, &collection),
    }
}
