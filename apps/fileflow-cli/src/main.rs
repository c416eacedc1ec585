//! FileFlow command-line entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fileflow", version, about = "Send files to a device on the same network")]
struct Cli {
    /// Configuration file (defaults to the per-user location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Offer a session and send files once the receiver joins.
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Join a session from an offer and save incoming files.
    Receive {
        /// Directory for received files (overrides `output_dir`).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    // Blobs go to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = config::Config::load(cli.config.as_deref())?;
    tracing::debug!(output_dir = %config.output_dir.display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Send { files } => rt.block_on(app::send(config, files)),
        Command::Receive { output } => {
            if let Some(output) = output {
                config.output_dir = output;
            }
            rt.block_on(app::receive(config))
        }
    }
}
