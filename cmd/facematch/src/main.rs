//! facematch - identify faces against a gallery of precomputed embeddings.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{BuildCommand, InspectCommand, QueryCommand};

/// facematch - identify faces against a gallery of precomputed embeddings.
///
/// The gallery is a directory of `<label>.npy` files (or a JSON object of
/// label to vector). It is indexed with a forest of random projection trees,
/// which can be persisted and reused across runs.
#[derive(Parser)]
#[command(name = "facematch")]
#[command(about = "Face embedding gallery search")]
#[command(version)]
pub struct Cli {
    /// Engine config file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build (or refresh) the persisted index for a gallery
    Build(BuildCommand),
    /// Rank gallery identities by similarity to a query embedding
    Query(QueryCommand),
    /// Print the structure of a persisted index
    Inspect(InspectCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for results.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match &cli.command {
        Commands::Build(cmd) => cmd.run(&cli),
        Commands::Query(cmd) => cmd.run(&cli),
        Commands::Inspect(cmd) => cmd.run(&cli),
    }
}
