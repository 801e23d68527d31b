//! CLI argument definitions using clap.

pub mod ark;
pub mod model;
pub mod scp;

use clap::{Parser, Subcommand};
use eyre::Result;

#[derive(Debug, Parser)]
#[command(name = "kaldi-io")]
#[command(about = "Inspect and convert Kaldi archives, script files and models")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the records of a matrix archive
    ArkInfo(ark::InfoArgs),

    /// Re-encode a matrix archive
    ArkCopy(ark::CopyArgs),

    /// Resolve a script file and report each record's shape
    ScpInfo(scp::Args),

    /// Summarize a transition model and nnet2 acoustic model
    ModelInfo(model::Args),
}

/// Execute CLI command - separated for testing.
pub fn run(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::ArkInfo(args) => ark::execute_info(args.try_into()?),
        Commands::ArkCopy(args) => ark::execute_copy(args.try_into()?),
        Commands::ScpInfo(args) => scp::execute(args.try_into()?),
        Commands::ModelInfo(args) => model::execute(args.try_into()?),
    }
}
