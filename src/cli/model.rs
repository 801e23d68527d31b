//! Model subcommand - summarize an acoustic model file.

use crate::model::{ModelSummary, NnetSummary, read_nnet_am_file};
use eyre::{Context, Result, ensure};
use std::io::Write;
use std::path::PathBuf;

/// CLI arguments for summarizing a model.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path to input model (`final.mdl`)
    pub path: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Resolved configuration for summarizing a model.
#[derive(Debug)]
pub struct Config {
    pub path: PathBuf,
    pub json: bool,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        ensure!(args.path.is_file(), "model not found: {:?}", args.path.display());
        Ok(Self {
            path: args.path,
            json: args.json,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    tracing::info!(path = ?config.path.display(), "loading model");

    let am = read_nnet_am_file(&config.path)
        .wrap_err_with(|| format!("failed to load model: {:?}", config.path.display()))?;
    let summary = am.summary();

    let mut out = std::io::stdout().lock();
    if config.json {
        serde_json::to_writer_pretty(&mut out, &summary)?;
        writeln!(out)?;
    } else {
        write_text(&summary, &mut out)?;
    }
    Ok(())
}

/// Human-readable summary.
pub fn write_text<W: Write>(summary: &ModelSummary, mut out: W) -> Result<()> {
    writeln!(
        out,
        "topology: {} ({} phones, {} entries)",
        summary.topology, summary.phones, summary.topology_entries
    )?;
    writeln!(
        out,
        "transitions: {} tuples of {} fields, {} transition ids",
        summary.tuples, summary.tuple_arity, summary.transition_ids
    )?;

    match &summary.nnet {
        NnetSummary::Nnet2 {
            input_dim,
            output_dim,
            priors,
            components,
        } => {
            writeln!(
                out,
                "nnet2: {} components, {} -> {}, {priors} priors",
                components.len(),
                format_dim(*input_dim),
                format_dim(*output_dim)
            )?;
            for (index, component) in components.iter().enumerate() {
                writeln!(
                    out,
                    "  {index:>3} {} {} -> {}",
                    component.kind,
                    format_dim(component.input_dim),
                    format_dim(component.output_dim)
                )?;
            }
        }
        NnetSummary::Nnet3 => writeln!(out, "nnet3: not decoded")?,
    }
    Ok(())
}

fn format_dim(dim: Option<usize>) -> String {
    dim.map_or_else(|| "?".to_string(), |d| d.to_string())
}
