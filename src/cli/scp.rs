//! Scp subcommand - resolve a script file and report record shapes.

use crate::script::ScpReader;
use eyre::{Context, Result, ensure};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// CLI arguments for resolving a script file.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path to input script file
    pub path: PathBuf,
}

/// Resolved configuration for resolving a script file.
#[derive(Debug)]
pub struct Config {
    pub path: PathBuf,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        ensure!(args.path.is_file(), "script file not found: {:?}", args.path.display());
        Ok(Self { path: args.path })
    }
}

pub fn execute(config: Config) -> Result<()> {
    tracing::info!(path = ?config.path.display(), "resolving script file");

    let file = File::open(&config.path)
        .wrap_err_with(|| format!("failed to open script file: {:?}", config.path.display()))?;
    let count = write_info(BufReader::new(file), std::io::stdout().lock())?;

    tracing::info!(records = count, "script file resolved");
    Ok(())
}

/// Write one `id rows x cols type` line per resolved entry; returns the entry count.
pub fn write_info<R: BufRead, W: Write>(reader: R, mut out: W) -> Result<usize> {
    let mut count = 0;
    for record in ScpReader::new(reader).matrices() {
        let (id, matrix) = record.wrap_err_with(|| format!("failed to resolve entry {count}"))?;
        let (rows, cols) = matrix.shape();
        writeln!(out, "{id} {rows}x{cols} {}", matrix.type_token())?;
        count += 1;
    }
    Ok(count)
}
