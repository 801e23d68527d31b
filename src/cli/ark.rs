//! Ark subcommands - list and re-encode matrix archives.

use crate::archive::{ArkWriter, read_ark, read_ark_map};
use crate::config::{ReadConfig, WriteConfig};
use crate::matrix::Matrix;
use eyre::{Context, Result, ensure};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// CLI arguments for listing an archive.
#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Path to input archive
    pub path: PathBuf,
}

/// Resolved configuration for listing an archive.
#[derive(Debug)]
pub struct InfoConfig {
    pub path: PathBuf,
}

impl TryFrom<InfoArgs> for InfoConfig {
    type Error = eyre::Error;

    fn try_from(args: InfoArgs) -> Result<Self> {
        ensure!(args.path.is_file(), "archive not found: {:?}", args.path.display());
        Ok(Self { path: args.path })
    }
}

pub fn execute_info(config: InfoConfig) -> Result<()> {
    tracing::info!(path = ?config.path.display(), "listing archive");

    let file = File::open(&config.path)
        .wrap_err_with(|| format!("failed to open archive: {:?}", config.path.display()))?;
    let count = write_info(BufReader::new(file), std::io::stdout().lock())?;

    tracing::info!(records = count, "archive listed");
    Ok(())
}

/// Write one `key rows x cols type` line per record; returns the record count.
pub fn write_info<R: BufRead, W: Write>(reader: R, mut out: W) -> Result<usize> {
    let mut count = 0;
    for record in read_ark::<Matrix, _>(reader) {
        let (key, matrix) = record.wrap_err_with(|| format!("failed to read record {count}"))?;
        let (rows, cols) = matrix.shape();
        writeln!(out, "{key} {rows}x{cols} {}", matrix.type_token())?;
        count += 1;
    }
    Ok(count)
}

/// CLI arguments for re-encoding an archive.
#[derive(clap::Args, Debug)]
pub struct CopyArgs {
    /// Path to input archive
    pub input: PathBuf,

    /// Path to output archive
    pub output: PathBuf,

    #[command(flatten)]
    pub read_config: ReadConfig,

    #[command(flatten)]
    pub write_config: WriteConfig,
}

/// Resolved configuration for re-encoding an archive.
#[derive(Debug)]
pub struct CopyConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub read_config: ReadConfig,
    pub write_config: WriteConfig,
}

impl TryFrom<CopyArgs> for CopyConfig {
    type Error = eyre::Error;

    fn try_from(args: CopyArgs) -> Result<Self> {
        ensure!(
            args.input != args.output,
            "input and output must differ: {:?}",
            args.input.display()
        );
        Ok(Self {
            input: args.input,
            output: args.output,
            read_config: args.read_config,
            write_config: args.write_config,
        })
    }
}

pub fn execute_copy(config: CopyConfig) -> Result<()> {
    tracing::info!(
        input = ?config.input.display(),
        output = ?config.output.display(),
        precision = ?config.write_config.precision,
        "copying archive"
    );

    let file = File::open(&config.input)
        .wrap_err_with(|| format!("failed to open archive: {:?}", config.input.display()))?;
    let records: indexmap::IndexMap<String, Matrix> =
        read_ark_map(BufReader::new(file), config.read_config.key_policy)
            .wrap_err_with(|| format!("failed to read archive: {:?}", config.input.display()))?;

    let mut writer = ArkWriter::create(&config.output, config.write_config.precision)
        .wrap_err_with(|| format!("failed to create archive: {:?}", config.output.display()))?;
    for (key, matrix) in &records {
        writer
            .write_matrix(key, matrix)
            .wrap_err_with(|| format!("failed to write record: {key}"))?;
    }
    writer.finish()?;

    tracing::info!(records = records.len(), "archive written");
    Ok(())
}
