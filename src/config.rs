//! Read and write options shared by the library and the CLI.

use clap::ValueEnum;

/// How repeated archive keys are handled when collecting records into a map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum KeyPolicy {
    /// Later records overwrite earlier ones, keeping the first key position
    #[default]
    LastWins,
    /// A repeated key aborts the read
    Reject,
}

/// Encoding used when writing matrices to an archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Precision {
    /// Keep each matrix's decoded element type
    #[default]
    Keep,
    /// Dense float32 (`FM`)
    F32,
    /// Dense float64 (`DM`)
    F64,
    /// Lossy column-quantized (`CM`)
    Compressed,
}

/// Options for collecting archive or script records.
#[derive(clap::Args, Clone, Copy, Debug, Default)]
pub struct ReadConfig {
    /// Policy for repeated keys
    #[arg(long, value_enum, default_value_t = KeyPolicy::default())]
    pub key_policy: KeyPolicy,
}

impl ReadConfig {
    pub fn new(key_policy: KeyPolicy) -> Self {
        Self { key_policy }
    }
}

/// Options for writing archives.
#[derive(clap::Args, Clone, Copy, Debug, Default)]
pub struct WriteConfig {
    /// Output matrix encoding
    #[arg(long, value_enum, default_value_t = Precision::default())]
    pub precision: Precision,
}

impl WriteConfig {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }
}
