//! kaldi-io: Binary codec for Kaldi archives, script files and nnet2 acoustic models.
//!
//! Only the binary variants of the formats are read; text-mode input fails
//! with [`error::UnsupportedError::TextMode`].
//!
//! # Architecture
//!
//! - [`primitive`]: tokens, binary marker and width-prefixed scalars
//! - [`quantize`]: 16-bit and 8-bit codes of the compressed matrix format
//! - [`matrix`]: single `FM`/`DM`/`CM` matrix and integer vector records
//! - [`archive`]: lazy `(key, value)` iteration over `.ark` streams, and writing
//! - [`script`]: `.scp` index resolution into files, offsets and command output
//! - [`tagged`]: `FV`/`DV`/`FM`/`DM` arrays embedded in model files
//! - [`model`]: transition model, HMM topology and nnet2 component graph
//!
//! # Quick Start
//!
//! ```ignore
//! use kaldi_io::archive::open_ark;
//! use kaldi_io::matrix::Matrix;
//!
//! for record in open_ark::<Matrix>("feats.ark")? {
//!     let (key, matrix) = record?;
//!     println!("{key} {:?}", matrix.shape());
//! }
//!
//! let am = kaldi_io::model::read_nnet_am_file("final.mdl")?;
//! println!("{:?}", am.summary());
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod matrix;
pub mod model;
pub mod primitive;
pub mod quantize;
pub mod script;
pub mod tagged;

pub use error::{Error, Result};
