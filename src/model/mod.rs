//! Acoustic model files: a transition model followed by a neural network.
//!
//! ```text
//! \0B <TransitionModel> ... </TransitionModel> <Nnet> ... </Nnet> <priors>
//! ```
//!
//! Only nnet2 graphs are decoded. A `<Nnet3>` network is reported as
//! [`AcousticNnet::Nnet3Unsupported`] instead of failing, so callers can still
//! use the transition model.

pub mod component;
pub mod nnet;
pub mod topology;
pub mod transition;

use crate::error::{FormatError, Result};
use crate::primitive::{check_binary_marker, read_int, read_token};
use component::NnetComponent;
use nnet::Nnet;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use topology::TopologyKind;
use transition::TransitionModel;

/// Read a width-prefixed integer that must fit in 32 bits.
pub(crate) fn read_i32<R: Read + ?Sized>(reader: &mut R) -> Result<i32> {
    let value = read_int(reader)?;
    i32::try_from(value).map_err(|_| FormatError::IntRange(value).into())
}

/// Network section of an acoustic model.
#[derive(Clone, Debug, PartialEq)]
pub enum AcousticNnet {
    Nnet2(Nnet),
    /// `<Nnet3>` tag found; the network was not decoded
    Nnet3Unsupported,
}

impl AcousticNnet {
    pub fn as_nnet2(&self) -> Option<&Nnet> {
        match self {
            AcousticNnet::Nnet2(nnet) => Some(nnet),
            AcousticNnet::Nnet3Unsupported => None,
        }
    }
}

/// Transition model plus acoustic network.
#[derive(Clone, Debug, PartialEq)]
pub struct NnetAm {
    pub transition_model: TransitionModel,
    pub nnet: AcousticNnet,
}

impl NnetAm {
    /// Decode a whole model stream, binary marker included.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        check_binary_marker(reader)?;
        let transition_model = TransitionModel::read(reader)?;

        let tag = read_token(reader)?;
        let nnet = match tag.as_str() {
            "<Nnet>" => AcousticNnet::Nnet2(Nnet::read_body(reader)?),
            "<Nnet3>" => {
                tracing::warn!("nnet3 networks are not supported, skipping network");
                AcousticNnet::Nnet3Unsupported
            }
            _ => {
                return Err(FormatError::UnexpectedToken {
                    expected: "<Nnet>".to_string(),
                    found: tag,
                }
                .into());
            }
        };

        Ok(Self {
            transition_model,
            nnet,
        })
    }

    /// Structural overview of the model.
    pub fn summary(&self) -> ModelSummary {
        let tm = &self.transition_model;
        ModelSummary {
            phones: tm.topology.phones.len(),
            topology: match tm.topology.kind {
                TopologyKind::Hmm => "hmm",
                TopologyKind::NonHmm => "non-hmm",
            },
            topology_entries: tm.topology.entries.len(),
            tuple_arity: tm.tuples.arity(),
            tuples: tm.tuples.len(),
            transition_ids: tm.log_probs.len(),
            nnet: match &self.nnet {
                AcousticNnet::Nnet2(nnet) => NnetSummary::Nnet2 {
                    input_dim: nnet.input_dim(),
                    output_dim: nnet.output_dim(),
                    priors: nnet.priors.len(),
                    components: nnet.components.iter().map(ComponentSummary::from).collect(),
                },
                AcousticNnet::Nnet3Unsupported => NnetSummary::Nnet3,
            },
        }
    }
}

/// Decode an acoustic model from a stream.
pub fn read_nnet_am<R: BufRead>(reader: &mut R) -> Result<NnetAm> {
    NnetAm::read(reader)
}

/// Open and decode an acoustic model file.
pub fn read_nnet_am_file(path: impl AsRef<Path>) -> Result<NnetAm> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "reading acoustic model");
    let mut reader = BufReader::new(File::open(path)?);
    NnetAm::read(&mut reader)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelSummary {
    pub phones: usize,
    pub topology: &'static str,
    pub topology_entries: usize,
    pub tuple_arity: usize,
    pub tuples: usize,
    pub transition_ids: usize,
    pub nnet: NnetSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum NnetSummary {
    Nnet2 {
        input_dim: Option<usize>,
        output_dim: Option<usize>,
        priors: usize,
        components: Vec<ComponentSummary>,
    },
    Nnet3,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComponentSummary {
    pub kind: &'static str,
    pub input_dim: Option<usize>,
    pub output_dim: Option<usize>,
}

impl From<&NnetComponent> for ComponentSummary {
    fn from(component: &NnetComponent) -> Self {
        Self {
            kind: component.kind().name(),
            input_dim: component.input_dim(),
            output_dim: component.output_dim(),
        }
    }
}
