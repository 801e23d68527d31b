//! Transition model block (`<TransitionModel>` ... `</TransitionModel>`).

use super::read_i32;
use super::topology::HmmTopology;
use crate::error::{ModelError, Result};
use crate::primitive::{expect_token, read_len, read_token};
use crate::tagged::{TaggedArray, decode_tagged_array};
use std::io::BufRead;

/// `(phone, hmm_state, pdf_class)` from a `<Triples>` block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Triple {
    pub phone: i32,
    pub hmm_state: i32,
    pub pdf_class: i32,
}

/// `(phone, hmm_state, pdf_class, self_loop_pdf_class)` from a `<Tuples>`
/// block; the forward pdf class precedes the self-loop one on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tuple {
    pub phone: i32,
    pub hmm_state: i32,
    pub pdf_class: i32,
    pub self_loop_pdf_class: i32,
}

/// Transition tuples; the block tag fixes the arity for the whole model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionTuples {
    Triples(Vec<Triple>),
    Tuples(Vec<Tuple>),
}

impl TransitionTuples {
    /// Fields per tuple: 3 or 4.
    pub fn arity(&self) -> usize {
        match self {
            TransitionTuples::Triples(_) => 3,
            TransitionTuples::Tuples(_) => 4,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TransitionTuples::Triples(t) => t.len(),
            TransitionTuples::Tuples(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<R: BufRead + ?Sized>(reader: &mut R) -> Result<Self> {
        let tag = read_token(reader)?;
        let tuples = match tag.as_str() {
            "<Triples>" => {
                let count = read_len(reader)?;
                let triples = (0..count)
                    .map(|_| -> Result<Triple> {
                        Ok(Triple {
                            phone: read_i32(reader)?,
                            hmm_state: read_i32(reader)?,
                            pdf_class: read_i32(reader)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                expect_token(reader, "</Triples>")?;
                TransitionTuples::Triples(triples)
            }
            "<Tuples>" => {
                let count = read_len(reader)?;
                let tuples = (0..count)
                    .map(|_| -> Result<Tuple> {
                        Ok(Tuple {
                            phone: read_i32(reader)?,
                            hmm_state: read_i32(reader)?,
                            pdf_class: read_i32(reader)?,
                            self_loop_pdf_class: read_i32(reader)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                expect_token(reader, "</Tuples>")?;
                TransitionTuples::Tuples(tuples)
            }
            _ => return Err(ModelError::TupleTag(tag).into()),
        };

        Ok(tuples)
    }
}

/// HMM topology, transition tuples and transition log-probabilities.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionModel {
    pub topology: HmmTopology,
    pub tuples: TransitionTuples,
    /// Tagged float vector indexed by transition id
    pub log_probs: TaggedArray,
}

impl TransitionModel {
    /// Decode a transition model block, opening tag included.
    pub fn read<R: BufRead + ?Sized>(reader: &mut R) -> Result<Self> {
        expect_token(reader, "<TransitionModel>")?;
        let topology = HmmTopology::read(reader)?;
        let tuples = TransitionTuples::read(reader)?;

        expect_token(reader, "<LogProbs>")?;
        let log_probs = decode_tagged_array(reader)?;
        expect_token(reader, "</LogProbs>")?;
        expect_token(reader, "</TransitionModel>")?;

        tracing::debug!(
            tuples = tuples.len(),
            arity = tuples.arity(),
            log_probs = log_probs.len(),
            "decoded transition model"
        );
        Ok(Self {
            topology,
            tuples,
            log_probs,
        })
    }

    /// Transition log-probabilities widened to `f64`.
    pub fn log_prob_values(&self) -> Vec<f64> {
        self.log_probs.to_f64_vec()
    }
}
