//! HMM topology block (`<Topology>` ... `</Topology>`).

use super::read_i32;
use crate::error::{FormatError, Result};
use crate::primitive::{expect_token, read_float, read_typed_vector};
use std::io::BufRead;

/// Entry count that announces the non-HMM layout.
const NON_HMM_SENTINEL: i32 = -1;

#[derive(Clone, Debug, PartialEq)]
pub struct HmmTransition {
    pub target_state: i32,
    pub log_prob: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HmmState {
    pub pdf_class: i32,
    /// Only present in non-HMM topologies
    pub self_loop_pdf_class: Option<i32>,
    pub transitions: Vec<HmmTransition>,
}

/// Layout variant chosen once per topology.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TopologyKind {
    /// One pdf class per state
    #[default]
    Hmm,
    /// Separate forward and self-loop pdf classes per state
    NonHmm,
}

/// States of one phone's HMM.
pub type TopologyEntry = Vec<HmmState>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HmmTopology {
    pub phones: Vec<i32>,
    pub phone_to_entry_index: Vec<i32>,
    pub entries: Vec<TopologyEntry>,
    pub kind: TopologyKind,
}

impl HmmTopology {
    pub fn is_hmm(&self) -> bool {
        self.kind == TopologyKind::Hmm
    }

    /// Topology entry used by `phone`, if the phone is listed.
    pub fn entry_for_phone(&self, phone: i32) -> Option<&TopologyEntry> {
        let index = *self.phone_to_entry_index.get(usize::try_from(phone).ok()?)?;
        self.entries.get(usize::try_from(index).ok()?)
    }

    /// Decode a topology block, opening tag included.
    pub fn read<R: BufRead + ?Sized>(reader: &mut R) -> Result<Self> {
        expect_token(reader, "<Topology>")?;
        let phones = read_typed_vector::<i32, _>(reader)?;
        let phone_to_entry_index = read_typed_vector::<i32, _>(reader)?;

        let mut count = read_i32(reader)?;
        let kind = if count == NON_HMM_SENTINEL {
            count = read_i32(reader)?;
            TopologyKind::NonHmm
        } else {
            TopologyKind::Hmm
        };
        let count = to_len(count)?;

        let entries = (0..count)
            .map(|_| read_entry(reader, kind))
            .collect::<Result<Vec<_>>>()?;
        expect_token(reader, "</Topology>")?;

        tracing::debug!(
            phones = phones.len(),
            entries = entries.len(),
            ?kind,
            "decoded topology"
        );
        Ok(Self {
            phones,
            phone_to_entry_index,
            entries,
            kind,
        })
    }
}

fn read_entry<R: BufRead + ?Sized>(reader: &mut R, kind: TopologyKind) -> Result<TopologyEntry> {
    let states = to_len(read_i32(reader)?)?;
    (0..states).map(|_| read_state(reader, kind)).collect()
}

fn read_state<R: BufRead + ?Sized>(reader: &mut R, kind: TopologyKind) -> Result<HmmState> {
    let pdf_class = read_i32(reader)?;
    let self_loop_pdf_class = match kind {
        TopologyKind::Hmm => None,
        TopologyKind::NonHmm => Some(read_i32(reader)?),
    };

    let count = to_len(read_i32(reader)?)?;
    let transitions = (0..count)
        .map(|_| -> Result<HmmTransition> {
            Ok(HmmTransition {
                target_state: read_i32(reader)?,
                log_prob: read_float(reader)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(HmmState {
        pdf_class,
        self_loop_pdf_class,
        transitions,
    })
}

fn to_len(count: i32) -> Result<usize> {
    usize::try_from(count).map_err(|_| FormatError::NegativeLength(count.into()).into())
}
