//! nnet2 component graph (`<Nnet>` ... `</Nnet>`) followed by the class priors.

use super::component::{NnetComponent, read_component};
use crate::error::Result;
use crate::primitive::{expect_token, read_len};
use crate::tagged::{TaggedArray, decode_tagged_array};
use std::io::BufRead;

#[derive(Clone, Debug, PartialEq)]
pub struct Nnet {
    pub components: Vec<NnetComponent>,
    /// Tagged float vector of pdf priors
    pub priors: TaggedArray,
}

impl Nnet {
    /// Decode the graph body and priors; the `<Nnet>` tag is already consumed.
    pub fn read_body<R: BufRead>(reader: &mut R) -> Result<Self> {
        expect_token(reader, "<NumComponents>")?;
        let count = read_len(reader)?;

        expect_token(reader, "<Components>")?;
        let mut components = Vec::with_capacity(count.min(1024));
        for index in 0..count {
            let component = read_component(reader)?;
            tracing::trace!(index, kind = component.kind().name(), "decoded component");
            components.push(component);
        }
        expect_token(reader, "</Components>")?;
        expect_token(reader, "</Nnet>")?;

        let priors = decode_tagged_array(reader)?;
        tracing::debug!(
            components = components.len(),
            priors = priors.len(),
            "decoded nnet"
        );
        Ok(Self { components, priors })
    }

    /// Input dimension of the first component.
    pub fn input_dim(&self) -> Option<usize> {
        self.components.first()?.input_dim()
    }

    /// Output dimension of the last component.
    pub fn output_dim(&self) -> Option<usize> {
        self.components.last()?.output_dim()
    }
}
