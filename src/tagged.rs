//! Self-describing float arrays embedded in model files.
//!
//! The two-letter tag picks the element width (`F` or `D`) and the shape
//! (`V` vector or `M` matrix). Lengths use width-prefixed integers and the
//! elements follow as a raw row-major run.

use crate::error::{Result, UnsupportedError};
use crate::primitive::{Element, element_count, read_elements, read_len, read_token};
use ndarray::{Array1, Array2};
use std::io::BufRead;

/// Vector or matrix of `f32` or `f64`.
#[derive(Clone, Debug, PartialEq)]
pub enum TaggedArray {
    VectorF32(Array1<f32>),
    VectorF64(Array1<f64>),
    MatrixF32(Array2<f32>),
    MatrixF64(Array2<f64>),
}

/// Dimensions of a [`TaggedArray`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayShape {
    Vector(usize),
    Matrix(usize, usize),
}

impl TaggedArray {
    pub fn shape(&self) -> ArrayShape {
        match self {
            TaggedArray::VectorF32(v) => ArrayShape::Vector(v.len()),
            TaggedArray::VectorF64(v) => ArrayShape::Vector(v.len()),
            TaggedArray::MatrixF32(m) => ArrayShape::Matrix(m.nrows(), m.ncols()),
            TaggedArray::MatrixF64(m) => ArrayShape::Matrix(m.nrows(), m.ncols()),
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        match self.shape() {
            ArrayShape::Vector(n) => n,
            ArrayShape::Matrix(r, c) => r * c,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten to `f64` values in row-major order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            TaggedArray::VectorF32(v) => v.iter().copied().map(f64::from).collect(),
            TaggedArray::VectorF64(v) => v.to_vec(),
            TaggedArray::MatrixF32(m) => m.iter().copied().map(f64::from).collect(),
            TaggedArray::MatrixF64(m) => m.iter().copied().collect(),
        }
    }
}

/// Decode a tagged array at the current stream position.
pub fn decode_tagged_array<R: BufRead + ?Sized>(reader: &mut R) -> Result<TaggedArray> {
    let tag = read_token(reader)?;
    let unknown = || UnsupportedError::ArrayTag(tag.clone());

    let array = match tag.as_bytes() {
        [b'F', b'V'] => TaggedArray::VectorF32(read_vector(reader)?),
        [b'D', b'V'] => TaggedArray::VectorF64(read_vector(reader)?),
        [b'F', b'M'] => TaggedArray::MatrixF32(read_matrix(reader)?),
        [b'D', b'M'] => TaggedArray::MatrixF64(read_matrix(reader)?),
        _ => return Err(unknown().into()),
    };

    tracing::trace!(tag = tag.as_str(), shape = ?array.shape(), "decoded tagged array");
    Ok(array)
}

fn read_vector<T: Element, R: BufRead + ?Sized>(reader: &mut R) -> Result<Array1<T>> {
    let len = read_len(reader)?;
    Ok(Array1::from_vec(read_elements(reader, len)?))
}

fn read_matrix<T: Element, R: BufRead + ?Sized>(reader: &mut R) -> Result<Array2<T>> {
    let rows = read_len(reader)?;
    let cols = read_len(reader)?;
    let data = read_elements(reader, element_count(rows, cols)?)?;
    Ok(Array2::from_shape_vec((rows, cols), data)?)
}
