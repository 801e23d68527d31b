//! Single-record codec for archive matrices and integer vectors.
//!
//! A record payload starts with the binary marker and a type token:
//!
//! - `FM` / `DM`: width-prefixed row and column counts, then row-major
//!   float32 / float64 data.
//! - `CM`: a compressed matrix (see [`CompressedMatrix`]), always
//!   reconstructed as float32.

use crate::error::{FormatError, Result, UnsupportedError, WriteError};
use crate::primitive::{
    Element, Real, check_binary_marker, element_count, initial_capacity, read_chunked,
    read_elements, read_int, read_len, read_token, write_binary_marker, write_int, write_token,
};
use crate::quantize::{Quantiles, dequantize8, quantize8, quantize16};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{Array2, ArrayView2};
use ndarray_stats::QuantileExt;
use std::io::{self, BufRead, Read, Write};

/// Archive type token of the compressed matrix encoding.
pub const COMPRESSED_TOKEN: &str = "CM";

/// Dense matrix decoded from an archive record.
#[derive(Clone, Debug, PartialEq)]
pub enum Matrix {
    F32(Array2<f32>),
    F64(Array2<f64>),
}

impl Matrix {
    /// `(rows, cols)` of the matrix.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Matrix::F32(m) => m.dim(),
            Matrix::F64(m) => m.dim(),
        }
    }

    /// Archive type token this matrix is written with.
    pub fn type_token(&self) -> &'static str {
        match self {
            Matrix::F32(_) => f32::MATRIX_TOKEN,
            Matrix::F64(_) => f64::MATRIX_TOKEN,
        }
    }

    /// Convert to float32, narrowing float64 data.
    pub fn into_f32(self) -> Array2<f32> {
        match self {
            Matrix::F32(m) => m,
            Matrix::F64(m) => m.mapv(|v| v as f32),
        }
    }

    /// Convert to float64.
    pub fn into_f64(self) -> Array2<f64> {
        match self {
            Matrix::F32(m) => m.mapv(f64::from),
            Matrix::F64(m) => m,
        }
    }
}

impl From<Array2<f32>> for Matrix {
    fn from(m: Array2<f32>) -> Self {
        Matrix::F32(m)
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(m: Array2<f64>) -> Self {
        Matrix::F64(m)
    }
}

/// Column-quantized matrix in its on-disk form.
///
/// Layout after the `CM ` token: `min_value: f32`, `range: f32`,
/// `rows: i32`, `cols: i32` (all raw, no width prefix), then four `u16`
/// percentile codes per column, then `rows * cols` bytes in column-major
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressedMatrix {
    pub min_value: f32,
    pub range: f32,
    pub rows: usize,
    pub cols: usize,
    /// Percentile codes `[p0, p25, p75, p100]` for each column.
    pub column_codes: Vec<[u16; 4]>,
    /// Column-major quantized samples.
    pub data: Vec<u8>,
}

impl CompressedMatrix {
    /// Read the header and payload that follow the `CM` token.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let min_value = reader.read_f32::<LittleEndian>()?;
        let range = reader.read_f32::<LittleEndian>()?;
        let rows = read_dim(reader)?;
        let cols = read_dim(reader)?;

        let codes: Vec<u16> = read_chunked(reader, element_count(cols, 4)?, |r, dst| {
            r.read_u16_into::<LittleEndian>(dst)
        })?;
        let column_codes = codes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();

        let data: Vec<u8> =
            read_chunked(reader, element_count(rows, cols)?, |r, dst| r.read_exact(dst))?;

        Ok(Self {
            min_value,
            range,
            rows,
            cols,
            column_codes,
            data,
        })
    }

    /// Write the `CM` token followed by header and payload.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_token(writer, COMPRESSED_TOKEN)?;
        writer.write_f32::<LittleEndian>(self.min_value)?;
        writer.write_f32::<LittleEndian>(self.range)?;
        writer.write_i32::<LittleEndian>(dim_to_i32(self.rows)?)?;
        writer.write_i32::<LittleEndian>(dim_to_i32(self.cols)?)?;
        for code in self.column_codes.iter().flatten() {
            writer.write_u16::<LittleEndian>(*code)?;
        }
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// Percentile table of one column.
    pub fn quantiles(&self, col: usize) -> Quantiles {
        Quantiles::from_codes(self.column_codes[col], self.min_value, self.range)
    }

    /// Reconstruct the approximate float32 matrix.
    pub fn decompress(&self) -> Array2<f32> {
        let tables: Vec<Quantiles> = (0..self.cols).map(|c| self.quantiles(c)).collect();
        Array2::from_shape_fn((self.rows, self.cols), |(r, c)| {
            dequantize8(self.data[c * self.rows + r], &tables[c])
        })
    }

    /// Quantize a float32 matrix column by column.
    pub fn compress(matrix: ArrayView2<f32>) -> Result<Self> {
        if matrix.is_empty() {
            return Err(WriteError::EmptyMatrix.into());
        }

        let min_value = *matrix.min()?;
        let mut max_value = *matrix.max()?;
        if max_value == min_value {
            max_value = min_value + (1.0 + min_value.abs());
        }
        let range = max_value - min_value;

        let (rows, cols) = matrix.dim();
        let mut column_codes = Vec::with_capacity(cols);
        let mut data = Vec::with_capacity(rows * cols);

        for column in matrix.columns() {
            let mut sorted = column.to_vec();
            sorted.sort_by(f32::total_cmp);

            let codes = column_codes_for(&sorted, min_value, range);
            let table = Quantiles::from_codes(codes, min_value, range);

            data.extend(column.iter().map(|&v| quantize8(v, &table)));
            column_codes.push(codes);
        }

        Ok(Self {
            min_value,
            range,
            rows,
            cols,
            column_codes,
            data,
        })
    }
}

/// Percentile codes for one sorted, non-empty column.
///
/// Codes are forced strictly increasing so every bracket has a non-zero width.
fn column_codes_for(sorted: &[f32], min_value: f32, range: f32) -> [u16; 4] {
    let n = sorted.len();
    let code = |i: usize| quantize16(sorted[i], min_value, range);

    let (i25, i75) = if n >= 5 {
        let quarter = n / 4;
        (Some(quarter), Some(n - 1 - quarter))
    } else {
        ((n > 1).then_some(1), (n > 2).then_some(2))
    };
    let i100 = if n >= 5 { Some(n - 1) } else { (n > 3).then_some(3) };

    let p0 = code(0).min(65532);
    let p25 = i25.map_or(p0 + 1, |i| code(i).max(p0 + 1).min(65533));
    let p75 = i75.map_or(p25 + 1, |i| code(i).max(p25 + 1).min(65534));
    let p100 = i100.map_or(p75 + 1, |i| code(i).max(p75 + 1));

    [p0, p25, p75, p100]
}

/// Decode one matrix record at the current stream position.
pub fn decode_matrix<R: BufRead>(reader: &mut R) -> Result<Matrix> {
    check_binary_marker(reader)?;

    let token = read_token(reader)?;
    match token.as_str() {
        COMPRESSED_TOKEN => Ok(Matrix::F32(CompressedMatrix::read(reader)?.decompress())),
        "FM" => Ok(Matrix::F32(read_dense(reader)?)),
        "DM" => Ok(Matrix::F64(read_dense(reader)?)),
        _ => Err(UnsupportedError::MatrixType(token).into()),
    }
}

/// Decode one integer-vector record: width-prefixed length, then
/// width-prefixed values.
pub fn decode_vector<R: BufRead>(reader: &mut R) -> Result<Vec<i64>> {
    check_binary_marker(reader)?;

    let len = read_len(reader)?;
    let mut values = Vec::with_capacity(initial_capacity(len));
    for _ in 0..len {
        values.push(read_int(reader)?);
    }
    Ok(values)
}

/// Write `key`, the binary marker and a dense `FM`/`DM` payload.
pub fn encode_matrix<T: Real, W: Write>(
    writer: &mut W,
    key: &str,
    matrix: ArrayView2<T>,
) -> Result<()> {
    write_token(writer, key)?;
    write_binary_marker(writer)?;
    write_token(writer, T::MATRIX_TOKEN)?;

    let (rows, cols) = matrix.dim();
    write_int(writer, dim_to_i32(rows)?)?;
    write_int(writer, dim_to_i32(cols)?)?;

    match matrix.as_slice() {
        Some(data) => T::write_slice(writer, data)?,
        None => {
            let data: Vec<T> = matrix.iter().copied().collect();
            T::write_slice(writer, &data)?
        }
    }
    Ok(())
}

/// Write `key`, the binary marker and a `CM` payload.
pub fn encode_compressed_matrix<W: Write>(
    writer: &mut W,
    key: &str,
    matrix: ArrayView2<f32>,
) -> Result<()> {
    let compressed = CompressedMatrix::compress(matrix)?;
    write_token(writer, key)?;
    write_binary_marker(writer)?;
    compressed.write(writer)
}

fn read_dense<T: Element, R: Read>(reader: &mut R) -> Result<Array2<T>> {
    let rows = read_len(reader)?;
    let cols = read_len(reader)?;
    let data = read_elements(reader, element_count(rows, cols)?)?;
    Ok(Array2::from_shape_vec((rows, cols), data)?)
}

fn read_dim<R: Read>(reader: &mut R) -> Result<usize> {
    let dim = reader.read_i32::<LittleEndian>()?;
    usize::try_from(dim).map_err(|_| FormatError::NegativeLength(dim as i64).into())
}

fn dim_to_i32(dim: usize) -> Result<i32> {
    i32::try_from(dim).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("dimension {dim} exceeds i32"),
        )
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use ndarray::array;
    use std::io::Cursor;

    fn encode<T: Real>(key: &str, m: &Array2<T>) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_matrix(&mut buf, key, m.view()).unwrap();
        buf
    }

    fn decode_keyed(bytes: Vec<u8>) -> (String, Matrix) {
        let mut cursor = Cursor::new(bytes);
        let key = read_token(&mut cursor).unwrap();
        let matrix = decode_matrix(&mut cursor).unwrap();
        (key, matrix)
    }

    /// Hand-built `CM` record with the given header and bytes.
    fn compressed_record(
        min: f32,
        range: f32,
        rows: i32,
        cols: i32,
        codes: &[[u16; 4]],
        data: &[u8],
    ) -> Vec<u8> {
        let mut buf = b"\0BCM ".to_vec();
        buf.extend_from_slice(&min.to_le_bytes());
        buf.extend_from_slice(&range.to_le_bytes());
        buf.extend_from_slice(&rows.to_le_bytes());
        buf.extend_from_slice(&cols.to_le_bytes());
        for code in codes.iter().flatten() {
            buf.extend_from_slice(&code.to_le_bytes());
        }
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn f32_matrix_round_trips_bit_exact() {
        let m = array![
            [0.0f32, -0.0, 1.5e-40],
            [f32::MAX, f32::MIN_POSITIVE, -123.456]
        ];

        let (key, decoded) = decode_keyed(encode("utt1", &m));

        assert_eq!(key, "utt1");
        let Matrix::F32(decoded) = decoded else {
            panic!("expected float32 matrix");
        };
        assert_eq!(decoded.dim(), (2, 3));
        for (a, b) in m.iter().zip(decoded.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn f64_matrix_round_trips_bit_exact() {
        let m = array![[1.0f64 / 3.0], [-1e300], [f64::EPSILON]];

        let (_, decoded) = decode_keyed(encode("utt2", &m));

        let Matrix::F64(decoded) = decoded else {
            panic!("expected float64 matrix");
        };
        for (a, b) in m.iter().zip(decoded.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn non_contiguous_views_are_written_row_major() {
        let m = array![[1.0f32, 2.0], [3.0, 4.0]];
        let mut buf = Vec::new();
        encode_matrix(&mut buf, "t", m.t()).unwrap();

        let (_, decoded) = decode_keyed(buf);
        assert_eq!(decoded, Matrix::F32(array![[1.0, 3.0], [2.0, 4.0]]));
    }

    #[test]
    fn encoded_layout_matches_archive_format() {
        let bytes = encode("k", &array![[7.0f32]]);

        let mut expected = b"k \0BFM \x04".to_vec();
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.push(4);
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&7.0f32.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn rejects_unknown_matrix_type() {
        let mut cursor = Cursor::new(b"\0BXM \x04\0\0\0\0".to_vec());

        let err = decode_matrix(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Unsupported(UnsupportedError::MatrixType(t)) if t == "XM"));
    }

    #[test]
    fn rejects_text_mode_record() {
        let mut cursor = Cursor::new(b" [ 1 2 ]\n".to_vec());

        let err = decode_matrix(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Unsupported(UnsupportedError::TextMode)));
    }

    #[test]
    fn decodes_compressed_matrix_shape_and_values() {
        // min 0, range 65535: codes map onto themselves.
        let codes = [[0, 64, 192, 255], [100, 200, 300, 400]];
        let data = [0u8, 64, 255, 0, 192, 255];
        let bytes = compressed_record(0.0, 65535.0, 3, 2, &codes, &data);

        let Matrix::F32(m) = decode_matrix(&mut Cursor::new(bytes)).unwrap() else {
            panic!("compressed matrices decode to float32");
        };

        assert_eq!(m.dim(), (3, 2));
        let q0 = Quantiles::from_codes(codes[0], 0.0, 65535.0);
        let q1 = Quantiles::from_codes(codes[1], 0.0, 65535.0);
        assert_eq!(m[[0, 0]], dequantize8(0, &q0));
        assert_eq!(m[[1, 0]], dequantize8(64, &q0));
        assert_eq!(m[[2, 0]], dequantize8(255, &q0));
        assert_eq!(m[[0, 1]], dequantize8(0, &q1));
        assert_eq!(m[[1, 1]], dequantize8(192, &q1));
        assert_eq!(m[[2, 1]], dequantize8(255, &q1));
    }

    #[test]
    fn compressed_values_stay_within_column_brackets() {
        let (rows, cols) = (7usize, 4usize);
        let codes: Vec<[u16; 4]> = (0..cols as u16)
            .map(|c| [c * 1000, c * 1000 + 300, c * 1000 + 700, c * 1000 + 999])
            .collect();
        let data: Vec<u8> = (0..rows * cols).map(|i| (i * 37 % 256) as u8).collect();
        let bytes = compressed_record(-5.0, 10.0, rows as i32, cols as i32, &codes, &data);

        let m = decode_matrix(&mut Cursor::new(bytes)).unwrap().into_f32();

        assert_eq!(m.dim(), (rows, cols));
        for (c, column) in m.columns().into_iter().enumerate() {
            let q = Quantiles::from_codes(codes[c], -5.0, 10.0);
            for &v in column {
                assert!(v >= q.p0 - 1e-5 && v <= q.p100 + 1e-5, "{v} outside {q:?}");
            }
        }
    }

    #[test]
    fn decodes_empty_compressed_matrices() {
        for (rows, cols) in [(0, 0), (0, 3), (4, 0)] {
            let codes = vec![[0, 1, 2, 3]; cols as usize];
            let bytes = compressed_record(0.0, 1.0, rows, cols, &codes, &[]);

            let m = decode_matrix(&mut Cursor::new(bytes)).unwrap().into_f32();
            assert_eq!(m.dim(), (rows as usize, cols as usize));
        }
    }

    #[test]
    fn compress_round_trips_within_quantization_error() {
        let m = Array2::from_shape_fn((20, 3), |(r, c)| (r as f32 * 0.37 - 3.0) * (c as f32 + 1.0));
        let mut buf = Vec::new();
        encode_compressed_matrix(&mut buf, "c", m.view()).unwrap();

        let (key, decoded) = decode_keyed(buf);
        let decoded = decoded.into_f32();

        assert_eq!(key, "c");
        assert_eq!(decoded.dim(), m.dim());
        let span = m.max().unwrap() - m.min().unwrap();
        for (a, b) in m.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= span / 64.0, "{a} vs {b}");
        }
    }

    #[test]
    fn compress_handles_constant_and_short_columns() {
        let constant = Array2::from_elem((2, 2), 3.0f32);
        let compressed = CompressedMatrix::compress(constant.view()).unwrap();

        assert_eq!(compressed.min_value, 3.0);
        assert_eq!(compressed.range, 4.0);
        for codes in &compressed.column_codes {
            assert!(codes.windows(2).all(|w| w[0] < w[1]));
        }
        let decoded = compressed.decompress();
        assert!(decoded.iter().all(|&v| (v - 3.0).abs() < 1e-3));
    }

    #[test]
    fn compress_rejects_empty_matrix() {
        let empty = Array2::<f32>::zeros((0, 4));

        let err = CompressedMatrix::compress(empty.view()).unwrap_err();
        assert!(matches!(err, Error::Write(WriteError::EmptyMatrix)));
    }

    #[test]
    fn decodes_integer_vector() {
        let mut bytes = b"\0B\x04".to_vec();
        bytes.extend_from_slice(&3i32.to_le_bytes());
        for v in [5i32, -1, 7] {
            bytes.push(4);
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let values = decode_vector(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(values, vec![5, -1, 7]);
    }

    #[test]
    fn truncated_vector_is_an_io_error() {
        let mut bytes = b"\0B\x04".to_vec();
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&5i32.to_le_bytes());

        let err = decode_vector(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn huge_vector_length_is_an_error() {
        let mut bytes = b"\0B\x08".to_vec();
        bytes.extend_from_slice(&(1i64 << 62).to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&5i32.to_le_bytes());

        let err = decode_vector(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Io(_) | Error::Format(_)), "{err:?}");
    }

    #[test]
    fn overflowing_dense_dimensions_are_an_error() {
        let mut bytes = b"\0BFM ".to_vec();
        for _ in 0..2 {
            bytes.push(8);
            bytes.extend_from_slice(&(1i64 << 40).to_le_bytes());
        }

        let err = decode_matrix(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err:?}");
    }

    #[test]
    fn huge_compressed_header_without_payload_is_eof() {
        let bytes = compressed_record(0.0, 1.0, i32::MAX, i32::MAX, &[[0, 1, 2, 3]], &[7; 16]);

        let err = decode_matrix(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
