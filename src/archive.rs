//! Archive (`.ark`) streams: `<key> ' ' <binary record>` repeated to end of stream.

use crate::config::{KeyPolicy, Precision};
use crate::error::{FormatError, Result, WriteError};
use crate::matrix::{
    Matrix, decode_matrix, decode_vector, encode_compressed_matrix, encode_matrix,
};
use crate::primitive::{Real, read_token};
use indexmap::IndexMap;
use ndarray::ArrayView2;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::path::Path;

/// Value type that can be decoded from one archive record.
pub trait ArkRecord: Sized {
    /// Decode the record payload that follows the key.
    fn decode<R: BufRead>(reader: &mut R) -> Result<Self>;
}

impl ArkRecord for Matrix {
    fn decode<R: BufRead>(reader: &mut R) -> Result<Self> {
        decode_matrix(reader)
    }
}

impl ArkRecord for Vec<i64> {
    fn decode<R: BufRead>(reader: &mut R) -> Result<Self> {
        decode_vector(reader)
    }
}

/// Lazy iterator over `(key, value)` records of an archive stream.
///
/// Each call to `next` reads exactly one record. Iteration ends at the end of
/// the stream, or after the first error.
pub struct ArkReader<R, T> {
    reader: R,
    finished: bool,
    _record: PhantomData<fn() -> T>,
}

/// Archive of matrices (`FM`, `DM` or `CM` records).
pub type MatrixArkReader<R> = ArkReader<R, Matrix>;

/// Archive of integer vectors, e.g. alignments.
pub type VectorArkReader<R> = ArkReader<R, Vec<i64>>;

impl<R: BufRead, T: ArkRecord> ArkReader<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
            _record: PhantomData,
        }
    }

    /// Return the underlying stream, positioned after the last record read.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_record(&mut self) -> Result<(String, T)> {
        let key = read_token(&mut self.reader)?;
        let value = T::decode(&mut self.reader)?;
        Ok((key, value))
    }
}

impl<T: ArkRecord> ArkReader<BufReader<File>, T> {
    /// Open an archive file for lazy reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "opened archive");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead, T: ArkRecord> Iterator for ArkReader<R, T> {
    type Item = Result<(String, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.fill_buf() {
            Ok([]) => {
                self.finished = true;
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                self.finished = true;
                return Some(Err(e.into()));
            }
        }

        let record = self.read_record();
        match &record {
            Ok((key, _)) => tracing::debug!(key = key.as_str(), "read archive record"),
            Err(e) => {
                tracing::debug!(error = %e, "archive read aborted");
                self.finished = true;
            }
        }
        Some(record)
    }
}

impl<R: BufRead, T: ArkRecord> FusedIterator for ArkReader<R, T> {}

/// Iterate the records of an archive stream.
pub fn read_ark<T: ArkRecord, R: BufRead>(reader: R) -> ArkReader<R, T> {
    ArkReader::new(reader)
}

/// Open an archive file and iterate its records.
pub fn open_ark<T: ArkRecord>(path: impl AsRef<Path>) -> Result<ArkReader<BufReader<File>, T>> {
    ArkReader::open(path)
}

/// Collect keyed records into an insertion-ordered map.
///
/// Under [`KeyPolicy::LastWins`] a repeated key replaces the earlier value in
/// place; under [`KeyPolicy::Reject`] it aborts with
/// [`FormatError::DuplicateKey`].
pub fn collect_map<T, I>(records: I, policy: KeyPolicy) -> Result<IndexMap<String, T>>
where
    I: IntoIterator<Item = Result<(String, T)>>,
{
    let mut map = IndexMap::new();
    for record in records {
        let (key, value) = record?;
        match policy {
            KeyPolicy::LastWins => {
                if map.insert(key, value).is_some() {
                    tracing::debug!("duplicate key replaced");
                }
            }
            KeyPolicy::Reject => {
                if map.contains_key(&key) {
                    return Err(FormatError::DuplicateKey(key).into());
                }
                map.insert(key, value);
            }
        }
    }
    Ok(map)
}

/// Read a whole archive stream into a map.
pub fn read_ark_map<T: ArkRecord, R: BufRead>(
    reader: R,
    policy: KeyPolicy,
) -> Result<IndexMap<String, T>> {
    collect_map(read_ark(reader), policy)
}

/// Archive writer for matrix records.
pub struct ArkWriter<W: Write> {
    writer: W,
    precision: Precision,
}

impl ArkWriter<BufWriter<File>> {
    /// Create (or truncate) an archive file.
    pub fn create(path: impl AsRef<Path>, precision: Precision) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), ?precision, "created archive");
        Ok(Self::new(BufWriter::new(file), precision))
    }
}

impl<W: Write> ArkWriter<W> {
    pub fn new(writer: W, precision: Precision) -> Self {
        Self { writer, precision }
    }

    /// Write one matrix using the writer's precision.
    pub fn write_matrix(&mut self, key: &str, matrix: &Matrix) -> Result<()> {
        match (self.precision, matrix) {
            (Precision::Keep | Precision::F32, Matrix::F32(m)) => self.write_dense(key, m.view()),
            (Precision::Keep | Precision::F64, Matrix::F64(m)) => self.write_dense(key, m.view()),
            (Precision::F32, Matrix::F64(m)) => self.write_dense(key, m.mapv(|v| v as f32).view()),
            (Precision::F64, Matrix::F32(m)) => self.write_dense(key, m.mapv(f64::from).view()),
            (Precision::Compressed, Matrix::F32(m)) => self.write_compressed(key, m.view()),
            (Precision::Compressed, Matrix::F64(m)) => {
                self.write_compressed(key, m.mapv(|v| v as f32).view())
            }
        }
    }

    /// Write one dense `FM`/`DM` record.
    pub fn write_dense<T: Real>(&mut self, key: &str, matrix: ArrayView2<T>) -> Result<()> {
        tracing::trace!(key, shape = ?matrix.dim(), "write dense record");
        encode_matrix(&mut self.writer, key, matrix)
    }

    /// Write one compressed `CM` record.
    pub fn write_compressed(&mut self, key: &str, matrix: ArrayView2<f32>) -> Result<()> {
        tracing::trace!(key, shape = ?matrix.dim(), "write compressed record");
        encode_compressed_matrix(&mut self.writer, key, matrix)
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Write paired keys and matrices as one archive.
///
/// Fails with [`WriteError::LengthMismatch`] before writing anything if the
/// two collections differ in length.
pub fn write_ark<W, K>(
    writer: W,
    keys: &[K],
    matrices: &[Matrix],
    precision: Precision,
) -> Result<W>
where
    W: Write,
    K: AsRef<str>,
{
    if keys.len() != matrices.len() {
        return Err(WriteError::LengthMismatch {
            keys: keys.len(),
            values: matrices.len(),
        }
        .into());
    }

    let mut ark = ArkWriter::new(writer, precision);
    for (key, matrix) in keys.iter().zip(matrices) {
        ark.write_matrix(key.as_ref(), matrix)?;
    }
    ark.finish()
}
