//! Token lexing and width-prefixed scalar decoding shared by every binary layout.
//!
//! Kaldi binary streams interleave space-terminated ASCII tokens with
//! little-endian scalars. Scalars written through `WriteBasicType` carry a
//! one-byte width prefix (4 or 8); raw element runs inside vectors and
//! matrices do not.

use crate::error::{FormatError, Result, UnsupportedError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, BufRead, Read, Write};

/// Two bytes preceding every binary payload.
pub const BINARY_MARKER: [u8; 2] = [0x00, b'B'];

const TOKEN_DELIMITER: u8 = b' ';

/// Most elements allocated ahead of the bytes that fill them.
const READ_CHUNK: usize = 1 << 16;

mod private {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Fixed-width little-endian element stored as a raw run on disk.
pub trait Element: Copy + Default + std::fmt::Debug + private::Sealed + 'static {
    /// Width in bytes, as written in size-prefix bytes.
    const SIZE: u8;

    /// Fill `dst` from the stream.
    fn read_into<R: Read + ?Sized>(reader: &mut R, dst: &mut [Self]) -> io::Result<()>;

    /// Write every element of `src`.
    fn write_slice<W: Write + ?Sized>(writer: &mut W, src: &[Self]) -> io::Result<()>;
}

impl Element for i32 {
    const SIZE: u8 = 4;

    fn read_into<R: Read + ?Sized>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_i32_into::<LittleEndian>(dst)
    }

    fn write_slice<W: Write + ?Sized>(writer: &mut W, src: &[Self]) -> io::Result<()> {
        src.iter().try_for_each(|&v| writer.write_i32::<LittleEndian>(v))
    }
}

impl Element for i64 {
    const SIZE: u8 = 8;

    fn read_into<R: Read + ?Sized>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_i64_into::<LittleEndian>(dst)
    }

    fn write_slice<W: Write + ?Sized>(writer: &mut W, src: &[Self]) -> io::Result<()> {
        src.iter().try_for_each(|&v| writer.write_i64::<LittleEndian>(v))
    }
}

impl Element for f32 {
    const SIZE: u8 = 4;

    fn read_into<R: Read + ?Sized>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_f32_into::<LittleEndian>(dst)
    }

    fn write_slice<W: Write + ?Sized>(writer: &mut W, src: &[Self]) -> io::Result<()> {
        src.iter().try_for_each(|&v| writer.write_f32::<LittleEndian>(v))
    }
}

impl Element for f64 {
    const SIZE: u8 = 8;

    fn read_into<R: Read + ?Sized>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_f64_into::<LittleEndian>(dst)
    }

    fn write_slice<W: Write + ?Sized>(writer: &mut W, src: &[Self]) -> io::Result<()> {
        src.iter().try_for_each(|&v| writer.write_f64::<LittleEndian>(v))
    }
}

/// Floating element types that have a dense matrix encoding.
pub trait Real: Element {
    /// Archive type token for a dense matrix of this type.
    const MATRIX_TOKEN: &'static str;
}

impl Real for f32 {
    const MATRIX_TOKEN: &'static str = "FM";
}

impl Real for f64 {
    const MATRIX_TOKEN: &'static str = "DM";
}

/// Read a space-terminated ASCII token, consuming the delimiter.
pub fn read_token<R: BufRead + ?Sized>(reader: &mut R) -> Result<String> {
    let mut buf = Vec::with_capacity(16);
    reader.read_until(TOKEN_DELIMITER, &mut buf)?;

    if buf.pop() != Some(TOKEN_DELIMITER) {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "unterminated token").into());
    }

    if let Some(&byte) = buf.iter().find(|b| !b.is_ascii()) {
        return Err(FormatError::NonAsciiToken { byte }.into());
    }

    // ASCII checked above
    Ok(buf.into_iter().map(char::from).collect())
}

/// Read a token and fail unless it equals `expected`.
pub fn expect_token<R: BufRead + ?Sized>(reader: &mut R, expected: &str) -> Result<()> {
    let found = read_token(reader)?;
    if found != expected {
        return Err(FormatError::UnexpectedToken {
            expected: expected.to_string(),
            found,
        }
        .into());
    }
    Ok(())
}

/// Read the `\0B` marker that opens every binary payload.
pub fn check_binary_marker<R: Read + ?Sized>(reader: &mut R) -> Result<()> {
    let mut marker = [0u8; 2];
    reader.read_exact(&mut marker)?;
    if marker != BINARY_MARKER {
        return Err(UnsupportedError::TextMode.into());
    }
    Ok(())
}

/// Read a width-prefixed signed integer (4 or 8 bytes).
pub fn read_int<R: Read + ?Sized>(reader: &mut R) -> Result<i64> {
    match reader.read_u8()? {
        4 => Ok(reader.read_i32::<LittleEndian>()? as i64),
        8 => Ok(reader.read_i64::<LittleEndian>()?),
        width => Err(UnsupportedError::IntWidth(width).into()),
    }
}

/// Read a width-prefixed IEEE float (4 or 8 bytes).
pub fn read_float<R: Read + ?Sized>(reader: &mut R) -> Result<f64> {
    match reader.read_u8()? {
        4 => Ok(reader.read_f32::<LittleEndian>()? as f64),
        8 => Ok(reader.read_f64::<LittleEndian>()?),
        width => Err(UnsupportedError::FloatWidth(width).into()),
    }
}

/// Read a width-prefixed integer used as a count or dimension.
pub fn read_len<R: Read + ?Sized>(reader: &mut R) -> Result<usize> {
    let value = read_int(reader)?;
    usize::try_from(value).map_err(|_| FormatError::NegativeLength(value).into())
}

/// Capacity to reserve for `len` elements decoded from the stream.
pub fn initial_capacity(len: usize) -> usize {
    len.min(READ_CHUNK)
}

/// `rows * cols`, failing instead of wrapping.
pub fn element_count(rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols)
        .ok_or_else(|| FormatError::Overflow("element count").into())
}

/// Read `len` values with `fill`, growing the buffer one chunk at a time.
///
/// A length field from a corrupt stream ends in an EOF error once the data
/// runs out, never in one oversized allocation.
pub fn read_chunked<T, R, F>(reader: &mut R, len: usize, mut fill: F) -> Result<Vec<T>>
where
    T: Copy + Default,
    R: Read + ?Sized,
    F: FnMut(&mut R, &mut [T]) -> io::Result<()>,
{
    let mut data = Vec::with_capacity(initial_capacity(len));
    while data.len() < len {
        let start = data.len();
        data.resize(start + (len - start).min(READ_CHUNK), T::default());
        fill(reader, &mut data[start..])?;
    }
    Ok(data)
}

/// Read `len` raw elements.
pub fn read_elements<T: Element, R: Read + ?Sized>(
    reader: &mut R,
    len: usize,
) -> Result<Vec<T>> {
    read_chunked(reader, len, |r, dst| T::read_into(r, dst))
}

/// Read a size-checked vector: element size byte, i32 length, raw elements.
pub fn read_typed_vector<T: Element, R: Read + ?Sized>(reader: &mut R) -> Result<Vec<T>> {
    let found = reader.read_u8()?;
    if found != T::SIZE {
        return Err(UnsupportedError::ElementSize {
            expected: T::SIZE,
            found,
        }
        .into());
    }

    let len = reader.read_i32::<LittleEndian>()?;
    let len = usize::try_from(len).map_err(|_| FormatError::NegativeLength(len as i64))?;
    read_elements(reader, len)
}

/// Write a token followed by its space delimiter.
pub fn write_token<W: Write + ?Sized>(writer: &mut W, token: &str) -> Result<()> {
    writer.write_all(token.as_bytes())?;
    writer.write_u8(TOKEN_DELIMITER)?;
    Ok(())
}

/// Write the `\0B` binary marker.
pub fn write_binary_marker<W: Write + ?Sized>(writer: &mut W) -> Result<()> {
    writer.write_all(&BINARY_MARKER)?;
    Ok(())
}

/// Write a 4-byte width-prefixed integer.
pub fn write_int<W: Write + ?Sized>(writer: &mut W, value: i32) -> Result<()> {
    writer.write_u8(<i32 as Element>::SIZE)?;
    writer.write_i32::<LittleEndian>(value)?;
    Ok(())
}

/// Write a width-prefixed float of the element's own width.
pub fn write_float<T: Real, W: Write + ?Sized>(writer: &mut W, value: T) -> Result<()> {
    writer.write_u8(T::SIZE)?;
    T::write_slice(writer, &[value])?;
    Ok(())
}
