//! Error types for kaldi-io organized by processing stage.

use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use thiserror::Error;

/// Codec error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Stream did not match the expected layout
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Stream uses an encoding this crate does not read
    #[error(transparent)]
    Unsupported(#[from] UnsupportedError),

    /// Model structure error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Archive writing error
    #[error(transparent)]
    Write(#[from] WriteError),

    /// Script file resolution error
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Underlying file or process I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// ndarray-stats min/max error
    #[error(transparent)]
    Stats(#[from] MinMaxError),
}

/// Layout errors: a token, tag or size did not match what the format requires.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Structural token mismatch
    #[error("expected token {expected:?}, found {found:?}")]
    UnexpectedToken { expected: String, found: String },

    /// Token contained a byte outside ASCII
    #[error("non-ASCII byte 0x{byte:02x} in token")]
    NonAsciiToken { byte: u8 },

    /// Negative element count or dimension
    #[error("negative length {0}")]
    NegativeLength(i64),

    /// Integer field wider than the 32 bits the model format allows
    #[error("integer {0} out of 32-bit range")]
    IntRange(i64),

    /// Decoded size arithmetic left the platform integer range
    #[error("{0} overflows")]
    Overflow(&'static str),

    /// Archive key seen twice under the reject policy
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Decoded dimensions do not fit the decoded data
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Encodings that are recognized as out of scope.
#[derive(Debug, Error)]
pub enum UnsupportedError {
    /// Binary marker missing, the stream is text mode
    #[error("text-mode input is not supported (missing binary marker)")]
    TextMode,

    /// Integer width byte other than 4 or 8
    #[error("unsupported integer width: {0} bytes")]
    IntWidth(u8),

    /// Float width byte other than 4 or 8
    #[error("unsupported float width: {0} bytes")]
    FloatWidth(u8),

    /// Element size byte differs from the expected element type
    #[error("element size mismatch: expected {expected} bytes, found {found}")]
    ElementSize { expected: u8, found: u8 },

    /// Unknown matrix type token in an archive record
    #[error("unknown matrix format: {0:?}")]
    MatrixType(String),

    /// Unknown tagged array code
    #[error("unknown array type: {0:?}")]
    ArrayTag(String),
}

/// Acoustic model structure errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Component kind tag not in the registry
    #[error("unknown component kind: {0}")]
    UnknownComponent(String),

    /// Transition tuple block tag was neither `<Triples>` nor `<Tuples>`
    #[error("unknown transition tuple block: {0:?}")]
    TupleTag(String),

    /// Splice component context was neither a range nor a list
    #[error("unknown splice context token: {0:?}")]
    SpliceContext(String),
}

/// Archive writing errors.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Paired key/value collections of different length
    #[error("got {keys} keys but {values} values")]
    LengthMismatch { keys: usize, values: usize },

    /// Compressed encoding needs at least one element
    #[error("cannot compress an empty matrix")]
    EmptyMatrix,
}

/// Script file resolution errors.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Command finished with a non-zero status
    #[error("command {command:?} failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    /// Pipe entry with nothing before the `|`
    #[error("empty command in script entry")]
    EmptyCommand,
}

/// Result type alias for kaldi-io operations.
pub type Result<T> = std::result::Result<T, Error>;

// Nested From implementations for automatic error conversion chains

// ShapeError → FormatError → Error
impl From<ShapeError> for Error {
    fn from(e: ShapeError) -> Self {
        Error::Format(FormatError::Shape(e))
    }
}
