//! Error types for the flatlens-core library.
//!
//! Two families live here. [`Error`] covers I/O and schema loading and is
//! built with `thiserror` like any library error. [`VerifyError`] is the
//! small, `Copy` taxonomy of reasons a buffer fails verification; it never
//! allocates, so the verifier's hot path stays allocation-free.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for flatlens operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for verification primitives
pub type VerifyResult<T> = std::result::Result<T, VerifyError>;

/// Error type for schema loading and file handling
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A binary schema is not a well-formed reflection buffer
    #[error("binary schema failed verification: {source}")]
    SchemaVerification {
        /// What the verifier rejected
        #[source]
        source: VerifyError,
    },

    /// A schema is structurally inconsistent
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

impl Error {
    /// Create a file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid schema error
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Returns true if the failure concerns one input and the next can
    /// still be processed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::FileRead { .. })
    }
}

impl From<VerifyError> for Error {
    fn from(source: VerifyError) -> Self {
        Self::SchemaVerification { source }
    }
}

/// Why a buffer failed verification.
///
/// Offsets are absolute positions in the buffer being verified.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyError {
    /// A read would leave the buffer
    #[error("range at {offset} of {length} bytes is outside the buffer")]
    OutOfBounds {
        /// Start of the range
        offset: usize,
        /// Length of the range
        length: usize,
    },

    /// A scalar is not aligned to its size
    #[error("offset {offset} is not aligned to {align} bytes")]
    Misaligned {
        /// Position of the value
        offset: usize,
        /// Required alignment
        align: usize,
    },

    /// Tables nest deeper than allowed
    #[error("table nesting exceeds the depth limit of {max_depth}")]
    RecursionLimitExceeded {
        /// Configured limit
        max_depth: usize,
    },

    /// More tables visited than allowed
    #[error("buffer visits more than {max_tables} tables")]
    TableCountExceeded {
        /// Configured limit
        max_tables: usize,
    },

    /// A uoffset is zero and would point at itself
    #[error("uoffset at {offset} is zero")]
    ZeroOrSelfOffset {
        /// Position of the uoffset
        offset: usize,
    },

    /// A uoffset has its sign bit set
    #[error("uoffset at {offset} has its sign bit set")]
    OffsetSignWrap {
        /// Position of the uoffset
        offset: usize,
    },

    /// A vtable's size field is too small or odd
    #[error("vtable at {offset} is malformed")]
    CorruptVTable {
        /// Position of the vtable
        offset: usize,
    },

    /// A vector or string length exceeds what the buffer size allows
    #[error("length {length} at {offset} exceeds the maximum buffer size")]
    LengthOverflow {
        /// Position of the length prefix
        offset: usize,
        /// Declared element count
        length: u64,
    },

    /// A string is not followed by a NUL byte
    #[error("string ending at {offset} is missing its NUL terminator")]
    MissingTerminator {
        /// Position where the terminator should be
        offset: usize,
    },

    /// A union value and its discriminant disagree
    #[error("union at {offset} has an inconsistent discriminant")]
    InvalidUnionDiscriminant {
        /// Position of the union value or type field
        offset: usize,
    },

    /// A required field is absent
    #[error("required field {id} of table at {offset} is not present")]
    MissingRequiredField {
        /// Position of the table
        offset: usize,
        /// Field id
        id: u16,
    },

    /// The file identifier does not match the expected one
    #[error("file identifier at {offset} does not match")]
    IdentifierMismatch {
        /// Position of the identifier
        offset: usize,
    },

    /// The size prefix disagrees with the buffer length
    #[error("size prefix {prefix} does not match the {length} bytes that follow it")]
    SizePrefixMismatch {
        /// Declared size
        prefix: usize,
        /// Actual bytes after the prefix
        length: usize,
    },

    /// The buffer is larger than the offset width can address
    #[error("buffer of {size} bytes exceeds the maximum of {max}")]
    BufferTooLarge {
        /// Buffer length
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// The schema has no root table to start from
    #[error("schema does not declare a root table")]
    MissingRootType,
}

impl VerifyError {
    /// Whether this error comes from a resource limit rather than malformed data
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::RecursionLimitExceeded { .. }
                | Self::TableCountExceeded { .. }
                | Self::BufferTooLarge { .. }
        )
    }
}
