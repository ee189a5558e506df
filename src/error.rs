//! Crate-wide error type.
//!
//! One enum covers the five error classes of the format: I/O failures,
//! structural corruption, out-of-range values, protocol misuse, and the
//! version-newer-than-library warning (which is surfaced through
//! [`crate::context::Registry::take_warning`] rather than this error type,
//! since it does not abort the operation that triggered it).

use std::path::PathBuf;

use crate::header::FileType;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wraps `std::io::Error`, e.g. from `seek`, `read`, `write`, `rename`, `remove`, `open`.
    #[error("io error on {path}: {source}")]
    Io {
        /// The file involved in the failing operation.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The first 128 bytes of a header did not contain the magic substring.
    #[error("{path}: missing \"CZMIL library\" magic in header")]
    MissingMagic {
        /// The file that failed the magic sniff.
        path: PathBuf,
    },

    /// A record's length prefix disagreed with the CIF's recorded size for that ordinal.
    #[error(
        "{file_type:?} record {ordinal}: length prefix {actual} bytes, CIF declared {expected} bytes"
    )]
    CifMismatch {
        /// Which file the mismatch was detected in.
        file_type: FileType,
        /// The record ordinal.
        ordinal: u32,
        /// The byte length found in the record's own length prefix.
        actual: u32,
        /// The byte length the CIF row declared.
        expected: u32,
    },

    /// A supplied value would not fit in its field's declared bit width.
    #[error("field '{field}' value {value} exceeds max {max} for a {bits}-bit field")]
    ValueOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The value that didn't fit.
        value: i64,
        /// `2^bits - 1`.
        max: u64,
        /// The declared bit width.
        bits: u32,
    },

    /// Append was called on a file that already exists and was opened for append-create.
    #[error("{path}: file already exists, cannot create")]
    AlreadyExists {
        /// The path that already existed.
        path: PathBuf,
    },

    /// A mutating operation was attempted on a handle opened read-only.
    #[error("{path}: operation requires a writable handle, but it was opened read-only")]
    ReadOnly {
        /// The read-only handle's path.
        path: PathBuf,
    },

    /// More than `MAX_FILES` handles of a given file type are open at once.
    #[error("too many open files of type {file_type:?} (limit is {limit})")]
    TooManyOpenFiles {
        /// The file type whose table is full.
        file_type: FileType,
        /// The configured limit.
        limit: usize,
    },

    /// A record ordinal outside `[0, number_of_records)` was requested.
    #[error("record {ordinal} out of range (file has {count} records)")]
    InvalidRecordNumber {
        /// The requested ordinal.
        ordinal: u32,
        /// The file's current record count.
        count: u32,
    },

    /// A CPF or CSF append supplied a timestamp not strictly greater than the previous record's.
    #[error(
        "time regression on {file_type:?} append: {timestamp} is not greater than previous {previous}"
    )]
    TimeRegression {
        /// Which file type rejected the regression (CPF or CSF; CWF compensates instead).
        file_type: FileType,
        /// The offending timestamp.
        timestamp: u64,
        /// The previous record's timestamp.
        previous: u64,
    },

    /// An application tag used a name reserved for a known header tag.
    #[error("tag name '{0}' is reserved and cannot be used as an application tag")]
    ReservedTagName(String),

    /// An application tag operation would have produced a header larger than `header_size`.
    #[error("header size {header_size} exceeded while writing tag '{tag}'")]
    HeaderSizeExceeded {
        /// The tag whose addition/update overflowed the header.
        tag: String,
        /// The file's declared header size.
        header_size: u32,
    },

    /// The in-place write of a CPF record changed its packed size, which is not allowed.
    #[error("in-place update of record {ordinal} changed size from {old} to {new} bytes")]
    RecordSizeChanged {
        /// The record ordinal being updated.
        ordinal: u32,
        /// The size recorded in the CIF before the update.
        old: u32,
        /// The size the update would have produced.
        new: u32,
    },

    /// `create_*` was given a path whose extension doesn't match its file type.
    #[error("unrecognized extension for {file_type:?}: {path}")]
    UnknownExtension {
        /// The file type being created.
        file_type: FileType,
        /// The offending path.
        path: PathBuf,
    },

    /// The handle has already been closed.
    #[error("operation attempted on a closed handle")]
    Closed,

    /// The CIF could not be found or rebuilt for a paired CWF/CPF open.
    #[error("{path}: no usable CIF and rescan rebuild failed: {reason}")]
    CifUnavailable {
        /// The base path of the file set.
        path: PathBuf,
        /// Why the rebuild failed.
        reason: String,
    },
}

impl Error {
    /// Wraps an I/O error with the path that was being operated on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
