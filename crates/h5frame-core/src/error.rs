//! Error types and SNAFU context selectors for the read and write pipelines.
//!
//! `HdfError` is the single error surfaced by [`read_hdf`](crate::read_hdf)
//! and [`write_hdf`](crate::write_hdf). Storage and type-mapping failures are
//! wrapped with enough context (path, group, column) to identify what went
//! wrong without re-deriving it from the source chain.

use arrow::{datatypes::DataType, error::ArrowError};
use snafu::prelude::*;

use crate::dtype::TypeMapError;
use crate::storage::StorageError;

/// Boxed error returned by foreign decoders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// General result type used by the read and write pipelines.
pub type HdfResult<T> = Result<T, HdfError>;

/// Errors from reading or writing a frame.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HdfError {
    /// The file could not be opened, created or flushed.
    #[snafu(display("Cannot open {path}: {source}"))]
    FileOpen {
        /// Path of the file.
        path: String,
        /// Underlying storage error.
        #[snafu(source)]
        source: StorageError,
    },

    /// A group path segment does not exist (read side).
    #[snafu(display("Group {path} not found (missing segment {segment:?})"))]
    GroupNotFound {
        /// The group path as requested.
        path: String,
        /// First segment that could not be found.
        segment: String,
    },

    /// No leaf under the group matches the request.
    #[snafu(display("{}", match requested {
        Some(name) => format!("No leaf named {name:?} under group {group}"),
        None => format!("Group {group} holds no leaves"),
    }))]
    LeafNotFound {
        /// Path of the searched group.
        group: String,
        /// Requested leaf name, if any.
        requested: Option<String>,
    },

    /// A leaf with the target name already exists (write side).
    #[snafu(display("Leaf {leaf:?} already exists under group {group}"))]
    LeafAlreadyExists {
        /// Path of the target group.
        group: String,
        /// The colliding leaf name.
        leaf: String,
    },

    /// A column type has no mapping in the required direction.
    #[snafu(display("Unsupported type for column {column}: {source}"))]
    UnsupportedType {
        /// Column (or array leaf) carrying the type.
        column: String,
        /// The failed mapping.
        source: TypeMapError,
    },

    /// A predicate was malformed or applied to an array leaf.
    #[snafu(display("Invalid predicate {predicate:?} on {leaf}: {reason}"))]
    InvalidPredicate {
        /// The predicate text as supplied.
        predicate: String,
        /// Path of the leaf it was applied to.
        leaf: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A slice step was zero or negative.
    #[snafu(display("Invalid slice step {step}; the step must be positive"))]
    InvalidSlice {
        /// The rejected step.
        step: i64,
    },

    /// A null value was found while streaming rows; fixed-width records
    /// cannot hold nulls.
    #[snafu(display("Column {column} is null at row {row}"))]
    NullValue {
        /// Column holding the null.
        column: String,
        /// Zero-based row index.
        row: usize,
    },

    /// A frame column's values cannot be converted into storage values.
    #[snafu(display("Cannot convert values of column {column} with type {data_type}"))]
    UnsupportedValue {
        /// The column.
        column: String,
        /// Its Arrow type.
        data_type: DataType,
    },

    /// The group carries the foreign-writer marker but no decoder is configured.
    #[snafu(display("Group {group} was written by a foreign writer and no foreign decoder is configured"))]
    ForeignDecoderMissing {
        /// Path of the marked group.
        group: String,
    },

    /// The foreign decoder failed.
    #[snafu(display("Foreign decoder failed on group {group}: {source}"))]
    ForeignDecode {
        /// Group handed to the decoder.
        group: String,
        /// Decoder error.
        source: BoxError,
    },

    /// Any other storage failure.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Arrow compute or conversion error while assembling output.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

impl From<StorageError> for HdfError {
    fn from(source: StorageError) -> Self {
        HdfError::Storage { source }
    }
}
