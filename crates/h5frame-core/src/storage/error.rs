use std::io;

use arrow::error::ArrowError;
use snafu::{Backtrace, prelude::*};

use crate::storage::kind::StorageKind;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while opening, traversing, reading or writing a
/// container file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The container file, or the directory meant to hold it, is missing.
    #[snafu(display("Container file not found: {path}"))]
    NotFound {
        /// Path of the missing file.
        path: String,
        /// Underlying filesystem error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Reading or replacing the container file failed.
    #[snafu(display("I/O error on container file {path}: {source}"))]
    OtherIo {
        /// Path of the container file.
        path: String,
        /// Underlying filesystem error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The file exists but is not a valid container.
    #[snafu(display("Corrupt container file {path}: {reason}"))]
    Corrupt {
        /// The offending file.
        path: String,
        /// What failed to validate.
        reason: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A mutation was attempted on a file opened for reading.
    #[snafu(display("File {path} is open read-only"))]
    ReadOnly {
        /// The read-only file.
        path: String,
    },

    /// Node names must be non-empty and must not contain `/`.
    #[snafu(display("Invalid node name {name:?}"))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A child with the same name already exists under the parent group.
    #[snafu(display("Node {name} already exists under {parent}"))]
    NodeExists {
        /// Path of the parent group.
        parent: String,
        /// The colliding child name.
        name: String,
    },

    /// A path component resolved to a leaf where a group was required.
    #[snafu(display("Node {path} is not a group"))]
    NotAGroup {
        /// Path of the offending node.
        path: String,
    },

    /// A node handle that does not belong to this file (or was discarded).
    #[snafu(display("Invalid node handle #{id}"))]
    InvalidHandle {
        /// Raw handle index.
        id: usize,
    },

    /// A table description failed validation.
    #[snafu(display("Invalid table description: {reason}"))]
    InvalidDescription {
        /// What failed to validate.
        reason: String,
    },

    /// A row buffer was addressed with a column the table does not declare.
    #[snafu(display("Table has no column named {column}"))]
    UnknownColumn {
        /// The unknown column name.
        column: String,
    },

    /// A string value does not fit the column's fixed capacity.
    #[snafu(display(
        "Value of {len} bytes does not fit column {column} (capacity {itemsize} bytes)"
    ))]
    ValueTooWide {
        /// Target column.
        column: String,
        /// Encoded length of the rejected value.
        len: usize,
        /// Column capacity in bytes.
        itemsize: usize,
    },

    /// A numeric value is outside the range of the column kind.
    #[snafu(display("Value {value} is out of range for column {column} of kind {kind}"))]
    ValueOutOfRange {
        /// Target column.
        column: String,
        /// Declared column kind.
        kind: StorageKind,
        /// Rendered value.
        value: String,
    },

    /// A value variant cannot be stored in the column kind at all.
    #[snafu(display("Cannot store {value} in column {column} of kind {kind}"))]
    ValueTypeMismatch {
        /// Target column.
        column: String,
        /// Declared column kind.
        kind: StorageKind,
        /// Rendered value.
        value: String,
    },

    /// A row was committed before every column was assigned.
    #[snafu(display("Row committed without a value for column {column}"))]
    IncompleteRow {
        /// First unassigned column.
        column: String,
    },

    /// A stored string is not valid UTF-8.
    #[snafu(display("Column {column} holds a value that is not valid UTF-8"))]
    InvalidString {
        /// Column holding the bad value.
        column: String,
    },

    /// A row condition failed to parse or to evaluate.
    #[snafu(display("Invalid condition {condition:?}: {reason}"))]
    InvalidCondition {
        /// The condition text as supplied.
        condition: String,
        /// What went wrong.
        reason: String,
    },

    /// Arrow error while materializing or filtering columns.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}
