//! Bidirectional mapping between storage kinds and Arrow data types.
//!
//! The correspondence is closed: every [`StorageKind`] is handled by an
//! exhaustive `match` (the two complex kinds are explicitly unsupported), and
//! the reverse direction accepts exactly the Arrow types the forward
//! direction produces.

use arrow::datatypes::{DataType, TimeUnit};
use snafu::prelude::*;

use crate::storage::{ColumnType, StorageKind};

/// Byte capacity of every string column written by this crate.
///
/// This is a provisional stand-in for variable-width strings: the capacity is
/// fixed rather than measured from the data, and values whose UTF-8 encoding
/// is longer are rejected by the storage layer at write time.
pub const STRING_ITEMSIZE: usize = 1000;

/// Errors raised when a type has no counterpart on the other side.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum TypeMapError {
    /// The storage kind has no Arrow counterpart.
    #[snafu(display("Storage kind {kind} has no in-memory counterpart"))]
    UnsupportedStorageKind {
        /// The offending kind.
        kind: StorageKind,
    },

    /// The Arrow type has no storage counterpart.
    #[snafu(display("Data type {data_type} has no storage counterpart"))]
    UnsupportedDataType {
        /// The offending type.
        data_type: DataType,
    },
}

/// Map a declared storage kind to the Arrow type the reader produces.
pub fn storage_to_memory(kind: StorageKind) -> Result<DataType, TypeMapError> {
    let data_type = match kind {
        StorageKind::Bool => DataType::Boolean,
        StorageKind::Int8 => DataType::Int8,
        StorageKind::Int16 => DataType::Int16,
        StorageKind::Int32 => DataType::Int32,
        StorageKind::Int64 => DataType::Int64,
        StorageKind::UInt8 => DataType::UInt8,
        StorageKind::UInt16 => DataType::UInt16,
        StorageKind::UInt32 => DataType::UInt32,
        StorageKind::UInt64 => DataType::UInt64,
        StorageKind::Float32 => DataType::Float32,
        StorageKind::Float64 => DataType::Float64,
        StorageKind::String => DataType::Utf8,
        StorageKind::Time32 => DataType::Time32(TimeUnit::Second),
        StorageKind::Time64 => DataType::Time64(TimeUnit::Microsecond),
        StorageKind::Complex64 | StorageKind::Complex128 => {
            return UnsupportedStorageKindSnafu { kind }.fail();
        }
    };
    Ok(data_type)
}

/// Map an Arrow type to the storage column type the writer declares.
///
/// `Utf8` maps to a string column of [`STRING_ITEMSIZE`] bytes.
pub fn memory_to_storage(data_type: &DataType) -> Result<ColumnType, TypeMapError> {
    let kind = match data_type {
        DataType::Boolean => StorageKind::Bool,
        DataType::Int8 => StorageKind::Int8,
        DataType::Int16 => StorageKind::Int16,
        DataType::Int32 => StorageKind::Int32,
        DataType::Int64 => StorageKind::Int64,
        DataType::UInt8 => StorageKind::UInt8,
        DataType::UInt16 => StorageKind::UInt16,
        DataType::UInt32 => StorageKind::UInt32,
        DataType::UInt64 => StorageKind::UInt64,
        DataType::Float32 => StorageKind::Float32,
        DataType::Float64 => StorageKind::Float64,
        DataType::Time32(TimeUnit::Second) => StorageKind::Time32,
        DataType::Time64(TimeUnit::Microsecond) => StorageKind::Time64,
        DataType::Utf8 => return Ok(ColumnType::string(STRING_ITEMSIZE)),
        other => {
            return UnsupportedDataTypeSnafu {
                data_type: other.clone(),
            }
            .fail();
        }
    };
    ColumnType::fixed(kind).context(UnsupportedDataTypeSnafu {
        data_type: data_type.clone(),
    })
}
