//! Column kinds and table descriptions understood by the storage layer.
//!
//! A [`StorageKind`] is the physical scalar tag a leaf declares for each of its
//! columns (or for its single element type, in the array case). A
//! [`TableDescription`] is the ordered set of named [`ColumnDescriptor`]s used
//! to lay out one packed row record.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::storage::error::{InvalidDescriptionSnafu, StorageError, StorageResult};

/// Largest itemsize a column or array element may declare.
pub const MAX_ITEMSIZE: usize = 1 << 20;

/// Physical scalar kinds a table column or array element may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One byte, zero is false.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// IEEE-754 single precision.
    Float32,
    /// IEEE-754 double precision.
    Float64,
    /// Fixed-capacity byte string, NUL padded to the column itemsize.
    String,
    /// Whole seconds stored as a signed 32-bit integer.
    Time32,
    /// Fractional seconds stored as a double.
    Time64,
    /// Pair of single precision floats.
    Complex64,
    /// Pair of double precision floats.
    Complex128,
}

impl StorageKind {
    /// Every kind, in declaration order.
    pub const ALL: [StorageKind; 16] = [
        StorageKind::Bool,
        StorageKind::Int8,
        StorageKind::Int16,
        StorageKind::Int32,
        StorageKind::Int64,
        StorageKind::UInt8,
        StorageKind::UInt16,
        StorageKind::UInt32,
        StorageKind::UInt64,
        StorageKind::Float32,
        StorageKind::Float64,
        StorageKind::String,
        StorageKind::Time32,
        StorageKind::Time64,
        StorageKind::Complex64,
        StorageKind::Complex128,
    ];

    /// Canonical lowercase name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            StorageKind::Bool => "bool",
            StorageKind::Int8 => "int8",
            StorageKind::Int16 => "int16",
            StorageKind::Int32 => "int32",
            StorageKind::Int64 => "int64",
            StorageKind::UInt8 => "uint8",
            StorageKind::UInt16 => "uint16",
            StorageKind::UInt32 => "uint32",
            StorageKind::UInt64 => "uint64",
            StorageKind::Float32 => "float32",
            StorageKind::Float64 => "float64",
            StorageKind::String => "string",
            StorageKind::Time32 => "time32",
            StorageKind::Time64 => "time64",
            StorageKind::Complex64 => "complex64",
            StorageKind::Complex128 => "complex128",
        }
    }

    /// Width in bytes of one value, or `None` for strings whose width is
    /// chosen per column.
    pub fn fixed_itemsize(self) -> Option<usize> {
        match self {
            StorageKind::Bool | StorageKind::Int8 | StorageKind::UInt8 => Some(1),
            StorageKind::Int16 | StorageKind::UInt16 => Some(2),
            StorageKind::Int32 | StorageKind::UInt32 | StorageKind::Float32 => Some(4),
            StorageKind::Time32 => Some(4),
            StorageKind::Int64 | StorageKind::UInt64 | StorageKind::Float64 => Some(8),
            StorageKind::Time64 | StorageKind::Complex64 => Some(8),
            StorageKind::Complex128 => Some(16),
            StorageKind::String => None,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a kind name is not one of the canonical names.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("Unknown storage kind name: {name:?}"))]
pub struct ParseStorageKindError {
    /// The rejected name.
    pub name: String,
}

impl FromStr for StorageKind {
    type Err = ParseStorageKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ParseStorageKindError { name: s.to_string() })
    }
}

/// A column kind together with its value width, not yet placed in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType {
    /// Physical kind.
    pub kind: StorageKind,
    /// Bytes per value.
    pub itemsize: usize,
}

impl ColumnType {
    /// Column type for a kind with a fixed width.
    ///
    /// Strings have no intrinsic width; use [`ColumnType::string`] for them.
    pub fn fixed(kind: StorageKind) -> Option<Self> {
        kind.fixed_itemsize()
            .map(|itemsize| ColumnType { kind, itemsize })
    }

    /// Fixed-capacity string column holding at most `itemsize` bytes.
    pub fn string(itemsize: usize) -> Self {
        ColumnType {
            kind: StorageKind::String,
            itemsize,
        }
    }

    /// Place the column at `pos` within the row record.
    pub fn at(self, pos: usize) -> ColumnDescriptor {
        ColumnDescriptor {
            kind: self.kind,
            itemsize: self.itemsize,
            pos,
        }
    }
}

/// A column as declared by a table leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Physical kind.
    pub kind: StorageKind,
    /// Bytes per value.
    pub itemsize: usize,
    /// Declared position inside the packed row record.
    pub pos: usize,
}

/// Ordered, validated set of named columns describing a table leaf.
///
/// Positions must form the permutation `0..n`; the record layout places
/// columns by ascending position, so the position is what decides the byte
/// offset of each field, not the insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    columns: Vec<(String, ColumnDescriptor)>,
    record_size: usize,
}

impl TableDescription {
    /// Validate and build a description.
    pub fn new(columns: Vec<(String, ColumnDescriptor)>) -> StorageResult<Self> {
        let mut seen_pos = vec![false; columns.len()];
        let mut record_size: usize = 0;
        for (i, (name, desc)) in columns.iter().enumerate() {
            ensure!(
                !name.is_empty(),
                InvalidDescriptionSnafu {
                    reason: format!("column #{i} has an empty name"),
                }
            );
            ensure!(
                columns[..i].iter().all(|(other, _)| other != name),
                InvalidDescriptionSnafu {
                    reason: format!("duplicate column name {name:?}"),
                }
            );
            ensure!(
                desc.itemsize > 0,
                InvalidDescriptionSnafu {
                    reason: format!("column {name:?} has zero itemsize"),
                }
            );
            ensure!(
                desc.itemsize <= MAX_ITEMSIZE,
                InvalidDescriptionSnafu {
                    reason: format!(
                        "column {name:?} itemsize {} exceeds {MAX_ITEMSIZE}",
                        desc.itemsize
                    ),
                }
            );
            record_size = record_size.checked_add(desc.itemsize).context(
                InvalidDescriptionSnafu {
                    reason: "row record size overflows",
                },
            )?;
            if let Some(width) = desc.kind.fixed_itemsize() {
                ensure!(
                    desc.itemsize == width,
                    InvalidDescriptionSnafu {
                        reason: format!(
                            "column {name:?} of kind {} must have itemsize {width}, got {}",
                            desc.kind, desc.itemsize
                        ),
                    }
                );
            }
            match seen_pos.get_mut(desc.pos) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(StorageError::InvalidDescription {
                        reason: format!(
                            "column {name:?} has position {} outside 0..{} or shared with another column",
                            desc.pos,
                            columns.len()
                        ),
                    });
                }
            }
        }
        Ok(TableDescription {
            columns,
            record_size,
        })
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> &[(String, ColumnDescriptor)] {
        &self.columns
    }

    /// Look up a column by exact name.
    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, desc)| desc)
    }

    /// Bytes per packed row record.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the description has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for kind in StorageKind::ALL {
            assert_eq!(kind.name().parse::<StorageKind>(), Ok(kind));
        }
        assert!("float16".parse::<StorageKind>().is_err());
    }

    #[test]
    fn description_rejects_duplicate_positions() {
        let int = ColumnType::fixed(StorageKind::Int32).unwrap();
        let err = TableDescription::new(vec![
            ("a".to_string(), int.at(0)),
            ("b".to_string(), int.at(0)),
        ])
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidDescription { .. }));
    }

    #[test]
    fn description_rejects_out_of_range_position() {
        let int = ColumnType::fixed(StorageKind::Int32).unwrap();
        let err = TableDescription::new(vec![("a".to_string(), int.at(1))]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDescription { .. }));
    }

    #[test]
    fn description_rejects_wrong_fixed_width() {
        let bad = ColumnDescriptor {
            kind: StorageKind::Int64,
            itemsize: 4,
            pos: 0,
        };
        let err = TableDescription::new(vec![("a".to_string(), bad)]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDescription { .. }));
    }

    #[test]
    fn description_accepts_permuted_positions() {
        let int = ColumnType::fixed(StorageKind::Int16).unwrap();
        let desc = TableDescription::new(vec![
            ("b".to_string(), int.at(1)),
            ("a".to_string(), ColumnType::string(8).at(0)),
        ])
        .unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc.get("a").map(|d| d.pos), Some(0));
        assert_eq!(desc.record_size(), 10);
    }

    #[test]
    fn description_caps_string_itemsize() {
        let at_cap = TableDescription::new(vec![(
            "s".to_string(),
            ColumnType::string(MAX_ITEMSIZE).at(0),
        )]);
        assert!(at_cap.is_ok());

        let err = TableDescription::new(vec![
            ("a".to_string(), ColumnType::string(usize::MAX / 2 + 1).at(0)),
            ("b".to_string(), ColumnType::string(usize::MAX / 2 + 1).at(1)),
        ])
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidDescription { .. }));
    }
}
