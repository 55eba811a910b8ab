//! Packed fixed-width row records.
//!
//! A table leaf stores each row as one record of `record_size` bytes. Columns
//! are laid out by ascending declared position; a column's byte offset is the
//! sum of the itemsizes of every column with a lower position. All numbers are
//! little-endian. Strings are raw UTF-8 padded with NUL bytes up to the column
//! itemsize.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, FixedSizeBinaryArray, Float32Array, Float64Array, Int8Array,
    Int16Array, Int32Array, Int64Array, StringArray, UInt8Array, UInt16Array, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::DataType;
use bytes::{Buf, BufMut};
use snafu::prelude::*;

use crate::storage::error::{
    ArrowSnafu, InvalidStringSnafu, StorageError, StorageResult, ValueTooWideSnafu,
};
use crate::storage::kind::{StorageKind, TableDescription};
use crate::storage::value::Value;

/// One column placed inside the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LayoutColumn {
    pub(crate) name: String,
    pub(crate) kind: StorageKind,
    pub(crate) itemsize: usize,
    pub(crate) offset: usize,
}

/// Byte layout of a table's row record, columns in declared position order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordLayout {
    columns: Vec<LayoutColumn>,
    record_size: usize,
}

impl RecordLayout {
    /// Place the columns of a validated description; its record size bounds
    /// every offset.
    pub(crate) fn new(description: &TableDescription) -> Self {
        let mut by_pos: Vec<_> = description.columns().iter().collect();
        by_pos.sort_by_key(|(_, desc)| desc.pos);

        let mut offset = 0;
        let columns = by_pos
            .into_iter()
            .map(|(name, desc)| {
                let col = LayoutColumn {
                    name: name.clone(),
                    kind: desc.kind,
                    itemsize: desc.itemsize,
                    offset,
                };
                offset += desc.itemsize;
                col
            })
            .collect();

        debug_assert_eq!(offset, description.record_size());
        RecordLayout {
            columns,
            record_size: description.record_size(),
        }
    }

    pub(crate) fn columns(&self) -> &[LayoutColumn] {
        &self.columns
    }

    pub(crate) fn record_size(&self) -> usize {
        self.record_size
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Arrow type used for the raw, not yet reinterpreted, values of a kind.
pub(crate) fn physical_data_type(kind: StorageKind, itemsize: usize) -> DataType {
    match kind {
        StorageKind::Bool => DataType::Boolean,
        StorageKind::Int8 => DataType::Int8,
        StorageKind::Int16 => DataType::Int16,
        StorageKind::Int32 | StorageKind::Time32 => DataType::Int32,
        StorageKind::Int64 => DataType::Int64,
        StorageKind::UInt8 => DataType::UInt8,
        StorageKind::UInt16 => DataType::UInt16,
        StorageKind::UInt32 => DataType::UInt32,
        StorageKind::UInt64 => DataType::UInt64,
        StorageKind::Float32 => DataType::Float32,
        StorageKind::Float64 | StorageKind::Time64 => DataType::Float64,
        StorageKind::String => DataType::Utf8,
        StorageKind::Complex64 | StorageKind::Complex128 => {
            DataType::FixedSizeBinary(itemsize as i32)
        }
    }
}

fn mismatch(column: &str, kind: StorageKind, value: &Value) -> StorageError {
    StorageError::ValueTypeMismatch {
        column: column.to_string(),
        kind,
        value: value.to_string(),
    }
}

fn out_of_range(column: &str, kind: StorageKind, value: &Value) -> StorageError {
    StorageError::ValueOutOfRange {
        column: column.to_string(),
        kind,
        value: value.to_string(),
    }
}

/// Narrow an integral value to the target type, accepting either sign variant.
macro_rules! narrow_int {
    ($ty:ty, $value:expr, $column:expr, $kind:expr) => {
        match $value {
            Value::Int(v) => <$ty>::try_from(*v).map_err(|_| out_of_range($column, $kind, $value)),
            Value::UInt(v) => <$ty>::try_from(*v).map_err(|_| out_of_range($column, $kind, $value)),
            other => Err(mismatch($column, $kind, other)),
        }
    };
}

fn as_f64(column: &str, kind: StorageKind, value: &Value) -> StorageResult<f64> {
    match value {
        Value::Float(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        Value::UInt(v) => Ok(*v as f64),
        other => Err(mismatch(column, kind, other)),
    }
}

/// Encode `value` into `dst`, which must be exactly `itemsize` bytes.
pub(crate) fn encode_value(
    mut dst: &mut [u8],
    kind: StorageKind,
    itemsize: usize,
    column: &str,
    value: &Value,
) -> StorageResult<()> {
    match kind {
        StorageKind::Bool => match value {
            Value::Bool(b) => dst.put_u8(u8::from(*b)),
            other => return Err(mismatch(column, kind, other)),
        },
        StorageKind::Int8 => dst.put_i8(narrow_int!(i8, value, column, kind)?),
        StorageKind::Int16 => dst.put_i16_le(narrow_int!(i16, value, column, kind)?),
        StorageKind::Int32 | StorageKind::Time32 => {
            dst.put_i32_le(narrow_int!(i32, value, column, kind)?)
        }
        StorageKind::Int64 => dst.put_i64_le(narrow_int!(i64, value, column, kind)?),
        StorageKind::UInt8 => dst.put_u8(narrow_int!(u8, value, column, kind)?),
        StorageKind::UInt16 => dst.put_u16_le(narrow_int!(u16, value, column, kind)?),
        StorageKind::UInt32 => dst.put_u32_le(narrow_int!(u32, value, column, kind)?),
        StorageKind::UInt64 => dst.put_u64_le(narrow_int!(u64, value, column, kind)?),
        StorageKind::Float32 => dst.put_f32_le(as_f64(column, kind, value)? as f32),
        StorageKind::Float64 | StorageKind::Time64 => {
            dst.put_f64_le(as_f64(column, kind, value)?)
        }
        StorageKind::String => {
            let Value::Str(s) = value else {
                return Err(mismatch(column, kind, value));
            };
            let raw = s.as_bytes();
            ensure!(
                raw.len() <= itemsize,
                ValueTooWideSnafu {
                    column,
                    len: raw.len(),
                    itemsize,
                }
            );
            dst.put_slice(raw);
            dst.put_bytes(0, itemsize - raw.len());
        }
        StorageKind::Complex64 => match value {
            Value::Complex { re, im } => {
                dst.put_f32_le(*re as f32);
                dst.put_f32_le(*im as f32);
            }
            other => return Err(mismatch(column, kind, other)),
        },
        StorageKind::Complex128 => match value {
            Value::Complex { re, im } => {
                dst.put_f64_le(*re);
                dst.put_f64_le(*im);
            }
            other => return Err(mismatch(column, kind, other)),
        },
    }
    Ok(())
}

/// Gather one field out of a run of packed records.
///
/// `stride` is the record size (the itemsize for array leaves), `offset` the
/// field's position inside the record and `rows` the record indices to read,
/// in output order. Callers guarantee every index is within `data`.
pub(crate) fn decode_column(
    data: &[u8],
    stride: usize,
    offset: usize,
    kind: StorageKind,
    itemsize: usize,
    column: &str,
    rows: &[usize],
) -> StorageResult<ArrayRef> {
    let start = |row: usize| row * stride + offset;

    macro_rules! gather {
        ($array:ty, $get:ident) => {
            Arc::new(<$array>::from(
                rows.iter()
                    .map(|&row| {
                        let mut src = &data[start(row)..];
                        src.$get()
                    })
                    .collect::<Vec<_>>(),
            )) as ArrayRef
        };
    }

    let array = match kind {
        StorageKind::Bool => Arc::new(BooleanArray::from(
            rows.iter().map(|&row| data[start(row)] != 0).collect::<Vec<_>>(),
        )) as ArrayRef,
        StorageKind::Int8 => gather!(Int8Array, get_i8),
        StorageKind::Int16 => gather!(Int16Array, get_i16_le),
        StorageKind::Int32 | StorageKind::Time32 => gather!(Int32Array, get_i32_le),
        StorageKind::Int64 => gather!(Int64Array, get_i64_le),
        StorageKind::UInt8 => gather!(UInt8Array, get_u8),
        StorageKind::UInt16 => gather!(UInt16Array, get_u16_le),
        StorageKind::UInt32 => gather!(UInt32Array, get_u32_le),
        StorageKind::UInt64 => gather!(UInt64Array, get_u64_le),
        StorageKind::Float32 => gather!(Float32Array, get_f32_le),
        StorageKind::Float64 | StorageKind::Time64 => gather!(Float64Array, get_f64_le),
        StorageKind::String => {
            let values = rows
                .iter()
                .map(|&row| {
                    let raw = &data[start(row)..start(row) + itemsize];
                    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                    std::str::from_utf8(&raw[..end])
                        .ok()
                        .context(InvalidStringSnafu { column })
                })
                .collect::<StorageResult<Vec<_>>>()?;
            Arc::new(StringArray::from(values)) as ArrayRef
        }
        StorageKind::Complex64 | StorageKind::Complex128 => {
            let array = FixedSizeBinaryArray::try_from_sparse_iter_with_size(
                rows.iter()
                    .map(|&row| Some(&data[start(row)..start(row) + itemsize])),
                itemsize as i32,
            )
            .context(ArrowSnafu)?;
            Arc::new(array) as ArrayRef
        }
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{Float64Type, Int16Type};

    use super::*;
    use crate::storage::kind::ColumnType;

    fn layout() -> RecordLayout {
        let desc = TableDescription::new(vec![
            (
                "aqi".to_string(),
                ColumnType::fixed(StorageKind::Int16).unwrap().at(1),
            ),
            ("city".to_string(), ColumnType::string(6).at(0)),
            (
                "ts".to_string(),
                ColumnType::fixed(StorageKind::Time64).unwrap().at(2),
            ),
        ])
        .unwrap();
        RecordLayout::new(&desc)
    }

    #[test]
    fn offsets_follow_declared_position() {
        let layout = layout();
        let names: Vec<_> = layout.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["city", "aqi", "ts"]);
        let offsets: Vec<_> = layout.columns().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, [0, 6, 8]);
        assert_eq!(layout.record_size(), 16);
    }

    #[test]
    fn records_decode_per_column() {
        let layout = layout();
        let rows = [
            (Value::Str("Denver".into()), Value::Int(412), Value::Float(1.5)),
            (Value::Str("BA".into()), Value::Int(-35), Value::Float(2.25)),
        ];
        let mut data = vec![0u8; layout.record_size() * rows.len()];
        for (i, (city, aqi, ts)) in rows.iter().enumerate() {
            let record = &mut data[i * 16..(i + 1) * 16];
            for (col, value) in layout.columns().iter().zip([city, aqi, ts]) {
                encode_value(
                    &mut record[col.offset..col.offset + col.itemsize],
                    col.kind,
                    col.itemsize,
                    &col.name,
                    value,
                )
                .unwrap();
            }
        }

        let city = decode_column(&data, 16, 0, StorageKind::String, 6, "city", &[1, 0]).unwrap();
        assert_eq!(city.as_string::<i32>().value(0), "BA");
        assert_eq!(city.as_string::<i32>().value(1), "Denver");

        let aqi = decode_column(&data, 16, 6, StorageKind::Int16, 2, "aqi", &[0, 1]).unwrap();
        assert_eq!(aqi.as_primitive::<Int16Type>().values().to_vec(), vec![412, -35]);

        let ts = decode_column(&data, 16, 8, StorageKind::Time64, 8, "ts", &[0, 1]).unwrap();
        assert_eq!(ts.as_primitive::<Float64Type>().values().to_vec(), vec![1.5, 2.25]);
        assert_eq!(ts.len(), 2);
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut buf = [0u8; 4];
        let err = encode_value(
            &mut buf,
            StorageKind::String,
            4,
            "city",
            &Value::Str("Buenos Aires".into()),
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::ValueTooWide { len: 12, itemsize: 4, .. }));
    }

    #[test]
    fn narrowing_checks_range_and_variant() {
        let mut buf = [0u8; 1];
        let err = encode_value(&mut buf, StorageKind::Int8, 1, "x", &Value::Int(300)).unwrap_err();
        assert!(matches!(err, StorageError::ValueOutOfRange { .. }));

        let err =
            encode_value(&mut buf, StorageKind::UInt8, 1, "x", &Value::Int(-1)).unwrap_err();
        assert!(matches!(err, StorageError::ValueOutOfRange { .. }));

        let err = encode_value(&mut buf, StorageKind::Bool, 1, "x", &Value::Int(1)).unwrap_err();
        assert!(matches!(err, StorageError::ValueTypeMismatch { .. }));
    }
}
