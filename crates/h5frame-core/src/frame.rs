//! In-memory frame and series containers.
//!
//! A frame is an Arrow [`RecordBatch`]; its schema is the ordered
//! (name, type) mapping and [`FrameRows`] is the row-producing sequence the
//! writer streams from. A [`Series`] is a single named column, produced when
//! an array leaf is read.
//!
//! The assemblers at the bottom turn the physical buffers returned by the
//! storage layer into values of the schema's types. Time columns are the
//! interesting case: `time32` is stored as whole seconds in an `i32` and
//! `time64` as fractional seconds in an `f64`, while the frame carries
//! `Time32(Second)` and `Time64(Microsecond)` respectively.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, RecordBatch, RecordBatchOptions, Time64MicrosecondArray,
};
use arrow::compute::{cast, kernels::arity::unary};
use arrow::datatypes::{
    DataType, Field, FieldRef, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
    Int64Type, SchemaRef, Time32SecondType, Time64MicrosecondType, TimeUnit, UInt8Type,
    UInt16Type, UInt32Type, UInt64Type,
};
use snafu::prelude::*;

use crate::error::{ArrowSnafu, HdfResult, NullValueSnafu, UnsupportedValueSnafu};
use crate::storage::Value;

/// A named single-column container.
#[derive(Debug, Clone)]
pub struct Series {
    field: FieldRef,
    values: ArrayRef,
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.values.as_ref() == other.values.as_ref()
    }
}

impl Series {
    /// Pair `values` with the field describing them.
    pub fn new(field: impl Into<FieldRef>, values: ArrayRef) -> Self {
        Series {
            field: field.into(),
            values,
        }
    }

    /// Series name.
    pub fn name(&self) -> &str {
        self.field.name()
    }

    /// Element type.
    pub fn data_type(&self) -> &DataType {
        self.field.data_type()
    }

    /// The field describing the series.
    pub fn field(&self) -> &FieldRef {
        &self.field
    }

    /// The values.
    pub fn values(&self) -> &ArrayRef {
        &self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the series holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of a read: a frame for table leaves and a series for array leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutput {
    /// Contents of a table leaf (or of a foreign-decoded group).
    Frame(RecordBatch),
    /// Contents of an array leaf.
    Series(Series),
}

impl ReadOutput {
    /// The frame, if this is one.
    pub fn into_frame(self) -> Option<RecordBatch> {
        match self {
            ReadOutput::Frame(batch) => Some(batch),
            ReadOutput::Series(_) => None,
        }
    }

    /// The series, if this is one.
    pub fn into_series(self) -> Option<Series> {
        match self {
            ReadOutput::Series(series) => Some(series),
            ReadOutput::Frame(_) => None,
        }
    }

    /// Row count of the frame or length of the series.
    pub fn len(&self) -> usize {
        match self {
            ReadOutput::Frame(batch) => batch.num_rows(),
            ReadOutput::Series(series) => series.len(),
        }
    }

    /// True when no rows were read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazily yields the rows of a frame as storage values, in row order.
///
/// Only one row is materialized at a time. A null cell yields
/// [`HdfError::NullValue`](crate::HdfError::NullValue), and a column type
/// without a value conversion yields
/// [`HdfError::UnsupportedValue`](crate::HdfError::UnsupportedValue).
#[derive(Debug)]
pub struct FrameRows<'a> {
    batch: &'a RecordBatch,
    row: usize,
}

impl<'a> FrameRows<'a> {
    /// Iterate over the rows of `batch`.
    pub fn new(batch: &'a RecordBatch) -> Self {
        FrameRows { batch, row: 0 }
    }
}

impl Iterator for FrameRows<'_> {
    type Item = HdfResult<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.row >= self.batch.num_rows() {
            return None;
        }
        let row = self.row;
        self.row += 1;
        let schema = self.batch.schema_ref();
        Some(
            self.batch
                .columns()
                .iter()
                .zip(schema.fields())
                .map(|(column, field)| cell(column.as_ref(), field.name(), row))
                .collect(),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.batch.num_rows().saturating_sub(self.row);
        (left, Some(left))
    }
}

fn cell(array: &dyn Array, column: &str, row: usize) -> HdfResult<Value> {
    ensure!(!array.is_null(row), NullValueSnafu { column, row });
    let value = match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::Int8 => Value::Int(array.as_primitive::<Int8Type>().value(row).into()),
        DataType::Int16 => Value::Int(array.as_primitive::<Int16Type>().value(row).into()),
        DataType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Value::UInt(array.as_primitive::<UInt8Type>().value(row).into()),
        DataType::UInt16 => Value::UInt(array.as_primitive::<UInt16Type>().value(row).into()),
        DataType::UInt32 => Value::UInt(array.as_primitive::<UInt32Type>().value(row).into()),
        DataType::UInt64 => Value::UInt(array.as_primitive::<UInt64Type>().value(row)),
        DataType::Float32 => Value::Float(array.as_primitive::<Float32Type>().value(row).into()),
        DataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Value::Str(array.as_string::<i32>().value(row).to_string()),
        DataType::Time32(TimeUnit::Second) => {
            Value::Int(array.as_primitive::<Time32SecondType>().value(row).into())
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            let micros = array.as_primitive::<Time64MicrosecondType>().value(row);
            Value::Float(micros as f64 / 1e6)
        }
        other => {
            return UnsupportedValueSnafu {
                column,
                data_type: other.clone(),
            }
            .fail();
        }
    };
    Ok(value)
}

/// Reinterpret one physical column as the schema type of `field`.
fn reinterpret(physical: &ArrayRef, field: &Field) -> HdfResult<ArrayRef> {
    if physical.data_type() == field.data_type() {
        return Ok(Arc::clone(physical));
    }
    match (physical.data_type(), field.data_type()) {
        (DataType::Float64, DataType::Time64(TimeUnit::Microsecond)) => {
            let seconds = physical.as_primitive::<Float64Type>();
            let micros: Time64MicrosecondArray = unary(seconds, |s| (s * 1e6).round() as i64);
            Ok(Arc::new(micros))
        }
        _ => cast(physical, field.data_type()).context(ArrowSnafu),
    }
}

/// Assemble a frame from a physical table buffer and the translated schema.
///
/// Columns are matched by position; the schema, not the buffer, decides
/// each column's type.
pub fn assemble_frame(schema: SchemaRef, physical: &RecordBatch) -> HdfResult<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .zip(physical.columns())
        .map(|(field, column)| reinterpret(column, field))
        .collect::<HdfResult<Vec<_>>>()?;
    let options = RecordBatchOptions::new().with_row_count(Some(physical.num_rows()));
    RecordBatch::try_new_with_options(schema, columns, &options).context(ArrowSnafu)
}

/// Assemble a series from a physical array buffer and its translated field.
pub fn assemble_series(field: &Field, physical: &ArrayRef) -> HdfResult<Series> {
    let values = reinterpret(physical, field)?;
    Ok(Series::new(field.clone(), values))
}

#[cfg(test)]
mod tests {
    use arrow::array::{Float64Array, Int32Array, Int64Array, StringArray};
    use arrow::datatypes::Schema;

    use super::*;
    use crate::error::HdfError;

    #[test]
    fn rows_come_out_in_order() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("city", DataType::Utf8, false),
            Field::new("aqi", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["Denver", "Buenos Aires"])),
                Arc::new(Int64Array::from(vec![412, 35])),
            ],
        )
        .unwrap();

        let rows: Vec<_> = FrameRows::new(&batch).collect::<HdfResult<_>>().unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Str("Denver".into()), Value::Int(412)],
                vec![Value::Str("Buenos Aires".into()), Value::Int(35)],
            ]
        );
    }

    #[test]
    fn null_cell_is_reported_with_position() {
        let schema = Arc::new(Schema::new(vec![Field::new("aqi", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![Some(1), None]))],
        )
        .unwrap();

        let err = FrameRows::new(&batch)
            .collect::<HdfResult<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(err, HdfError::NullValue { row: 1, .. }));
    }

    #[test]
    fn time_columns_are_reinterpreted() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("date", DataType::Time32(TimeUnit::Second), false),
            Field::new("seen", DataType::Time64(TimeUnit::Microsecond), false),
        ]));
        let physical = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("date", DataType::Int32, false),
                Field::new("seen", DataType::Float64, false),
            ])),
            vec![
                Arc::new(Int32Array::from(vec![3600])),
                Arc::new(Float64Array::from(vec![1.5])),
            ],
        )
        .unwrap();

        let frame = assemble_frame(schema, &physical).unwrap();
        assert_eq!(
            frame.column(0).as_primitive::<Time32SecondType>().values().to_vec(),
            vec![3600]
        );
        assert_eq!(
            frame.column(1).as_primitive::<Time64MicrosecondType>().value(0),
            1_500_000
        );

        let rows: Vec<_> = FrameRows::new(&frame).collect::<HdfResult<_>>().unwrap();
        assert_eq!(rows[0], vec![Value::Int(3600), Value::Float(1.5)]);
    }

    #[test]
    fn series_compare_by_field_and_values() {
        let field = Field::new("ozone_aqi", DataType::Int64, false);
        let physical: ArrayRef = Arc::new(Int64Array::from(vec![12, 14, 17]));

        let series = assemble_series(&field, &physical).unwrap();
        assert_eq!(series, Series::new(field.clone(), Arc::clone(&physical)));
        assert_eq!(
            ReadOutput::Series(series.clone()),
            ReadOutput::Series(series.clone())
        );

        let other_values = Series::new(field.clone(), Arc::new(Int64Array::from(vec![12, 14])));
        assert_ne!(series, other_values);

        let renamed = Series::new(field.with_name("pm25"), physical);
        assert_ne!(series, renamed);
    }
}
