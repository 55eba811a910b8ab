//! Translation between Arrow schemas and storage table descriptions.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use snafu::prelude::*;

use crate::dtype::{memory_to_storage, storage_to_memory};
use crate::error::{HdfResult, StorageSnafu, UnsupportedTypeSnafu};
use crate::storage::{StorageKind, TableDescription};

/// Build the table description for a frame schema.
///
/// Each column's declared position equals its index in `schema`, which fixes
/// the physical record layout to the frame's column order.
pub fn build_table_description(schema: &Schema) -> HdfResult<TableDescription> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(pos, field)| {
            let column = memory_to_storage(field.data_type()).context(UnsupportedTypeSnafu {
                column: field.name().clone(),
            })?;
            Ok((field.name().clone(), column.at(pos)))
        })
        .collect::<HdfResult<Vec<_>>>()?;
    TableDescription::new(columns).context(StorageSnafu)
}

/// Build the Arrow field for one declared column (or an array leaf's element).
pub fn build_field(name: &str, kind: StorageKind) -> HdfResult<Field> {
    let data_type = storage_to_memory(kind).context(UnsupportedTypeSnafu { column: name })?;
    Ok(Field::new(name, data_type, false))
}

/// Build the frame schema for a leaf's declared column kinds, in order.
pub fn build_schema(coltypes: &[(String, StorageKind)]) -> HdfResult<SchemaRef> {
    let fields = coltypes
        .iter()
        .map(|(name, kind)| build_field(name, *kind))
        .collect::<HdfResult<Vec<_>>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::{DataType, TimeUnit};

    use super::*;
    use crate::dtype::STRING_ITEMSIZE;
    use crate::error::HdfError;

    #[test]
    fn positions_follow_schema_order() {
        let schema = Schema::new(vec![
            Field::new("date", DataType::Time32(TimeUnit::Second), false),
            Field::new("city", DataType::Utf8, false),
            Field::new("aqi", DataType::Int64, false),
        ]);
        let description = build_table_description(&schema).unwrap();
        let declared: Vec<_> = description
            .columns()
            .iter()
            .map(|(name, d)| (name.as_str(), d.kind, d.pos))
            .collect();
        assert_eq!(
            declared,
            vec![
                ("date", StorageKind::Time32, 0),
                ("city", StorageKind::String, 1),
                ("aqi", StorageKind::Int64, 2),
            ]
        );
        assert_eq!(description.get("city").unwrap().itemsize, STRING_ITEMSIZE);
    }

    #[test]
    fn unsupported_column_is_named() {
        let schema = Schema::new(vec![
            Field::new("ok", DataType::Int8, false),
            Field::new("when", DataType::Date32, false),
        ]);
        let err = build_table_description(&schema).unwrap_err();
        assert!(matches!(err, HdfError::UnsupportedType { ref column, .. } if column == "when"));
    }

    #[test]
    fn read_schema_keeps_declared_order() {
        let schema = build_schema(&[
            ("net_worth".to_string(), StorageKind::Float64),
            ("name".to_string(), StorageKind::String),
            ("seen".to_string(), StorageKind::Time64),
        ])
        .unwrap();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["net_worth", "name", "seen"]);
        assert_eq!(
            schema.field(2).data_type(),
            &DataType::Time64(TimeUnit::Microsecond)
        );

        let err = build_schema(&[("z".to_string(), StorageKind::Complex128)]).unwrap_err();
        assert!(matches!(err, HdfError::UnsupportedType { ref column, .. } if column == "z"));
    }
}
