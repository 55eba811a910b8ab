//! Write pipeline: describe the frame, create the table, stream its rows.

use std::path::Path;

use arrow::array::RecordBatch;
use log::debug;
use snafu::prelude::*;

use crate::error::{FileOpenSnafu, HdfResult, LeafAlreadyExistsSnafu};
use crate::frame::FrameRows;
use crate::group_path::resolve;
use crate::schema::build_table_description;
use crate::storage::{H5File, StorageError, StorageOptions};

/// Write `frame` as the table leaf `table` of `group` into an already open
/// file, creating missing groups on the way. Returns the number of rows
/// written.
///
/// Rows are streamed one at a time in frame order. If any row fails, the
/// table is removed again and the error is returned. An existing leaf named
/// `table` yields
/// [`HdfError::LeafAlreadyExists`](crate::HdfError::LeafAlreadyExists) and is
/// left untouched.
pub fn write_frame(
    file: &mut H5File,
    group: Option<&str>,
    table: &str,
    frame: &RecordBatch,
) -> HdfResult<u64> {
    let description = build_table_description(frame.schema_ref())?;
    let group = resolve(file, group, true)?;
    let group_path = file.group_path(group)?;

    let mut writer = match file.create_table(group, table, description) {
        Ok(writer) => writer,
        Err(StorageError::NodeExists { .. }) => {
            return LeafAlreadyExistsSnafu {
                group: group_path,
                leaf: table,
            }
            .fail();
        }
        Err(source) => return Err(source.into()),
    };

    let schema = frame.schema_ref();
    for row in FrameRows::new(frame) {
        let row = row?;
        for (field, value) in schema.fields().iter().zip(&row) {
            writer.row().set(field.name(), value)?;
        }
        writer.append()?;
    }
    let rows = writer.flush()?;
    debug!("Wrote {rows} rows to {group_path} / {table}");
    Ok(rows)
}

/// Write `frame` as the table leaf `table` into a new file at `path`.
///
/// An existing file at `path` is replaced. The frame's schema is validated
/// before the destination is touched; a failure while streaming rows leaves
/// an empty container behind, never a partially written table.
pub fn write_hdf(
    frame: &RecordBatch,
    table: &str,
    path: impl AsRef<Path>,
    group: Option<&str>,
) -> HdfResult<()> {
    let path = path.as_ref();
    build_table_description(frame.schema_ref())?;

    let open_context = || FileOpenSnafu {
        path: path.display().to_string(),
    };
    let mut file =
        H5File::create_truncate(path, &StorageOptions::default()).context(open_context())?;
    write_frame(&mut file, group, table, frame)?;
    file.close().context(open_context())?;
    Ok(())
}
