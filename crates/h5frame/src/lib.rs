//! # h5frame
//!
//! Read and write Arrow record batches from hierarchical table/array files.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust,no_run
//! use h5frame::prelude::*;
//!
//! # fn main() -> Result<(), HdfError> {
//! let output = read_hdf(
//!     "air_quality.h5",
//!     &ReadOptions::new()
//!         .with_group("/country/ar")
//!         .with_predicate("aqi > 30")
//!         .with_slice(RowSlice::new(0, 10, 1)),
//! )?;
//! if let Some(frame) = output.into_frame() {
//!     write_hdf(&frame, "air_quality", "copy.h5", Some("/country/ar"))?;
//! }
//! # Ok(())
//! # }
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Storage namespace (wrapper-only).
pub mod storage {
    pub use h5frame_core::storage::{
        AttrValue, ColumnType, H5File, StorageError, StorageKind, StorageOptions,
        TableDescription, Value,
    };
}

pub use h5frame_core::dtype::{
    STRING_ITEMSIZE, TypeMapError, memory_to_storage, storage_to_memory,
};
pub use h5frame_core::reader::{FOREIGN_MARKER_KEYS, is_foreign_group};
pub use h5frame_core::{
    BoxError, DecodePath, ForeignDecoder, FrameRows, HdfError, HdfResult, ReadOptions,
    ReadOutput, RowSlice, Series, read_hdf, write_frame, write_hdf,
};
