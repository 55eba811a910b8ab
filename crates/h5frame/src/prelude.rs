//! Wrapper prelude.
//!
//! The `h5frame` crate is the supported public entry point.
//! Downstream code should prefer importing from this prelude instead of
//! depending on internal core module paths.

pub use crate::storage;
pub use crate::{
    ForeignDecoder, HdfError, HdfResult, ReadOptions, ReadOutput, RowSlice, Series, read_hdf,
    write_hdf,
};
