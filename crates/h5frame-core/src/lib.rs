//! Core engine for moving Arrow record batches in and out of hierarchical
//! table/array files.
//!
//! This crate provides the foundational pieces for `h5frame`:
//!
//! - A closed, bidirectional mapping between storage column kinds and Arrow
//!   data types (`dtype` module).
//! - Group path normalization and resolution, creating missing groups on
//!   write (`group_path` module).
//! - Translation between Arrow schemas and storage table descriptions
//!   (`schema` module).
//! - Row and array extraction with optional predicate and slice (`extract`
//!   module), and assembly of the physical buffers into frames and series
//!   (`frame` module).
//! - The read and write pipelines ([`read_hdf`], [`write_hdf`]), including
//!   detection of groups written by a foreign writer convention.
//! - A single-file hierarchical container backend implementing the storage
//!   primitives those pipelines consume (`storage` module).
//!
//! Higher-level crates are expected to depend on the `h5frame` facade rather
//! than on internal module paths of this crate.
#![deny(missing_docs)]
pub mod dtype;
pub mod error;
pub mod extract;
pub mod frame;
pub mod group_path;
pub mod reader;
pub mod schema;
pub mod storage;
pub mod writer;

pub use error::{BoxError, HdfError, HdfResult};
pub use extract::RowSlice;
pub use frame::{FrameRows, ReadOutput, Series};
pub use reader::{DecodePath, ForeignDecoder, ReadOptions, read_hdf};
pub use writer::{write_frame, write_hdf};
