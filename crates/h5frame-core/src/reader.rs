//! Read pipeline: open, resolve, pick a decode path, extract, assemble.

use std::{collections::BTreeMap, fmt, path::Path, sync::Arc};

use arrow::array::RecordBatch;
use log::{debug, warn};
use snafu::prelude::*;

use crate::error::{
    BoxError, FileOpenSnafu, ForeignDecodeSnafu, ForeignDecoderMissingSnafu, HdfResult,
    LeafNotFoundSnafu,
};
use crate::extract::{RowSlice, extract};
use crate::frame::{ReadOutput, assemble_frame, assemble_series};
use crate::group_path::resolve;
use crate::schema::build_schema;
use crate::storage::{AttrValue, H5File, LeafRef, RawBuffer, StorageOptions};

/// Group attributes marking a group written by the foreign writer convention.
pub const FOREIGN_MARKER_KEYS: [&str; 2] = ["pandas_type", "pandas_version"];

/// Extra-option keys owned by the read call itself; never forwarded to storage.
pub const RESERVED_OPTION_KEYS: [&str; 4] = ["filename", "mode", "root_uep", "title"];

/// Decoder for groups written by the foreign writer convention.
///
/// The decoder receives the file path and the absolute group key and returns
/// the decoded frame. The file is no longer held open by the reader when the
/// decoder runs.
pub trait ForeignDecoder: Send + Sync {
    /// Decode the group at `group` of the file at `path`.
    fn decode(&self, path: &Path, group: &str) -> Result<RecordBatch, BoxError>;
}

impl<F> ForeignDecoder for F
where
    F: Fn(&Path, &str) -> Result<RecordBatch, BoxError> + Send + Sync,
{
    fn decode(&self, path: &Path, group: &str) -> Result<RecordBatch, BoxError> {
        self(path, group)
    }
}

/// Options for [`read_hdf`].
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Group path; `None` reads from the root.
    pub group: Option<String>,
    /// Leaf name; `None` takes the first leaf (smallest name) of the group.
    pub leaf: Option<String>,
    /// Row condition, table leaves only.
    pub predicate: Option<String>,
    /// Row slice, applied after the predicate.
    pub slice: Option<RowSlice>,
    /// `Some(true)` forces the foreign decode path. The foreign marker on a
    /// group selects that path regardless of this flag.
    pub force_foreign: Option<bool>,
    /// Decoder used for foreign-marked groups.
    pub foreign_decoder: Option<Arc<dyn ForeignDecoder>>,
    /// Options forwarded to the storage backend, minus [`RESERVED_OPTION_KEYS`].
    pub extra_options: BTreeMap<String, String>,
}

impl ReadOptions {
    /// Defaults: root group, first leaf, no filter, native decoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `group`.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Read the leaf named `leaf`.
    pub fn with_leaf(mut self, leaf: impl Into<String>) -> Self {
        self.leaf = Some(leaf.into());
        self
    }

    /// Keep only rows satisfying `predicate`.
    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Narrow the result with `slice`.
    pub fn with_slice(mut self, slice: RowSlice) -> Self {
        self.slice = Some(slice);
        self
    }

    /// Set the force-foreign flag.
    pub fn with_force_foreign(mut self, force: bool) -> Self {
        self.force_foreign = Some(force);
        self
    }

    /// Decoder for foreign-marked groups.
    pub fn with_foreign_decoder(mut self, decoder: Arc<dyn ForeignDecoder>) -> Self {
        self.foreign_decoder = Some(decoder);
        self
    }

    /// Add one backend option.
    pub fn with_extra_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_options.insert(key.into(), value.into());
        self
    }

    fn storage_options(&self) -> StorageOptions {
        let mut forwarded = self.extra_options.clone();
        for key in RESERVED_OPTION_KEYS {
            if let Some(value) = forwarded.remove(key) {
                warn!("Ignoring extra option {key}={value}: the key is reserved by the reader");
            }
        }
        StorageOptions::new(forwarded)
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("group", &self.group)
            .field("leaf", &self.leaf)
            .field("predicate", &self.predicate)
            .field("slice", &self.slice)
            .field("force_foreign", &self.force_foreign)
            .field("foreign_decoder", &self.foreign_decoder.is_some())
            .field("extra_options", &self.extra_options)
            .finish()
    }
}

/// True when a group carries a truthy foreign-writer marker attribute.
pub fn is_foreign_group(attrs: &BTreeMap<String, AttrValue>) -> bool {
    FOREIGN_MARKER_KEYS
        .iter()
        .any(|key| attrs.get(*key).is_some_and(AttrValue::is_truthy))
}

/// How a resolved group is decoded.
#[derive(Clone)]
pub enum DecodePath {
    /// Leaves are read and translated by this crate.
    Native,
    /// The whole group is handed to a foreign decoder.
    Foreign(Arc<dyn ForeignDecoder>),
}

impl DecodePath {
    /// Choose the decode path for a group with `attrs`.
    ///
    /// Foreign decoding is selected by a truthy marker or by
    /// `force_foreign == Some(true)`; it needs a decoder.
    pub fn select(
        group: &str,
        attrs: &BTreeMap<String, AttrValue>,
        force_foreign: Option<bool>,
        decoder: Option<&Arc<dyn ForeignDecoder>>,
    ) -> HdfResult<Self> {
        if !(force_foreign == Some(true) || is_foreign_group(attrs)) {
            return Ok(DecodePath::Native);
        }
        let decoder = decoder.context(ForeignDecoderMissingSnafu { group })?;
        Ok(DecodePath::Foreign(Arc::clone(decoder)))
    }
}

impl fmt::Debug for DecodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodePath::Native => f.write_str("Native"),
            DecodePath::Foreign(_) => f.write_str("Foreign(..)"),
        }
    }
}

/// Pick the requested leaf, or the one with the smallest name.
fn select_leaf<'f>(
    group: &str,
    leaves: Vec<LeafRef<'f>>,
    requested: Option<&str>,
) -> HdfResult<LeafRef<'f>> {
    let found = match requested {
        Some(name) => leaves.into_iter().find(|leaf| leaf.name() == name),
        None => leaves.into_iter().min_by(|a, b| a.name().cmp(b.name())),
    };
    found.context(LeafNotFoundSnafu {
        group,
        requested: requested.map(str::to_string),
    })
}

fn read_leaf(leaf: &LeafRef<'_>, options: &ReadOptions) -> HdfResult<ReadOutput> {
    // Translate first so unsupported kinds fail before any data is read.
    let schema = build_schema(&leaf.coltypes())?;
    let buffer = extract(leaf, options.predicate.as_deref(), options.slice.as_ref())?;
    match buffer {
        RawBuffer::Array(values) => Ok(ReadOutput::Series(assemble_series(
            schema.field(0),
            &values,
        )?)),
        RawBuffer::Table(batch) => Ok(ReadOutput::Frame(assemble_frame(schema, &batch)?)),
    }
}

/// Read one leaf (or a foreign-marked group) of the file at `source`.
///
/// Table leaves produce [`ReadOutput::Frame`], array leaves
/// [`ReadOutput::Series`] named after the leaf. The file handle is released
/// on every exit path.
pub fn read_hdf(source: impl AsRef<Path>, options: &ReadOptions) -> HdfResult<ReadOutput> {
    let source = source.as_ref();
    let mut file = H5File::open_read(source, &options.storage_options()).context(FileOpenSnafu {
        path: source.display().to_string(),
    })?;

    let group = resolve(&mut file, options.group.as_deref(), false)?;
    let group_path = file.group_path(group)?;
    let decode = DecodePath::select(
        &group_path,
        file.group_attrs(group)?,
        options.force_foreign,
        options.foreign_decoder.as_ref(),
    )?;
    debug!("Reading {group_path} of {} via {decode:?}", source.display());

    match decode {
        DecodePath::Foreign(decoder) => {
            drop(file);
            let batch = decoder
                .decode(source, &group_path)
                .context(ForeignDecodeSnafu { group: group_path })?;
            Ok(ReadOutput::Frame(batch))
        }
        DecodePath::Native => {
            let leaves = file.leaves(group)?;
            let leaf = select_leaf(&group_path, leaves, options.leaf.as_deref())?;
            debug!("Selected leaf {} ({:?})", leaf.path(), leaf.kind());
            read_leaf(&leaf, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_truthiness_decides() {
        let mut attrs = BTreeMap::new();
        assert!(!is_foreign_group(&attrs));

        attrs.insert("pandas_version".to_string(), AttrValue::from(""));
        assert!(!is_foreign_group(&attrs));

        attrs.insert("pandas_type".to_string(), AttrValue::from("frame_table"));
        assert!(is_foreign_group(&attrs));
    }

    #[test]
    fn forced_foreign_without_decoder_fails() {
        let attrs = BTreeMap::new();
        let err = DecodePath::select("/", &attrs, Some(true), None).unwrap_err();
        assert!(matches!(
            err,
            crate::HdfError::ForeignDecoderMissing { ref group } if group == "/"
        ));
        assert!(matches!(
            DecodePath::select("/", &attrs, Some(false), None).unwrap(),
            DecodePath::Native
        ));
    }

    #[test]
    fn reserved_options_are_stripped() {
        let options = ReadOptions::new()
            .with_extra_option("mode", "a")
            .with_extra_option("title", "x")
            .with_extra_option("driver", "core");
        let forwarded = options.storage_options();
        assert_eq!(forwarded.iter().collect::<Vec<_>>(), vec![("driver", "core")]);
    }
}
