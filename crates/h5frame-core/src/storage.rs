//! Hierarchical table/array storage primitives.
//!
//! This module is the storage boundary consumed by the read and write
//! pipelines. It exposes an open file as a tree of named groups whose leaves
//! are either row-structured tables or homogeneous arrays:
//!
//! - [`H5File`] opens a container read-only or creates it with truncate
//!   semantics, and offers group traversal/creation, group attributes, and
//!   leaf creation and enumeration.
//! - [`LeafRef`] reads a leaf fully, by [`RowRange`], or filtered by a row
//!   [`Condition`], producing a [`RawBuffer`] of *physical* Arrow columns.
//! - [`TableWriter`] streams rows into a new table through a reusable
//!   [`RowBuffer`].
//!
//! Writes are transactional at file granularity: nothing reaches disk until
//! [`H5File::flush`] (or [`H5File::close`]) succeeds, and the flush itself is
//! a write-then-rename of the whole container. Dropping a handle with
//! unflushed changes discards them.

use std::{
    collections::BTreeMap,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow::compute::filter_record_batch;
use arrow::datatypes::{Field, Schema};
use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use snafu::{IntoError, prelude::*};

mod condition;
mod container;
mod error;
mod kind;
mod node;
mod record;
mod value;

pub use condition::Condition;
pub use container::{FORMAT_VERSION, MAGIC};
pub use error::{StorageError, StorageResult};
pub use kind::{
    ColumnDescriptor, ColumnType, MAX_ITEMSIZE, ParseStorageKindError, StorageKind,
    TableDescription,
};
pub use value::{AttrValue, Value};

use error::{
    ArrowSnafu, IncompleteRowSnafu, InvalidDescriptionSnafu, InvalidHandleSnafu,
    InvalidNameSnafu, NodeExistsSnafu, NotAGroupSnafu, NotFoundSnafu, OtherIoSnafu,
    ReadOnlySnafu, UnknownColumnSnafu,
};
use node::{ArrayNode, GroupNode, Node, NodeBody, TableNode};
use record::{RecordLayout, decode_column, encode_value, physical_data_type};

/// Backend pass-through options supplied by the caller at open time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    entries: BTreeMap<String, String>,
}

impl StorageOptions {
    /// Wrap a key/value map.
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        StorageOptions { entries }
    }

    /// Look up one option.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Iterate over all options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// How a file was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Read-only; every mutation fails with [`StorageError::ReadOnly`].
    Read,
    /// Freshly truncated and writable.
    Write,
}

/// Handle to a group inside one open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

/// Structural kind of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// Row-structured leaf with named typed columns.
    Table,
    /// Single homogeneous sequence without column names.
    Array,
}

/// A resolved, half-open, step-aware selection of rows.
///
/// Indices past the end of the leaf are ignored when reading, so
/// `stop` may safely exceed the row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    /// First selected row.
    pub start: usize,
    /// One past the last candidate row.
    pub stop: usize,
    /// Distance between selected rows; treated as 1 when zero.
    pub step: usize,
}

impl RowRange {
    /// Every row of a leaf with `len` rows.
    pub fn all(len: usize) -> Self {
        RowRange {
            start: 0,
            stop: len,
            step: 1,
        }
    }

    /// Selected row indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        (self.start..self.stop.max(self.start)).step_by(self.step.max(1))
    }

    /// Number of selected rows.
    pub fn len(&self) -> usize {
        let step = self.step.max(1);
        self.stop.saturating_sub(self.start).div_ceil(step)
    }

    /// True when no row is selected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw contents of a leaf, in physical (storage-native) Arrow types.
///
/// Table buffers carry one field per declared column, in declared position
/// order; `time32` columns arrive as `Int32` seconds and `time64` columns as
/// `Float64` seconds.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBuffer {
    /// Table leaf contents.
    Table(RecordBatch),
    /// Array leaf contents.
    Array(ArrayRef),
}

impl RawBuffer {
    /// Number of rows (table) or elements (array).
    pub fn len(&self) -> usize {
        match self {
            RawBuffer::Table(batch) => batch.num_rows(),
            RawBuffer::Array(array) => array.len(),
        }
    }

    /// True when the buffer holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn classify_io(path: &Path, source: io::Error) -> StorageError {
    let path = path.display().to_string();
    if source.kind() == io::ErrorKind::NotFound {
        NotFoundSnafu { path }.into_error(source)
    } else {
        OtherIoSnafu { path }.into_error(source)
    }
}

/// Replace `path` with `contents`.
///
/// The bytes go to an anonymous sibling file that is synced and then renamed
/// over `path`; the sibling is removed if any step fails.
fn write_atomic(path: &Path, contents: &[u8]) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::Builder::new()
        .prefix(".h5frame-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| classify_io(path, e))?;
    staged
        .write_all(contents)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| classify_io(path, e))?;
    staged
        .persist(path)
        .map_err(|e| classify_io(path, e.error))?;
    Ok(())
}

/// An open container file.
///
/// The handle exclusively owns the decoded node tree for the duration of one
/// read or write call; it is released on drop.
#[derive(Debug)]
pub struct H5File {
    path: PathBuf,
    mode: FileMode,
    nodes: Vec<Node>,
    dirty: bool,
}

impl H5File {
    /// Open an existing container read-only.
    ///
    /// Fails with [`StorageError::NotFound`] for a missing file and
    /// [`StorageError::Corrupt`] when the file is not a valid container.
    pub fn open_read(path: impl AsRef<Path>, options: &StorageOptions) -> StorageResult<Self> {
        let path = path.as_ref();
        for (key, value) in options.iter() {
            warn!("Container backend does not recognise option {key}={value}; ignoring");
        }

        let raw = fs::read(path).map_err(|e| classify_io(path, e))?;
        let nodes = container::decode(&path.display().to_string(), Bytes::from(raw))?;
        debug!("Opened {} read-only ({} nodes)", path.display(), nodes.len());

        Ok(H5File {
            path: path.to_path_buf(),
            mode: FileMode::Read,
            nodes,
            dirty: false,
        })
    }

    /// Create `path`, replacing any existing file with an empty container.
    ///
    /// The empty container is written immediately, so an unwritable
    /// destination is reported here rather than at flush time.
    pub fn create_truncate(path: impl AsRef<Path>, options: &StorageOptions) -> StorageResult<Self> {
        let path = path.as_ref();
        for (key, value) in options.iter() {
            warn!("Container backend does not recognise option {key}={value}; ignoring");
        }

        let nodes = vec![Node::root()];
        let raw = container::encode(&path.display().to_string(), &nodes)?;
        write_atomic(path, &raw)?;
        debug!("Created {} (truncated)", path.display());

        Ok(H5File {
            path: path.to_path_buf(),
            mode: FileMode::Write,
            nodes,
            dirty: false,
        })
    }

    /// Location of the file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the file was opened with.
    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// The root group.
    pub fn root(&self) -> GroupId {
        GroupId(0)
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        ensure!(
            self.mode == FileMode::Write,
            ReadOnlySnafu {
                path: self.path.display().to_string(),
            }
        );
        Ok(())
    }

    fn node_path(&self, id: usize) -> String {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = &self.nodes[current];
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    fn group_node(&self, id: GroupId) -> StorageResult<&GroupNode> {
        match self.nodes.get(id.0).map(|n| &n.body) {
            Some(NodeBody::Group(group)) => Ok(group),
            Some(_) => NotAGroupSnafu {
                path: self.node_path(id.0),
            }
            .fail(),
            None => InvalidHandleSnafu { id: id.0 }.fail(),
        }
    }

    fn group_node_mut(&mut self, id: GroupId) -> StorageResult<&mut GroupNode> {
        // Validate first so the error path can still borrow `self`.
        self.group_node(id)?;
        match &mut self.nodes[id.0].body {
            NodeBody::Group(group) => Ok(group),
            _ => InvalidHandleSnafu { id: id.0 }.fail(),
        }
    }

    /// Absolute path of a group, `/` for the root.
    pub fn group_path(&self, group: GroupId) -> StorageResult<String> {
        self.group_node(group)?;
        Ok(self.node_path(group.0))
    }

    fn child(&self, parent: GroupId, name: &str) -> StorageResult<Option<usize>> {
        let group = self.group_node(parent)?;
        Ok(group
            .children
            .iter()
            .copied()
            .find(|id| self.nodes[*id].name == name))
    }

    /// Look up a child group by exact name.
    ///
    /// Fails with [`StorageError::NotAGroup`] when the child exists but is a
    /// leaf.
    pub fn child_group(&self, parent: GroupId, name: &str) -> StorageResult<Option<GroupId>> {
        match self.child(parent, name)? {
            None => Ok(None),
            Some(id) => match self.nodes[id].body {
                NodeBody::Group(_) => Ok(Some(GroupId(id))),
                _ => NotAGroupSnafu {
                    path: self.node_path(id),
                }
                .fail(),
            },
        }
    }

    fn check_new_child(&self, parent: GroupId, name: &str) -> StorageResult<()> {
        self.ensure_writable()?;
        ensure!(
            !name.is_empty() && !name.contains('/'),
            InvalidNameSnafu { name }
        );
        if self.child(parent, name)?.is_some() {
            return NodeExistsSnafu {
                parent: self.node_path(parent.0),
                name,
            }
            .fail();
        }
        Ok(())
    }

    fn attach(&mut self, parent: GroupId, name: &str, body: NodeBody) -> StorageResult<usize> {
        let id = self.nodes.len();
        self.group_node_mut(parent)?.children.push(id);
        self.nodes.push(Node {
            name: name.to_string(),
            parent: Some(parent.0),
            body,
        });
        self.dirty = true;
        Ok(id)
    }

    fn detach(&mut self, id: usize) {
        if let Some(parent) = self.nodes.get(id).and_then(|n| n.parent)
            && let Some(NodeBody::Group(group)) = self.nodes.get_mut(parent).map(|n| &mut n.body)
        {
            group.children.retain(|child| *child != id);
        }
    }

    /// Create a new, empty child group.
    pub fn create_group(&mut self, parent: GroupId, name: &str) -> StorageResult<GroupId> {
        self.check_new_child(parent, name)?;
        let id = self.attach(parent, name, NodeBody::Group(GroupNode::default()))?;
        debug!("Created group {}", self.node_path(id));
        Ok(GroupId(id))
    }

    /// All metadata attributes of a group.
    pub fn group_attrs(&self, group: GroupId) -> StorageResult<&BTreeMap<String, AttrValue>> {
        Ok(&self.group_node(group)?.attrs)
    }

    /// One metadata attribute of a group.
    pub fn group_attr(&self, group: GroupId, key: &str) -> StorageResult<Option<&AttrValue>> {
        Ok(self.group_node(group)?.attrs.get(key))
    }

    /// Set (or replace) a metadata attribute on a group.
    pub fn set_group_attr(
        &mut self,
        group: GroupId,
        key: &str,
        value: impl Into<AttrValue>,
    ) -> StorageResult<()> {
        self.ensure_writable()?;
        self.group_node_mut(group)?
            .attrs
            .insert(key.to_string(), value.into());
        self.dirty = true;
        Ok(())
    }

    /// Child groups directly under a group, in creation order.
    pub fn groups(&self, group: GroupId) -> StorageResult<Vec<GroupId>> {
        let node = self.group_node(group)?;
        Ok(node
            .children
            .iter()
            .filter(|id| matches!(self.nodes[**id].body, NodeBody::Group(_)))
            .map(|id| GroupId(*id))
            .collect())
    }

    /// Leaves directly under a group, in creation order.
    pub fn leaves(&self, group: GroupId) -> StorageResult<Vec<LeafRef<'_>>> {
        let node = self.group_node(group)?;
        Ok(node
            .children
            .iter()
            .filter(|id| !matches!(self.nodes[**id].body, NodeBody::Group(_)))
            .map(|id| LeafRef { file: self, id: *id })
            .collect())
    }

    /// Look up a leaf directly under a group by exact name.
    pub fn leaf(&self, group: GroupId, name: &str) -> StorageResult<Option<LeafRef<'_>>> {
        Ok(self.leaves(group)?.into_iter().find(|leaf| leaf.name() == name))
    }

    /// Create a new table leaf and return a writer for its rows.
    ///
    /// Fails with [`StorageError::NodeExists`] if any child of `group`
    /// already uses `name`; the existing child is left untouched.
    pub fn create_table(
        &mut self,
        group: GroupId,
        name: &str,
        description: TableDescription,
    ) -> StorageResult<TableWriter<'_>> {
        self.check_new_child(group, name)?;
        let layout = RecordLayout::new(&description);
        let row = RowBuffer::new(layout.clone());
        let id = self.attach(
            group,
            name,
            NodeBody::Table(TableNode {
                description,
                layout,
                nrows: 0,
                data: BytesMut::new(),
            }),
        )?;
        debug!("Created table {}", self.node_path(id));
        Ok(TableWriter {
            file: self,
            id,
            row,
            sealed: false,
        })
    }

    /// Create a new array leaf holding `values`.
    pub fn create_array(
        &mut self,
        group: GroupId,
        name: &str,
        element: ColumnType,
        values: &[Value],
    ) -> StorageResult<()> {
        self.check_new_child(group, name)?;
        ensure!(
            (1..=MAX_ITEMSIZE).contains(&element.itemsize),
            InvalidDescriptionSnafu {
                reason: format!(
                    "array {name:?} itemsize {} outside 1..={MAX_ITEMSIZE}",
                    element.itemsize
                ),
            }
        );
        let mut data = BytesMut::zeroed(element.itemsize * values.len());
        for (i, value) in values.iter().enumerate() {
            let slot = &mut data[i * element.itemsize..(i + 1) * element.itemsize];
            encode_value(slot, element.kind, element.itemsize, name, value)?;
        }
        let id = self.attach(
            group,
            name,
            NodeBody::Array(ArrayNode {
                kind: element.kind,
                itemsize: element.itemsize,
                nelements: values.len() as u64,
                data: data.freeze(),
            }),
        )?;
        debug!("Created array {} ({} elements)", self.node_path(id), values.len());
        Ok(())
    }

    /// Persist every pending change.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.ensure_writable()?;
        let raw = container::encode(&self.path.display().to_string(), &self.nodes)?;
        write_atomic(&self.path, &raw)?;
        self.dirty = false;
        debug!("Flushed {} ({} bytes)", self.path.display(), raw.len());
        Ok(())
    }

    /// Flush pending changes (write mode) and release the handle.
    pub fn close(mut self) -> StorageResult<()> {
        if self.mode == FileMode::Write && self.dirty {
            self.flush()?;
        }
        Ok(())
    }
}

impl Drop for H5File {
    fn drop(&mut self) {
        if self.mode == FileMode::Write && self.dirty {
            warn!(
                "Discarding unflushed changes to {}; the file keeps its last flushed contents",
                self.path.display()
            );
        }
    }
}

/// Borrowed view of one leaf of an open file.
#[derive(Debug, Clone, Copy)]
pub struct LeafRef<'f> {
    file: &'f H5File,
    id: usize,
}

impl<'f> LeafRef<'f> {
    fn node(&self) -> &'f Node {
        &self.file.nodes[self.id]
    }

    /// Leaf name.
    pub fn name(&self) -> &'f str {
        &self.node().name
    }

    /// Absolute path of the leaf.
    pub fn path(&self) -> String {
        self.file.node_path(self.id)
    }

    /// Table or array.
    pub fn kind(&self) -> LeafKind {
        match self.node().body {
            NodeBody::Array(_) => LeafKind::Array,
            _ => LeafKind::Table,
        }
    }

    /// Rows (table) or elements (array).
    pub fn nrows(&self) -> usize {
        match &self.node().body {
            NodeBody::Table(t) => t.nrows as usize,
            NodeBody::Array(a) => a.nelements as usize,
            NodeBody::Group(_) => 0,
        }
    }

    /// Table description, `None` for arrays.
    pub fn description(&self) -> Option<&'f TableDescription> {
        match &self.node().body {
            NodeBody::Table(t) => Some(&t.description),
            _ => None,
        }
    }

    /// Declared column kinds in position order (tables), or the single
    /// element kind keyed by the leaf name (arrays).
    pub fn coltypes(&self) -> Vec<(String, StorageKind)> {
        match &self.node().body {
            NodeBody::Table(t) => t
                .layout
                .columns()
                .iter()
                .map(|c| (c.name.clone(), c.kind))
                .collect(),
            NodeBody::Array(a) => vec![(self.name().to_string(), a.kind)],
            NodeBody::Group(_) => Vec::new(),
        }
    }

    /// Read the selected rows.
    pub fn read(&self, range: RowRange) -> StorageResult<RawBuffer> {
        let rows: Vec<usize> = range.indices().take_while(|r| *r < self.nrows()).collect();
        match &self.node().body {
            NodeBody::Table(t) => table_batch(t, &rows).map(RawBuffer::Table),
            NodeBody::Array(a) => decode_column(
                &a.data,
                a.itemsize,
                0,
                a.kind,
                a.itemsize,
                self.name(),
                &rows,
            )
            .map(RawBuffer::Array),
            NodeBody::Group(_) => InvalidHandleSnafu { id: self.id }.fail(),
        }
    }

    /// Read the rows satisfying `condition`, in leaf order.
    pub fn read_where(&self, condition: &str) -> StorageResult<RecordBatch> {
        let condition = Condition::parse(condition)?;
        let NodeBody::Table(table) = &self.node().body else {
            return Err(StorageError::InvalidCondition {
                condition: condition.text().to_string(),
                reason: format!("{} is not a table", self.path()),
            });
        };
        let rows: Vec<usize> = (0..table.nrows as usize).collect();
        let batch = table_batch(table, &rows)?;
        let mask = condition.evaluate(&batch)?;
        filter_record_batch(&batch, &mask).context(ArrowSnafu)
    }
}

fn table_batch(table: &TableNode, rows: &[usize]) -> StorageResult<RecordBatch> {
    let layout = &table.layout;
    let mut fields = Vec::with_capacity(layout.columns().len());
    let mut columns = Vec::with_capacity(layout.columns().len());
    for col in layout.columns() {
        fields.push(Field::new(
            col.name.clone(),
            physical_data_type(col.kind, col.itemsize),
            false,
        ));
        columns.push(decode_column(
            &table.data,
            layout.record_size(),
            col.offset,
            col.kind,
            col.itemsize,
            &col.name,
            rows,
        )?);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)
        .context(ArrowSnafu)
}

/// Streams rows into a freshly created table.
///
/// Dropping the writer without calling [`TableWriter::flush`] removes the
/// table from the file again, so a failed stream never leaves a partially
/// populated leaf behind.
#[derive(Debug)]
pub struct TableWriter<'f> {
    file: &'f mut H5File,
    id: usize,
    row: RowBuffer,
    sealed: bool,
}

impl TableWriter<'_> {
    /// The reusable row buffer; assign every column, then [`append`](Self::append).
    pub fn row(&mut self) -> &mut RowBuffer {
        &mut self.row
    }

    /// Commit the row buffer as the next row.
    pub fn append(&mut self) -> StorageResult<()> {
        let record = self.row.take_record()?;
        match self.file.nodes.get_mut(self.id).map(|n| &mut n.body) {
            Some(NodeBody::Table(table)) => {
                table.data.extend_from_slice(record);
                table.nrows += 1;
                Ok(())
            }
            _ => InvalidHandleSnafu { id: self.id }.fail(),
        }
    }

    /// Rows committed so far.
    pub fn nrows(&self) -> u64 {
        match &self.file.nodes[self.id].body {
            NodeBody::Table(table) => table.nrows,
            _ => 0,
        }
    }

    /// Seal the table; returns the number of rows written.
    pub fn flush(mut self) -> StorageResult<u64> {
        self.sealed = true;
        Ok(self.nrows())
    }
}

impl Drop for TableWriter<'_> {
    fn drop(&mut self) {
        if !self.sealed {
            debug!(
                "Discarding unsealed table {}",
                self.file.node_path(self.id)
            );
            self.file.detach(self.id);
        }
    }
}

/// Reusable single-row write buffer bound to a table's record layout.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    layout: RecordLayout,
    record: BytesMut,
    assigned: Vec<bool>,
}

impl RowBuffer {
    fn new(layout: RecordLayout) -> Self {
        let record = BytesMut::zeroed(layout.record_size());
        let assigned = vec![false; layout.columns().len()];
        RowBuffer {
            layout,
            record,
            assigned,
        }
    }

    /// Assign `value` to the named column of the pending row.
    pub fn set(&mut self, column: &str, value: &Value) -> StorageResult<()> {
        let index = self
            .layout
            .index_of(column)
            .context(UnknownColumnSnafu { column })?;
        let col = &self.layout.columns()[index];
        encode_value(
            &mut self.record[col.offset..col.offset + col.itemsize],
            col.kind,
            col.itemsize,
            &col.name,
            value,
        )?;
        self.assigned[index] = true;
        Ok(())
    }

    /// Hand out the completed record and reset the assignment state.
    fn take_record(&mut self) -> StorageResult<&[u8]> {
        if let Some(missing) = self.assigned.iter().position(|done| !done) {
            return IncompleteRowSnafu {
                column: self.layout.columns()[missing].name.clone(),
            }
            .fail();
        }
        self.assigned.iter_mut().for_each(|done| *done = false);
        Ok(&self.record)
    }
}
