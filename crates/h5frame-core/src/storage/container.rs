//! Single-file container encoding.
//!
//! Layout:
//!
//! ```text
//! +----------+---------+------------+-------------+------------------+
//! | MAGIC(8) | ver u32 | hdr_len u64| JSON header | leaf data blobs  |
//! +----------+---------+------------+-------------+------------------+
//! ```
//!
//! The header lists every reachable node in pre-order (parents before
//! children, siblings in creation order). Leaves carry the offset and length
//! of their blob relative to the start of the data section. Integers in the
//! fixed prefix are little-endian.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::storage::error::{CorruptSnafu, StorageError, StorageResult};
use crate::storage::kind::{ColumnDescriptor, MAX_ITEMSIZE, StorageKind, TableDescription};
use crate::storage::node::{ArrayNode, GroupNode, Node, NodeBody, TableNode};
use crate::storage::record::RecordLayout;
use crate::storage::value::AttrValue;

/// Magic bytes at the start of every container file.
pub const MAGIC: &[u8; 8] = b"H5FRAME\0";

/// Container format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

const PREFIX_LEN: usize = MAGIC.len() + 4 + 8;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    nodes: Vec<NodeHeader>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeHeader {
    name: String,
    parent: Option<usize>,
    body: BodyHeader,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnHeader {
    name: String,
    #[serde(flatten)]
    descriptor: ColumnDescriptor,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BodyHeader {
    Group {
        #[serde(default)]
        attrs: BTreeMap<String, AttrValue>,
    },
    Table {
        columns: Vec<ColumnHeader>,
        nrows: u64,
        offset: u64,
        len: u64,
    },
    Array {
        kind: StorageKind,
        itemsize: usize,
        nelements: u64,
        offset: u64,
        len: u64,
    },
}

fn corrupt(path: &str, reason: impl Into<String>) -> StorageError {
    CorruptSnafu {
        path,
        reason: reason.into(),
    }
    .build()
}

/// Serialize every node reachable from the root (node 0).
pub(crate) fn encode(path: &str, nodes: &[Node]) -> StorageResult<Bytes> {
    let mut headers = Vec::new();
    let mut data = BytesMut::new();

    // (node id, new parent index)
    let mut stack = vec![(0usize, None)];
    while let Some((id, parent)) = stack.pop() {
        let node = &nodes[id];
        let index = headers.len();
        let body = match &node.body {
            NodeBody::Group(group) => {
                // Push in reverse so children come out in creation order.
                for child in group.children.iter().rev() {
                    stack.push((*child, Some(index)));
                }
                BodyHeader::Group {
                    attrs: group.attrs.clone(),
                }
            }
            NodeBody::Table(table) => {
                let offset = data.len() as u64;
                data.put_slice(&table.data);
                BodyHeader::Table {
                    columns: table
                        .description
                        .columns()
                        .iter()
                        .map(|(name, descriptor)| ColumnHeader {
                            name: name.clone(),
                            descriptor: *descriptor,
                        })
                        .collect(),
                    nrows: table.nrows,
                    offset,
                    len: table.data.len() as u64,
                }
            }
            NodeBody::Array(array) => {
                let offset = data.len() as u64;
                data.put_slice(&array.data);
                BodyHeader::Array {
                    kind: array.kind,
                    itemsize: array.itemsize,
                    nelements: array.nelements,
                    offset,
                    len: array.data.len() as u64,
                }
            }
        };
        headers.push(NodeHeader {
            name: node.name.clone(),
            parent,
            body,
        });
    }

    let header = serde_json::to_vec(&Header { nodes: headers })
        .map_err(|e| corrupt(path, format!("failed to encode header: {e}")))?;

    let mut out = BytesMut::with_capacity(PREFIX_LEN + header.len() + data.len());
    out.put_slice(MAGIC);
    out.put_u32_le(FORMAT_VERSION);
    out.put_u64_le(header.len() as u64);
    out.put_slice(&header);
    out.put_slice(&data);
    Ok(out.freeze())
}

fn blob(path: &str, data: &Bytes, offset: u64, len: u64) -> StorageResult<Bytes> {
    let start = usize::try_from(offset).map_err(|_| corrupt(path, "blob offset overflow"))?;
    let len = usize::try_from(len).map_err(|_| corrupt(path, "blob length overflow"))?;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| corrupt(path, format!("blob {start}+{len} exceeds data section")))?;
    Ok(data.slice(start..end))
}

/// Parse a container file into its node arena; node 0 is the root group.
pub(crate) fn decode(path: &str, mut raw: Bytes) -> StorageResult<Vec<Node>> {
    if raw.len() < PREFIX_LEN || &raw[..MAGIC.len()] != MAGIC {
        return Err(corrupt(path, "missing container magic"));
    }
    raw.advance(MAGIC.len());
    let version = raw.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(corrupt(path, format!("unsupported format version {version}")));
    }
    let header_len = usize::try_from(raw.get_u64_le())
        .ok()
        .filter(|len| *len <= raw.len())
        .ok_or_else(|| corrupt(path, "header length exceeds file size"))?;
    let header_bytes = raw.split_to(header_len);
    let data = raw;

    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|e| corrupt(path, format!("invalid header: {e}")))?;

    let mut nodes: Vec<Node> = Vec::with_capacity(header.nodes.len());
    for (index, entry) in header.nodes.into_iter().enumerate() {
        match (index, entry.parent) {
            (0, None) => {}
            (0, Some(_)) => return Err(corrupt(path, "root node has a parent")),
            (_, None) => return Err(corrupt(path, format!("node #{index} has no parent"))),
            (_, Some(parent)) => {
                let parent_node = nodes
                    .get_mut(parent)
                    .ok_or_else(|| corrupt(path, format!("node #{index} precedes its parent")))?;
                let NodeBody::Group(group) = &mut parent_node.body else {
                    return Err(corrupt(path, format!("node #{index} has a leaf as parent")));
                };
                group.children.push(index);
            }
        }

        let body = match entry.body {
            BodyHeader::Group { attrs } => NodeBody::Group(GroupNode {
                attrs,
                children: Vec::new(),
            }),
            BodyHeader::Table {
                columns,
                nrows,
                offset,
                len,
            } => {
                let description = TableDescription::new(
                    columns
                        .into_iter()
                        .map(|c| (c.name, c.descriptor))
                        .collect(),
                )
                .map_err(|e| corrupt(path, format!("table {}: {e}", entry.name)))?;
                let layout = RecordLayout::new(&description);
                let bytes = blob(path, &data, offset, len)?;
                if (layout.record_size() as u64).checked_mul(nrows) != Some(len) {
                    return Err(corrupt(
                        path,
                        format!("table {} holds {len} bytes for {nrows} rows", entry.name),
                    ));
                }
                NodeBody::Table(TableNode {
                    description,
                    layout,
                    nrows,
                    data: BytesMut::from(&bytes[..]),
                })
            }
            BodyHeader::Array {
                kind,
                itemsize,
                nelements,
                offset,
                len,
            } => {
                if kind.fixed_itemsize().is_some_and(|w| w != itemsize)
                    || itemsize == 0
                    || itemsize > MAX_ITEMSIZE
                {
                    return Err(corrupt(
                        path,
                        format!("array {} has invalid itemsize {itemsize}", entry.name),
                    ));
                }
                if (itemsize as u64).checked_mul(nelements) != Some(len) {
                    return Err(corrupt(
                        path,
                        format!("array {} holds {len} bytes for {nelements} elements", entry.name),
                    ));
                }
                NodeBody::Array(ArrayNode {
                    kind,
                    itemsize,
                    nelements,
                    data: blob(path, &data, offset, len)?,
                })
            }
        };

        nodes.push(Node {
            name: entry.name,
            parent: entry.parent,
            body,
        });
    }

    match nodes.first() {
        Some(Node {
            body: NodeBody::Group(_),
            ..
        }) => Ok(nodes),
        _ => Err(corrupt(path, "root node is not a group")),
    }
}
