//! In-memory node arena backing an open container file.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::storage::kind::{StorageKind, TableDescription};
use crate::storage::record::RecordLayout;
use crate::storage::value::AttrValue;

/// Arena slot; index 0 is always the root group.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) parent: Option<usize>,
    pub(crate) body: NodeBody,
}

impl Node {
    pub(crate) fn root() -> Self {
        Node {
            name: String::new(),
            parent: None,
            body: NodeBody::Group(GroupNode::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeBody {
    Group(GroupNode),
    Table(TableNode),
    Array(ArrayNode),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GroupNode {
    pub(crate) attrs: BTreeMap<String, AttrValue>,
    /// Child node ids in creation order.
    pub(crate) children: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct TableNode {
    pub(crate) description: TableDescription,
    pub(crate) layout: RecordLayout,
    pub(crate) nrows: u64,
    /// `nrows` packed records.
    pub(crate) data: BytesMut,
}

#[derive(Debug, Clone)]
pub(crate) struct ArrayNode {
    pub(crate) kind: StorageKind,
    pub(crate) itemsize: usize,
    pub(crate) nelements: u64,
    pub(crate) data: Bytes,
}
