//! Node types for the in-memory tree
//!
//! A [`Node`] is either a directory (owning a name → child id map) or a file
//! (owning its byte content). Nodes live in the tree's arena; the `parent`
//! field is only a back-reference used to rebuild paths and to fix up the
//! parent's bookkeeping on removal.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Identifier of a node in the tree
///
/// Ids are never reused within one tree, which lets the FUSE layer hand them
/// out directly as inode numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The root directory (always 1, matching the FUSE root inode)
    pub const ROOT: NodeId = NodeId(1);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "directory",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-node metadata
///
/// The file size is not stored here: it is always read off the content
/// buffer, so the two cannot disagree.
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub kind: NodeKind,
    /// Permission bits (`mode & 0o7777`)
    pub perm: u16,
    pub ctime: SystemTime,
    pub mtime: SystemTime,
    pub atime: SystemTime,
    pub nlink: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Extended attributes
    pub xattrs: HashMap<String, Vec<u8>>,
}

impl NodeMetadata {
    pub(crate) fn new(kind: NodeKind, mode: u32) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            perm: (mode & 0o7777) as u16,
            ctime: now,
            mtime: now,
            atime: now,
            nlink: match kind {
                NodeKind::File => 1,
                NodeKind::Directory => 2,
            },
            uid: None,
            gid: None,
            xattrs: HashMap::new(),
        }
    }

    /// Stamp a content change
    pub(crate) fn touch(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }
}

/// Owned payload of a node
#[derive(Debug, Clone)]
pub(crate) enum NodeBody {
    File { data: Vec<u8> },
    Directory { children: HashMap<String, NodeId> },
}

/// A file or directory entry in the tree
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) meta: NodeMetadata,
    pub(crate) body: NodeBody,
}

impl Node {
    pub(crate) fn directory(id: NodeId, name: &str, parent: Option<NodeId>, mode: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent,
            meta: NodeMetadata::new(NodeKind::Directory, mode),
            body: NodeBody::Directory {
                children: HashMap::new(),
            },
        }
    }

    pub(crate) fn file(id: NodeId, name: &str, parent: NodeId, mode: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent: Some(parent),
            meta: NodeMetadata::new(NodeKind::File, mode),
            body: NodeBody::File { data: Vec::new() },
        }
    }

    /* Getters */

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> NodeKind {
        self.meta.kind
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.meta
    }

    pub fn is_directory(&self) -> bool {
        self.meta.kind == NodeKind::Directory
    }

    /// Content length for files, 0 for directories
    pub fn size(&self) -> u64 {
        match &self.body {
            NodeBody::File { data } => data.len() as u64,
            NodeBody::Directory { .. } => 0,
        }
    }

    pub(crate) fn children(&self) -> Option<&HashMap<String, NodeId>> {
        match &self.body {
            NodeBody::Directory { children } => Some(children),
            NodeBody::File { .. } => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut HashMap<String, NodeId>> {
        match &mut self.body {
            NodeBody::Directory { children } => Some(children),
            NodeBody::File { .. } => None,
        }
    }

    pub(crate) fn data(&self) -> Option<&Vec<u8>> {
        match &self.body {
            NodeBody::File { data } => Some(data),
            NodeBody::Directory { .. } => None,
        }
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.body {
            NodeBody::File { data } => Some(data),
            NodeBody::Directory { .. } => None,
        }
    }

    /// Copy out the attributes a caller needs to answer `stat`
    pub fn attr(&self) -> NodeAttr {
        NodeAttr {
            id: self.id,
            kind: self.meta.kind,
            perm: self.meta.perm,
            size: self.size(),
            nlink: self.meta.nlink,
            uid: self.meta.uid,
            gid: self.meta.gid,
            ctime: self.meta.ctime,
            mtime: self.meta.mtime,
            atime: self.meta.atime,
        }
    }
}

/// Snapshot of a node's attributes, detached from the tree lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub id: NodeId,
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
    pub nlink: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub ctime: SystemTime,
    pub mtime: SystemTime,
    pub atime: SystemTime,
}

/// A directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub id: NodeId,
    pub kind: NodeKind,
}
