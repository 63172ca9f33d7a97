//! In-memory node store
//!
//! The store holds the whole mounted tree. It is shared between the FUSE
//! callback thread and the sync engine thread, so every access goes through
//! [`NodeStore`], which guards the [`Tree`] with a single reader/writer lock.
//! Each method holds the lock for exactly one tree operation, making every
//! operation atomic with respect to every other.

mod node;
pub mod path;
mod tree;

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

pub use node::{DirEntry, Node, NodeAttr, NodeId, NodeKind, NodeMetadata};
pub use tree::{Tree, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, MAX_FILE_SIZE};

/// Typed failures raised by tree operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("no such attribute: {0}")]
    NoAttribute(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("file too large: {0}")]
    FileTooLarge(String),
}

/// Cloneable, thread-safe handle to the tree
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    tree: Arc<RwLock<Tree>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with shared access to the tree
    pub fn view<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.tree.read())
    }

    /// Run `f` with exclusive access to the tree
    ///
    /// Everything `f` does is observed by other threads as a single step.
    pub fn update<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.tree.write())
    }

    /* Lookup */

    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        self.tree.read().resolve(path)
    }

    pub fn lookup_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.tree.read().lookup_child(parent, name)
    }

    pub fn attr(&self, id: NodeId) -> Option<NodeAttr> {
        self.tree.read().attr(id)
    }

    pub fn path_of(&self, id: NodeId) -> Option<String> {
        self.tree.read().path_of(id)
    }

    pub fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.tree.read().list_children(path)
    }

    pub fn entries(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        self.tree.read().entries(path)
    }

    /* Mutation */

    pub fn create_file(&self, path: &str, mode: u32) -> Result<NodeId, StoreError> {
        self.tree.write().create_file(path, mode)
    }

    pub fn create_directory(&self, path: &str, mode: u32) -> Result<NodeId, StoreError> {
        self.tree.write().create_directory(path, mode)
    }

    pub fn write(&self, id: NodeId, offset: u64, data: &[u8]) -> Result<u64, StoreError> {
        self.tree.write().write(id, offset, data)
    }

    pub fn read(&self, id: NodeId, offset: u64, size: usize) -> Result<Vec<u8>, StoreError> {
        self.tree.read().read(id, offset, size)
    }

    pub fn contents(&self, id: NodeId) -> Result<Vec<u8>, StoreError> {
        self.tree.read().contents(id)
    }

    pub fn truncate(&self, id: NodeId, length: u64) -> Result<(), StoreError> {
        self.tree.write().truncate(id, length)
    }

    pub fn remove(&self, id: NodeId) -> Result<(), StoreError> {
        self.tree.write().remove(id)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<(), StoreError> {
        self.tree.write().rename(old, new)
    }

    pub fn set_mode(&self, id: NodeId, mode: u32) -> Result<(), StoreError> {
        self.tree.write().set_mode(id, mode)
    }

    pub fn set_owner(
        &self,
        id: NodeId,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), StoreError> {
        self.tree.write().set_owner(id, uid, gid)
    }

    pub fn set_times(
        &self,
        id: NodeId,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<(), StoreError> {
        self.tree.write().set_times(id, atime, mtime)
    }

    pub fn get_xattr(&self, id: NodeId, name: &str) -> Result<Vec<u8>, StoreError> {
        self.tree.read().get_xattr(id, name)
    }

    pub fn set_xattr(&self, id: NodeId, name: &str, value: &[u8]) -> Result<(), StoreError> {
        self.tree.write().set_xattr(id, name, value)
    }

    pub fn remove_xattr(&self, id: NodeId, name: &str) -> Result<(), StoreError> {
        self.tree.write().remove_xattr(id, name)
    }

    pub fn list_xattrs(&self, id: NodeId) -> Result<Vec<String>, StoreError> {
        self.tree.read().list_xattrs(id)
    }

    pub fn apply_inbound(&self, segments: &[&str], payload: &[u8]) -> Result<NodeId, StoreError> {
        self.tree.write().apply_inbound(segments, payload)
    }
}
