//! The node arena and every tree operation
//!
//! `Tree` is deliberately not thread-safe on its own; [`super::NodeStore`]
//! wraps it in a lock. All operations keep these invariants:
//!
//! - every id in a directory's child map is present in the arena, and its
//!   node's `parent` points back at that directory
//! - a name appears at most once per directory, whatever the kinds involved
//! - a directory's `nlink` is 2 plus its number of child directories

use std::collections::HashMap;
use std::time::SystemTime;

use super::node::{DirEntry, Node, NodeAttr, NodeBody, NodeId, NodeKind};
use super::path;
use super::StoreError;

/// Mode used for the root and for directories created by inbound messages
pub const DEFAULT_DIR_MODE: u32 = 0o755;
/// Mode used for files created by inbound messages
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Largest content a file may hold
///
/// Leaves room for the topic inside one 256 MiB MQTT packet.
pub const MAX_FILE_SIZE: u64 = 255 * 1024 * 1024;

/// In-memory directory tree
#[derive(Debug)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree holding only the root directory
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::ROOT,
            Node::directory(NodeId::ROOT, "", None, DEFAULT_DIR_MODE),
        );

        Self {
            nodes,
            next_id: NodeId::ROOT.0 + 1,
        }
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn node(&self, id: NodeId) -> Result<&Node, StoreError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("node {}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, StoreError> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("node {}", id)))
    }

    /* Lookup */

    /// Walk `path` from the root
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        let mut current = NodeId::ROOT;
        for segment in path::segments(path) {
            current = self.lookup_child(current, segment)?;
        }
        Some(current)
    }

    /// Find `name` inside directory `parent`
    pub fn lookup_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes.get(&parent)?.children()?.get(name).copied()
    }

    pub fn attr(&self, id: NodeId) -> Option<NodeAttr> {
        self.nodes.get(&id).map(Node::attr)
    }

    /// Rebuild the absolute path of a node through its parent links
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.as_str());
            current = self.nodes.get(&parent)?;
        }

        if names.is_empty() {
            return Some("/".to_string());
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Resolve the directory that should hold the last segment of `path`
    fn resolve_parent<'p>(&self, path: &'p str) -> Result<(NodeId, &'p str), StoreError> {
        let segments = path::segments(path);
        let Some((name, dirs)) = segments.split_last() else {
            return Err(StoreError::InvalidPath(path.to_string()));
        };

        let mut current = NodeId::ROOT;
        for dir in dirs {
            current = self
                .lookup_child(current, dir)
                .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        }

        if !self.node(current)?.is_directory() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        Ok((current, name))
    }

    /// True when `ancestor` is `id` or one of its parents
    fn is_ancestor(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.nodes.get(&id).and_then(|n| n.parent) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    /* Creation */

    pub fn create_file(&mut self, path: &str, mode: u32) -> Result<NodeId, StoreError> {
        let (parent, name) = self.resolve_parent(path)?;
        self.insert_child(parent, name, NodeKind::File, mode)
    }

    pub fn create_directory(&mut self, path: &str, mode: u32) -> Result<NodeId, StoreError> {
        let (parent, name) = self.resolve_parent(path)?;
        self.insert_child(parent, name, NodeKind::Directory, mode)
    }

    fn insert_child(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        mode: u32,
    ) -> Result<NodeId, StoreError> {
        let parent_node = self.node_mut(parent)?;
        let Some(children) = parent_node.children_mut() else {
            return Err(StoreError::NotADirectory(format!("node {}", parent)));
        };
        if children.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }

        let id = NodeId(self.next_id);
        self.next_id += 1;

        let node = match kind {
            NodeKind::File => Node::file(id, name, parent, mode),
            NodeKind::Directory => Node::directory(id, name, Some(parent), mode),
        };
        self.link(parent, name, id, kind)?;
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Add `id` to `parent`'s child map and fix up the parent's metadata
    fn link(
        &mut self,
        parent: NodeId,
        name: &str,
        id: NodeId,
        kind: NodeKind,
    ) -> Result<(), StoreError> {
        let parent_node = self.node_mut(parent)?;
        let Some(children) = parent_node.children_mut() else {
            return Err(StoreError::NotADirectory(format!("node {}", parent)));
        };
        children.insert(name.to_string(), id);

        if kind == NodeKind::Directory {
            parent_node.meta.nlink += 1;
        }
        parent_node.meta.touch();
        Ok(())
    }

    /// Remove `name` from `parent`'s child map and fix up the parent's metadata
    fn unlink(&mut self, parent: Option<NodeId>, name: &str, kind: NodeKind) {
        let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(&p)) else {
            return;
        };
        if let Some(children) = parent_node.children_mut() {
            children.remove(name);
        }

        if kind == NodeKind::Directory {
            parent_node.meta.nlink = parent_node.meta.nlink.saturating_sub(1).max(1);
        }
        parent_node.meta.touch();
    }

    /// Unhook a node and drop it with everything below it
    fn evict(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let (parent, name, kind) = (node.parent, node.name.clone(), node.kind());
        self.unlink(parent, &name, kind);

        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                if let Some(children) = node.children() {
                    stack.extend(children.values().copied());
                }
            }
        }
    }

    /* Content */

    /// Replace content from `offset` onward with `data`
    ///
    /// Bytes before `offset` are kept, bytes after `offset + data.len()` are
    /// discarded, and a gap past the old end is zero-filled. Returns the new
    /// size. Nothing changes when the result would exceed [`MAX_FILE_SIZE`].
    pub fn write(&mut self, id: NodeId, offset: u64, data: &[u8]) -> Result<u64, StoreError> {
        let node = self.node_mut(id)?;
        let NodeBody::File { data: content } = &mut node.body else {
            return Err(StoreError::IsADirectory(node.name.clone()));
        };

        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or_else(|| StoreError::FileTooLarge(node.name.clone()))?;
        resize_content(content, end, &node.name)?;
        content.truncate(to_usize(offset));
        content.extend_from_slice(data);
        let size = content.len() as u64;

        node.meta.touch();
        Ok(size)
    }

    /// Read up to `size` bytes at `offset`; short or empty past the end
    pub fn read(&self, id: NodeId, offset: u64, size: usize) -> Result<Vec<u8>, StoreError> {
        let node = self.node(id)?;
        let Some(content) = node.data() else {
            return Err(StoreError::IsADirectory(node.name.clone()));
        };

        let start = to_usize(offset).min(content.len());
        let end = start.saturating_add(size).min(content.len());
        Ok(content[start..end].to_vec())
    }

    /// Full content of a file
    pub fn contents(&self, id: NodeId) -> Result<Vec<u8>, StoreError> {
        let node = self.node(id)?;
        node.data()
            .cloned()
            .ok_or_else(|| StoreError::IsADirectory(node.name.clone()))
    }

    /// Cut the content to `length` bytes, zero-padding when growing
    ///
    /// Lengths above [`MAX_FILE_SIZE`] are rejected.
    pub fn truncate(&mut self, id: NodeId, length: u64) -> Result<(), StoreError> {
        let node = self.node_mut(id)?;
        let NodeBody::File { data: content } = &mut node.body else {
            return Err(StoreError::IsADirectory(node.name.clone()));
        };

        resize_content(content, length, &node.name)?;
        node.meta.touch();
        Ok(())
    }

    /* Structure */

    /// Remove a file or an empty directory
    pub fn remove(&mut self, id: NodeId) -> Result<(), StoreError> {
        if id == NodeId::ROOT {
            return Err(StoreError::InvalidPath("/".to_string()));
        }

        let node = self.node(id)?;
        if node.children().is_some_and(|c| !c.is_empty()) {
            return Err(StoreError::DirectoryNotEmpty(node.name.clone()));
        }

        self.evict(id);
        Ok(())
    }

    /// Move the node at `old` to `new`, replacing a same-kind node there
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
        let old = path::normalize(old);
        let new = path::normalize(new);

        let id = self
            .resolve(&old)
            .ok_or_else(|| StoreError::NotFound(old.clone()))?;
        if id == NodeId::ROOT {
            return Err(StoreError::InvalidPath(old));
        }
        if old == new {
            return Ok(());
        }

        let (new_parent, new_name) = self.resolve_parent(&new)?;
        if self.is_ancestor(id, new_parent) {
            return Err(StoreError::InvalidPath(new.clone()));
        }

        let kind = self.node(id)?.kind();
        if let Some(existing) = self.lookup_child(new_parent, new_name) {
            let target = self.node(existing)?;
            match (kind, target.kind()) {
                (NodeKind::File, NodeKind::Directory) => {
                    return Err(StoreError::IsADirectory(new.clone()))
                }
                (NodeKind::Directory, NodeKind::File) => {
                    return Err(StoreError::NotADirectory(new.clone()))
                }
                _ => {}
            }
            if target.children().is_some_and(|c| !c.is_empty()) {
                return Err(StoreError::DirectoryNotEmpty(new.clone()));
            }
            self.evict(existing);
        }

        let node = self.node(id)?;
        let (old_parent, old_name) = (node.parent, node.name.clone());
        self.unlink(old_parent, &old_name, kind);
        self.link(new_parent, new_name, id, kind)?;

        let node = self.node_mut(id)?;
        node.name = new_name.to_string();
        node.parent = Some(new_parent);
        node.meta.ctime = SystemTime::now();
        Ok(())
    }

    /// Child names of a directory, preceded by `.` and `..`
    pub fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries(path)?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    /// Directory listing with ids and kinds, preceded by `.` and `..`
    pub fn entries(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        let id = self
            .resolve(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let node = self.node(id)?;
        let Some(children) = node.children() else {
            return Err(StoreError::NotADirectory(path.to_string()));
        };

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry {
            name: ".".to_string(),
            id,
            kind: NodeKind::Directory,
        });
        entries.push(DirEntry {
            name: "..".to_string(),
            id: node.parent.unwrap_or(NodeId::ROOT),
            kind: NodeKind::Directory,
        });

        for (name, child) in children {
            if let Some(child_node) = self.nodes.get(child) {
                entries.push(DirEntry {
                    name: name.clone(),
                    id: *child,
                    kind: child_node.kind(),
                });
            }
        }
        Ok(entries)
    }

    /* Metadata */

    pub fn set_mode(&mut self, id: NodeId, mode: u32) -> Result<(), StoreError> {
        let node = self.node_mut(id)?;
        node.meta.perm = (mode & 0o7777) as u16;
        node.meta.ctime = SystemTime::now();
        Ok(())
    }

    /// Set owner and/or group; `None` leaves the field alone
    pub fn set_owner(
        &mut self,
        id: NodeId,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), StoreError> {
        let node = self.node_mut(id)?;
        if uid.is_some() {
            node.meta.uid = uid;
        }
        if gid.is_some() {
            node.meta.gid = gid;
        }
        node.meta.ctime = SystemTime::now();
        Ok(())
    }

    pub fn set_times(
        &mut self,
        id: NodeId,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<(), StoreError> {
        let node = self.node_mut(id)?;
        if let Some(atime) = atime {
            node.meta.atime = atime;
        }
        if let Some(mtime) = mtime {
            node.meta.mtime = mtime;
        }
        Ok(())
    }

    pub fn get_xattr(&self, id: NodeId, name: &str) -> Result<Vec<u8>, StoreError> {
        self.node(id)?
            .meta
            .xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NoAttribute(name.to_string()))
    }

    pub fn set_xattr(&mut self, id: NodeId, name: &str, value: &[u8]) -> Result<(), StoreError> {
        let node = self.node_mut(id)?;
        node.meta.xattrs.insert(name.to_string(), value.to_vec());
        node.meta.ctime = SystemTime::now();
        Ok(())
    }

    pub fn remove_xattr(&mut self, id: NodeId, name: &str) -> Result<(), StoreError> {
        let node = self.node_mut(id)?;
        node.meta
            .xattrs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoAttribute(name.to_string()))
    }

    /// Attribute names, sorted
    pub fn list_xattrs(&self, id: NodeId) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.node(id)?.meta.xattrs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /* Inbound */

    /// Materialize a broker message at `segments`
    ///
    /// Missing directories are created, and anything standing in the way
    /// (a file where a directory is needed, a directory where the file goes)
    /// is replaced. An existing file keeps its id and gets the new content.
    /// `.` and `..` segments are rejected before anything changes.
    pub fn apply_inbound(&mut self, segments: &[&str], payload: &[u8]) -> Result<NodeId, StoreError> {
        let Some((file_name, dirs)) = segments.split_last() else {
            return Err(StoreError::InvalidPath(String::new()));
        };
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "." | "..")) {
            return Err(StoreError::InvalidPath(format!("{} in {}", bad, segments.join("/"))));
        }
        if payload.len() as u64 > MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge(segments.join("/")));
        }

        let mut current = NodeId::ROOT;
        for dir in dirs {
            current = match self.lookup_child(current, dir) {
                Some(child) if self.node(child)?.is_directory() => child,
                Some(child) => {
                    tracing::warn!(name = %dir, "inbound message replaces file with directory");
                    self.evict(child);
                    self.insert_child(current, dir, NodeKind::Directory, DEFAULT_DIR_MODE)?
                }
                None => self.insert_child(current, dir, NodeKind::Directory, DEFAULT_DIR_MODE)?,
            };
        }

        let id = match self.lookup_child(current, file_name) {
            Some(child) if !self.node(child)?.is_directory() => child,
            Some(child) => {
                tracing::warn!(name = %file_name, "inbound message replaces directory with file");
                self.evict(child);
                self.insert_child(current, file_name, NodeKind::File, DEFAULT_FILE_MODE)?
            }
            None => self.insert_child(current, file_name, NodeKind::File, DEFAULT_FILE_MODE)?,
        };

        let node = self.node_mut(id)?;
        if let Some(content) = node.data_mut() {
            content.clear();
            content.extend_from_slice(payload);
        }
        node.meta.touch();
        Ok(id)
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Resize file content to `length`, zero-filling, without aborting on a huge
/// allocation
fn resize_content(content: &mut Vec<u8>, length: u64, name: &str) -> Result<(), StoreError> {
    let too_large = || StoreError::FileTooLarge(name.to_string());
    if length > MAX_FILE_SIZE {
        return Err(too_large());
    }
    let length = usize::try_from(length).map_err(|_| too_large())?;

    if length > content.len() {
        content
            .try_reserve(length - content.len())
            .map_err(|_| too_large())?;
    }
    content.resize(length, 0);
    Ok(())
}
