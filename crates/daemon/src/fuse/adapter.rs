//! Path-level filesystem operations over the shared node store
//!
//! Every kernel callback ends up in one of these methods once its inode has
//! been turned back into a path. Content changes are published to the broker
//! after the store has been updated; a failed publish is logged and never
//! fails the local operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::store::{path, DirEntry, NodeAttr, NodeId, NodeKind, NodeStore, StoreError};
use common::sync::{BrokerConnection, Publisher, SyncEngine, SyncError, SyncHandle, TopicMapper};

use crate::config::MountConfig;

/// Fixed capacity report; the store does not track real usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_len: u32,
}

const STATFS_BLOCK_SIZE: u32 = 512;
const STATFS_BLOCKS: u64 = 4096 * 1000;
const STATFS_BLOCKS_FREE: u64 = 2048 * 1000;
const STATFS_NAME_LEN: u32 = 255;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("name is not valid UTF-8: {0}")]
    InvalidName(String),
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),
    #[error("value of {needed} bytes does not fit in {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("unsupported rename flags: {0:#x}")]
    RenameFlags(u32),
    #[error("sync engine: {0}")]
    Sync(#[from] SyncError),
}

impl FsError {
    /// errno reported to the kernel
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::Store(e) => match e {
                StoreError::NotFound(_) => libc::ENOENT,
                StoreError::InvalidPath(_) => libc::EINVAL,
                StoreError::AlreadyExists(_) => libc::EEXIST,
                StoreError::NoAttribute(_) => NO_ATTRIBUTE,
                StoreError::NotADirectory(_) => libc::ENOTDIR,
                StoreError::IsADirectory(_) => libc::EISDIR,
                StoreError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
                StoreError::FileTooLarge(_) => libc::EFBIG,
            },
            FsError::InvalidName(_) | FsError::NotASymlink(_) | FsError::RenameFlags(_) => {
                libc::EINVAL
            }
            FsError::BufferTooSmall { .. } => libc::ERANGE,
            FsError::Sync(_) => libc::EIO,
        }
    }
}

#[cfg(target_os = "macos")]
const NO_ATTRIBUTE: libc::c_int = libc::ENOATTR;
#[cfg(not(target_os = "macos"))]
const NO_ATTRIBUTE: libc::c_int = libc::ENODATA;

fn not_found(path: &str) -> FsError {
    FsError::Store(StoreError::NotFound(path.to_string()))
}

/// MQTT-backed filesystem
///
/// Holds the shared store, the injected publisher and, until the mount
/// starts, the not-yet-running sync engine.
pub struct MqttFs {
    store: NodeStore,
    topics: TopicMapper,
    publisher: Arc<dyn Publisher>,
    engine: Option<SyncEngine>,
    sync: Option<SyncHandle>,
    next_fh: AtomicU64,
    pub(crate) attr_ttl: Duration,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
}

impl MqttFs {
    /// Filesystem without a sync engine; local changes are still published
    pub fn new(store: NodeStore, topics: TopicMapper, publisher: Arc<dyn Publisher>) -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            store,
            topics,
            publisher,
            engine: None,
            sync: None,
            next_fh: AtomicU64::new(1),
            attr_ttl: Duration::from_secs(1),
            uid,
            gid,
        }
    }

    /// Filesystem wired to a broker connection built from `config`
    ///
    /// Nothing connects until the kernel calls `init`.
    pub fn from_config(config: &MountConfig, token: &str) -> Self {
        let store = NodeStore::new();
        let topics = config.topics();
        let connection = BrokerConnection::new(&config.broker, token);
        let publisher = Arc::new(connection.publisher());
        let engine = SyncEngine::new(store.clone(), topics.clone(), connection);

        Self::new(store, topics, publisher)
            .with_engine(engine)
            .with_attr_ttl(config.attr_ttl())
    }

    pub fn with_engine(mut self, engine: SyncEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /* Getters */

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn topics(&self) -> &TopicMapper {
        &self.topics
    }

    /* Lifecycle */

    /// Start the sync engine, if one was attached
    pub fn start_sync(&mut self) -> Result<(), FsError> {
        let Some(engine) = self.engine.take() else {
            return Ok(());
        };

        tracing::info!(subscription = %self.topics.subscription(), "starting sync engine");
        self.sync = Some(engine.spawn()?);
        Ok(())
    }

    /// Disconnect from the broker and wait for the sync engine to finish
    pub fn stop_sync(&mut self) {
        let Some(handle) = self.sync.take() else {
            return;
        };

        tracing::info!(status = %handle.status(), "stopping sync engine");
        match handle.shutdown() {
            Ok(()) => tracing::info!("sync engine stopped"),
            Err(e) => tracing::warn!(error = %e, "sync engine ended with error"),
        }
    }

    /// Fresh handle for `open`/`create`; never 0 and never reused
    pub fn next_handle(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn resolve(&self, path: &str) -> Result<NodeId, FsError> {
        self.store.resolve(path).ok_or_else(|| not_found(path))
    }

    fn publish(&self, path: &str, payload: Vec<u8>) {
        let topic = self.topics.path_to_topic(path);
        let bytes = payload.len();
        match self.publisher.publish(&topic, payload) {
            Ok(()) => tracing::debug!(%topic, bytes, "published"),
            Err(e) => tracing::warn!(%topic, error = %e, "dropping publish"),
        }
    }

    /* Attributes */

    pub fn getattr(&self, path: &str) -> Result<NodeAttr, FsError> {
        let id = self.resolve(path)?;
        self.store.attr(id).ok_or_else(|| not_found(path))
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let id = self.resolve(path)?;
        Ok(self.store.set_mode(id, mode)?)
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), FsError> {
        let id = self.resolve(path)?;
        Ok(self.store.set_owner(id, uid, gid)?)
    }

    pub fn utimens(
        &self,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<(), FsError> {
        let id = self.resolve(path)?;
        Ok(self.store.set_times(id, atime, mtime)?)
    }

    /* Directories */

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<NodeAttr, FsError> {
        let id = self.store.create_directory(path, mode)?;
        tracing::debug!(path, %id, "created directory");
        self.store.attr(id).ok_or_else(|| not_found(path))
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        Ok(self.store.entries(path)?)
    }

    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let id = self.resolve(path)?;
        if self.store.attr(id).is_some_and(|a| a.kind != NodeKind::Directory) {
            return Err(StoreError::NotADirectory(path.to_string()).into());
        }
        self.store.remove(id)?;
        tracing::debug!(path, "removed directory");
        Ok(())
    }

    /* Files */

    /// Create an empty file and announce it with an empty retained payload
    pub fn create(&self, path: &str, mode: u32) -> Result<(NodeAttr, u64), FsError> {
        let id = self.store.create_file(path, mode)?;
        let attr = self.store.attr(id).ok_or_else(|| not_found(path))?;
        tracing::debug!(path, %id, "created file");

        self.publish(path, Vec::new());
        Ok((attr, self.next_handle()))
    }

    pub fn open(&self, path: &str) -> Result<u64, FsError> {
        self.resolve(path)?;
        Ok(self.next_handle())
    }

    pub fn read(&self, path: &str, offset: u64, size: usize) -> Result<Vec<u8>, FsError> {
        let id = self.resolve(path)?;
        Ok(self.store.read(id, offset, size)?)
    }

    /// Write at `offset`, then publish the file's whole new content
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let id = self.resolve(path)?;
        let content = self.store.update(|tree| -> Result<_, StoreError> {
            tree.write(id, offset, data)?;
            tree.contents(id)
        })?;

        tracing::debug!(path, offset, len = data.len(), size = content.len(), "wrote");
        self.publish(path, content);
        Ok(data.len())
    }

    /// Resize, then publish the file's whole new content
    pub fn truncate(&self, path: &str, length: u64) -> Result<(), FsError> {
        let id = self.resolve(path)?;
        let content = self.store.update(|tree| -> Result<_, StoreError> {
            tree.truncate(id, length)?;
            tree.contents(id)
        })?;

        tracing::debug!(path, length, "truncated");
        self.publish(path, content);
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        let id = self.resolve(path)?;
        if self.store.attr(id).is_some_and(|a| a.kind == NodeKind::Directory) {
            return Err(StoreError::IsADirectory(path.to_string()).into());
        }
        self.store.remove(id)?;
        tracing::debug!(path, "removed file");
        Ok(())
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        self.store.rename(old, new)?;
        tracing::debug!(old, new, "renamed");
        Ok(())
    }

    /// Rename that fails with `AlreadyExists` instead of replacing `new`
    pub fn rename_noreplace(&self, old: &str, new: &str) -> Result<(), FsError> {
        self.store.update(|tree| {
            if tree.resolve(old).is_some() && tree.resolve(new).is_some() {
                return Err(StoreError::AlreadyExists(new.to_string()));
            }
            tree.rename(old, new)
        })?;
        tracing::debug!(old, new, "renamed without replacing");
        Ok(())
    }

    /// There are no symbolic links; any existing node is rejected
    pub fn readlink(&self, path: &str) -> Result<Vec<u8>, FsError> {
        self.resolve(path)?;
        Err(FsError::NotASymlink(path.to_string()))
    }

    /* Extended attributes */

    // Every xattr call reports a missing node as `NoAttribute`

    fn resolve_for_xattr(&self, path: &str, name: &str) -> Result<NodeId, FsError> {
        self.store
            .resolve(path)
            .ok_or_else(|| StoreError::NoAttribute(name.to_string()).into())
    }

    pub fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>, FsError> {
        let id = self.resolve_for_xattr(path, name)?;
        Ok(self.store.get_xattr(id, name)?)
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> Result<(), FsError> {
        let id = self.resolve_for_xattr(path, name)?;
        Ok(self.store.set_xattr(id, name, value)?)
    }

    pub fn listxattr(&self, path: &str) -> Result<Vec<String>, FsError> {
        let id = self.resolve_for_xattr(path, path)?;
        Ok(self.store.list_xattrs(id)?)
    }

    pub fn removexattr(&self, path: &str, name: &str) -> Result<(), FsError> {
        let id = self.resolve_for_xattr(path, name)?;
        Ok(self.store.remove_xattr(id, name)?)
    }

    /* Filesystem */

    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: STATFS_BLOCK_SIZE,
            blocks: STATFS_BLOCKS,
            blocks_free: STATFS_BLOCKS_FREE,
            blocks_available: STATFS_BLOCKS_FREE,
            files: self.store.view(|tree| tree.len()) as u64,
            files_free: 0,
            name_len: STATFS_NAME_LEN,
        }
    }

    /// Absolute path of an inode
    pub(crate) fn path_of(&self, ino: u64) -> Result<String, FsError> {
        self.store
            .path_of(NodeId::from_raw(ino))
            .ok_or_else(|| not_found(&format!("inode {}", ino)))
    }

    /// Absolute path of `name` inside the directory at inode `parent`
    pub(crate) fn child_path(&self, parent: u64, name: &std::ffi::OsStr) -> Result<String, FsError> {
        let name = name
            .to_str()
            .ok_or_else(|| FsError::InvalidName(name.to_string_lossy().into_owned()))?;
        Ok(path::join(&self.path_of(parent)?, name))
    }
}

impl std::fmt::Debug for MqttFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttFs")
            .field("topics", &self.topics)
            .field("publisher", &self.publisher)
            .field("syncing", &self.sync.is_some())
            .finish_non_exhaustive()
    }
}
