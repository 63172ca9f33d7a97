//! `fuser::Filesystem` glue
//!
//! Node ids double as inode numbers (the root is 1 on both sides), so every
//! callback turns its inode back into a path with one parent walk and hands
//! off to the path-level methods in [`super::adapter`].

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use libc::c_int;

use common::store::{NodeAttr, NodeKind};

use super::adapter::{FsError, MqttFs};

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
    }
}

fn time_or_now(time: Option<TimeOrNow>) -> Option<SystemTime> {
    time.map(|t| match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    })
}

#[cfg(target_os = "linux")]
const RENAME_NOREPLACE: u32 = libc::RENAME_NOREPLACE;
// RENAME_EXCL from <sys/stdio.h>
#[cfg(target_os = "macos")]
const RENAME_NOREPLACE: u32 = 0x4;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const RENAME_NOREPLACE: u32 = 0;

/// Whether a rename must not replace its target
///
/// Any flag besides no-replace (exchange, whiteout) is unsupported.
fn rename_noreplace(flags: u32) -> Result<bool, FsError> {
    if flags & !RENAME_NOREPLACE != 0 {
        return Err(FsError::RenameFlags(flags));
    }
    Ok(flags & RENAME_NOREPLACE != 0)
}

/// Fit an attribute value or name list into the caller's buffer
///
/// A zero `size` asks for the length only.
fn reply_xattr(reply: ReplyXattr, size: u32, data: &[u8]) {
    if size == 0 {
        reply.size(data.len() as u32);
    } else if data.len() > size as usize {
        let error = FsError::BufferTooSmall {
            needed: data.len(),
            available: size as usize,
        };
        reply.error(error.errno());
    } else {
        reply.data(data);
    }
}

impl MqttFs {
    fn ttl(&self) -> Duration {
        self.attr_ttl
    }

    fn file_attr(&self, attr: &NodeAttr) -> FileAttr {
        FileAttr {
            ino: attr.id.as_u64(),
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.ctime,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid.unwrap_or(self.uid),
            gid: attr.gid.unwrap_or(self.gid),
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn attr_at(&self, ino: u64) -> Result<FileAttr, FsError> {
        let path = self.path_of(ino)?;
        Ok(self.file_attr(&self.getattr(&path)?))
    }

    /// Apply each requested change in turn, stopping at the first failure
    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr, FsError> {
        let path = self.path_of(ino)?;

        if let Some(mode) = mode {
            self.chmod(&path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.chown(&path, uid, gid)?;
        }
        if let Some(size) = size {
            self.truncate(&path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            self.utimens(&path, time_or_now(atime), time_or_now(mtime))?;
        }

        Ok(self.file_attr(&self.getattr(&path)?))
    }
}

impl Filesystem for MqttFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        self.start_sync().map_err(|e| {
            tracing::error!(error = %e, "failed to start sync engine");
            e.errno()
        })
    }

    fn destroy(&mut self) {
        self.stop_sync();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let fs = &*self;
        let result = fs
            .child_path(parent, name)
            .and_then(|path| fs.getattr(&path));
        match result {
            Ok(attr) => reply.entry(&fs.ttl(), &fs.file_attr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let fs = &*self;
        match fs.attr_at(ino) {
            Ok(attr) => reply.attr(&fs.ttl(), &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let fs = &*self;
        match fs.apply_setattr(ino, mode, uid, gid, size, atime, mtime) {
            Ok(attr) => reply.attr(&fs.ttl(), &attr),
            Err(e) => {
                tracing::debug!(ino, error = %e, "setattr failed");
                reply.error(e.errno())
            }
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let fs = &*self;
        match fs.path_of(ino).and_then(|path| fs.readlink(&path)) {
            Ok(target) => reply.data(&target),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let fs = &*self;
        let result = fs
            .child_path(parent, name)
            .and_then(|path| fs.mkdir(&path, mode));
        match result {
            Ok(attr) => reply.entry(&fs.ttl(), &fs.file_attr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let fs = &*self;
        match fs
            .child_path(parent, name)
            .and_then(|path| fs.unlink(&path))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let fs = &*self;
        match fs
            .child_path(parent, name)
            .and_then(|path| fs.rmdir(&path))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let fs = &*self;
        let result = fs.child_path(parent, name).and_then(|old| {
            let new = fs.child_path(newparent, newname)?;
            if rename_noreplace(flags)? {
                fs.rename_noreplace(&old, &new)
            } else {
                fs.rename(&old, &new)
            }
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let fs = &*self;
        match fs.path_of(ino).and_then(|path| fs.open(&path)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let fs = &*self;
        let offset = offset.max(0) as u64;
        match fs
            .path_of(ino)
            .and_then(|path| fs.read(&path, offset, size as usize))
        {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let fs = &*self;
        let offset = offset.max(0) as u64;
        match fs
            .path_of(ino)
            .and_then(|path| fs.write(&path, offset, data))
        {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                tracing::debug!(ino, error = %e, "write failed");
                reply.error(e.errno())
            }
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let fs = &*self;
        let result = fs.path_of(ino).and_then(|path| {
            let attr = fs.getattr(&path)?;
            if attr.kind != NodeKind::Directory {
                return Err(common::store::StoreError::NotADirectory(path).into());
            }
            Ok(fs.next_handle())
        });
        match result {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let fs = &*self;
        let entries = match fs.path_of(ino).and_then(|path| fs.readdir(&path)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        for (i, entry) in entries
            .iter()
            .enumerate()
            .skip(offset.max(0) as usize)
        {
            // Offset of the next entry to return
            let next = (i + 1) as i64;
            if reply.add(entry.id.as_u64(), next, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let fs = &*self;
        let stat = fs.statfs();
        reply.statfs(
            stat.blocks,
            stat.blocks_free,
            stat.blocks_available,
            stat.files,
            stat.files_free,
            stat.block_size,
            stat.name_len,
            stat.block_size,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let fs = &*self;
        let result = fs.path_of(ino).and_then(|path| {
            let name = xattr_name(name)?;
            fs.setxattr(&path, name, value)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let fs = &*self;
        let result = fs.path_of(ino).and_then(|path| {
            let name = xattr_name(name)?;
            fs.getxattr(&path, name)
        });
        match result {
            Ok(value) => reply_xattr(reply, size, &value),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let fs = &*self;
        match fs.path_of(ino).and_then(|path| fs.listxattr(&path)) {
            Ok(names) => {
                // NUL-terminated names, back to back
                let mut data = Vec::new();
                for name in names {
                    data.extend_from_slice(name.as_bytes());
                    data.push(0);
                }
                reply_xattr(reply, size, &data);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let fs = &*self;
        let result = fs.path_of(ino).and_then(|path| {
            let name = xattr_name(name)?;
            fs.removexattr(&path, name)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let fs = &*self;
        let result = fs
            .child_path(parent, name)
            .and_then(|path| fs.create(&path, mode));
        match result {
            Ok((attr, fh)) => reply.created(&fs.ttl(), &fs.file_attr(&attr), 0, fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }
}

fn xattr_name(name: &OsStr) -> Result<&str, FsError> {
    name.to_str()
        .ok_or_else(|| FsError::InvalidName(name.to_string_lossy().into_owned()))
}
