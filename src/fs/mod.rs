pub mod attr;
pub mod handles;
pub mod inodes;

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    AccessFlags, BsdFileFlags, Errno, FileAttr, FileHandle, FileType, Filesystem, FopenFlags,
    Generation, INodeNo, KernelConfig, LockOwner, OpenFlags, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, RenameFlags,
    Request, TimeOrNow, WriteFlags,
};
use tracing::{debug, info, warn};

use self::attr::*;
use self::handles::{HandleError, HandleTable};
use self::inodes::{InodeTable, ROOT_INO};
use crate::error::SnapfsError;
use crate::state::{entry, path, EntryKind, Store};

const TTL: Duration = Duration::from_secs(1);
const NAME_MAX: u32 = 255;

/// Map a store error onto the errno the kernel expects.
pub fn to_errno(err: &SnapfsError) -> Errno {
    let code = match err {
        SnapfsError::NotFound(_) => libc::ENOENT,
        SnapfsError::AlreadyExists(_) => libc::EEXIST,
        SnapfsError::CapacityExceeded { .. } => libc::ENOSPC,
        SnapfsError::OutOfMemory { .. } => libc::ENOMEM,
        SnapfsError::IsDirectory(_) => libc::EISDIR,
        SnapfsError::NotADirectory(_) => libc::ENOTDIR,
        SnapfsError::NotEmpty(_) => libc::ENOTEMPTY,
        SnapfsError::InvalidPath(_) => libc::EINVAL,
        SnapfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        SnapfsError::CorruptSnapshot(_) => libc::EIO,
    };
    Errno::from(std::io::Error::from_raw_os_error(code))
}

fn handle_errno(err: HandleError) -> Errno {
    match err {
        HandleError::Unknown => Errno::EBADF,
        HandleError::IsDirectory => Errno::EISDIR,
        HandleError::NotDirectory => Errno::ENOTDIR,
    }
}

/// The kernel-facing adapter. Translates inode-addressed FUSE callbacks into
/// path-addressed store operations.
pub struct SnapFs {
    pub store: Arc<Store>,
    /// Inode table mapping inodes <-> entry keys.
    pub inodes: Arc<InodeTable>,
    /// Open file and directory handles.
    pub file_handles: Arc<HandleTable>,
}

impl SnapFs {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            inodes: Arc::new(InodeTable::new()),
            file_handles: Arc::new(HandleTable::new()),
        }
    }

    fn path_of(&self, ino: u64) -> Result<String, Errno> {
        self.inodes.get_path(ino).ok_or(Errno::ENOENT)
    }

    /// Key of `name` inside the directory `parent`.
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, Errno> {
        let parent_path = self.path_of(parent)?;
        let name = name.to_str().ok_or(Errno::EINVAL)?;
        if name.is_empty() || name.contains('/') {
            return Err(Errno::EINVAL);
        }
        Ok(path::join(&parent_path, name))
    }

    /// Stat `path` and register it in the inode table.
    fn lookup_and_register(&self, path: &str) -> Result<FileAttr, Errno> {
        let attrs = self.store.stat(path).map_err(|e| to_errno(&e))?;
        let ino = self.inodes.get_or_alloc(path);
        Ok(to_file_attr(ino, &attrs))
    }

    fn attr_for(&self, ino: u64, path: &str) -> Result<FileAttr, Errno> {
        let attrs = self.store.stat(path).map_err(|e| to_errno(&e))?;
        Ok(to_file_attr(ino, &attrs))
    }

    fn create_entry(&self, parent: u64, name: &OsStr, kind: EntryKind) -> Result<(String, FileAttr), Errno> {
        let child = self.child_path(parent, name)?;
        if let Err(e) = self.store.create(&child, kind) {
            warn!("create {} failed: {}", child, e);
            return Err(to_errno(&e));
        }
        let attr = self.lookup_and_register(&child)?;
        Ok((child, attr))
    }

    /// Apply setattr size and time changes to `path`.
    fn apply_setattr(
        &self,
        path: &str,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<(), SnapfsError> {
        if let Some(new_size) = size {
            self.store.truncate(path, new_size)?;
        }
        if atime.is_some() || mtime.is_some() {
            let now = entry::now();
            let current = self.store.stat(path)?;
            let atime = atime.map_or(current.atime, |t| resolve_time(t, now));
            let mtime = mtime.map_or(current.mtime, |t| resolve_time(t, now));
            self.store.touch(path, atime, mtime)?;
        }
        Ok(())
    }
}

impl Filesystem for SnapFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::io::Result<()> {
        info!(
            "snapfs filesystem initialized, entries={}, capacity={}",
            self.store.len(),
            self.store.capacity()
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!("snapfs filesystem shutting down");
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let parent = u64::from(parent);
        debug!("lookup(parent={}, name={:?})", parent, name);

        let child = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.lookup_and_register(&child) {
            Ok(attr) => reply.entry(&TTL, &attr, Generation(0)),
            Err(e) => reply.error(e),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let ino = u64::from(ino);
        debug!("getattr(ino={})", ino);

        let result = self.path_of(ino).and_then(|p| self.attr_for(ino, &p));
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let ino = u64::from(ino);
        debug!("setattr(ino={}, size={:?})", ino, size);

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        // The root is a fixed descriptor; mode and ownership are fixed for
        // everything.
        if ino != ROOT_INO {
            if let Err(e) = self.apply_setattr(&path, size, atime, mtime) {
                warn!("setattr {} failed: {}", path, e);
                reply.error(to_errno(&e));
                return;
            }
        }

        match self.attr_for(ino, &path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        let ino = u64::from(ino);
        let raw_flags = flags.0;
        debug!("open(ino={}, flags={})", ino, raw_flags);

        let attr = match self.path_of(ino).and_then(|p| self.attr_for(ino, &p)) {
            Ok(a) => a,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        if attr.kind == FileType::Directory {
            reply.error(Errno::from(std::io::Error::from_raw_os_error(libc::EISDIR)));
            return;
        }

        let fh = self.file_handles.alloc(ino, false);
        reply.opened(FileHandle(fh), FopenFlags::empty());
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        let ino = u64::from(ino);
        let fh = u64::from(fh);
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        if let Err(e) = self.file_handles.validate(fh, ino, false) {
            reply.error(handle_errno(e));
            return;
        }
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        // The store always reads from byte 0; ask for enough to cover the
        // requested window and hand back the part past `offset`.
        let start = offset as usize;
        let wanted = start.saturating_add(size as usize);
        match self.store.read(&path, wanted) {
            Ok(data) if start >= data.len() => reply.data(&[]),
            Ok(data) => reply.data(&data[start..]),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        let ino = u64::from(ino);
        let fh = u64::from(fh);
        debug!("write(ino={}, fh={}, offset={}, size={})", ino, fh, offset, data.len());

        if let Err(e) = self.file_handles.validate(fh, ino, false) {
            reply.error(handle_errno(e));
            return;
        }
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        // Writes replace the whole buffer; `offset` is not applied.
        match self.store.write(&path, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => {
                warn!("write {} failed: {}", path, e);
                reply.error(to_errno(&e));
            }
        }
    }

    fn flush(&self, _req: &Request, ino: INodeNo, fh: FileHandle, _lock_owner: LockOwner, reply: ReplyEmpty) {
        debug!("flush(ino={}, fh={})", u64::from(ino), u64::from(fh));
        reply.ok();
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let fh = u64::from(fh);
        debug!("release(fh={})", fh);
        self.file_handles.remove(fh);
        reply.ok();
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let ino = u64::from(ino);
        debug!("opendir(ino={})", ino);

        let attr = match self.path_of(ino).and_then(|p| self.attr_for(ino, &p)) {
            Ok(a) => a,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        if attr.kind != FileType::Directory {
            reply.error(Errno::from(std::io::Error::from_raw_os_error(libc::ENOTDIR)));
            return;
        }

        let fh = self.file_handles.alloc(ino, true);
        reply.opened(FileHandle(fh), FopenFlags::empty());
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let ino = u64::from(ino);
        let fh = u64::from(fh);
        debug!("readdir(ino={}, fh={}, offset={})", ino, fh, offset);

        if let Err(e) = self.file_handles.validate(fh, ino, true) {
            reply.error(handle_errno(e));
            return;
        }

        let dir = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let children = match self.store.read_dir(&dir) {
            Ok(c) => c,
            Err(e) => {
                reply.error(to_errno(&e));
                return;
            }
        };

        let parent_ino = if ino == ROOT_INO {
            ROOT_INO
        } else {
            self.inodes.get_ino(path::parent_of(&dir)).unwrap_or(ROOT_INO)
        };

        let mut all_entries: Vec<(u64, FileType, String)> = Vec::with_capacity(children.len() + 2);
        all_entries.push((ino, FileType::Directory, ".".to_string()));
        all_entries.push((parent_ino, FileType::Directory, "..".to_string()));
        for child in children {
            let child_ino = self.inodes.get_or_alloc(&path::join(&dir, &child.name));
            all_entries.push((child_ino, kind_to_filetype(child.kind), child.name));
        }

        for (i, (entry_ino, kind, name)) in all_entries.iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(*entry_ino), (i + 1) as u64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&self, _req: &Request, _ino: INodeNo, fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        let fh = u64::from(fh);
        debug!("releasedir(fh={})", fh);
        self.file_handles.remove(fh);
        reply.ok();
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let parent = u64::from(parent);
        debug!(
            "create(parent={}, name={:?}, mode={:#o}, flags={:#x})",
            parent, name, mode, flags
        );

        match self.create_entry(parent, name, EntryKind::File) {
            Ok((_, attr)) => {
                let fh = self.file_handles.alloc(u64::from(attr.ino), false);
                reply.created(&TTL, &attr, Generation(0), FileHandle(fh), FopenFlags::empty());
            }
            Err(e) => reply.error(e),
        }
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let parent = u64::from(parent);
        debug!("mkdir(parent={}, name={:?}, mode={:#o})", parent, name, mode);

        match self.create_entry(parent, name, EntryKind::Directory) {
            Ok((_, attr)) => reply.entry(&TTL, &attr, Generation(0)),
            Err(e) => reply.error(e),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let parent = u64::from(parent);
        debug!("unlink(parent={}, name={:?})", parent, name);

        let child = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.store.delete(&child) {
            Ok(()) => {
                self.inodes.remove_by_path(&child);
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let parent = u64::from(parent);
        debug!("rmdir(parent={}, name={:?})", parent, name);

        let child = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.store.remove_dir(&child) {
            Ok(()) => {
                self.inodes.remove_tree(&child);
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        _flags: RenameFlags,
        reply: ReplyEmpty,
    ) {
        let parent = u64::from(parent);
        let newparent = u64::from(newparent);
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent, name, newparent, newname
        );

        let paths = self
            .child_path(parent, name)
            .and_then(|from| self.child_path(newparent, newname).map(|to| (from, to)));
        let (from, to) = match paths {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        match self.store.rename(&from, &to) {
            Ok(()) => {
                if from != to {
                    self.inodes.rename_tree(&from, &to);
                }
                reply.ok();
            }
            Err(e) => {
                warn!("rename {} -> {} failed: {}", from, to, e);
                reply.error(to_errno(&e));
            }
        }
    }

    fn link(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _newparent: INodeNo,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(Errno::ENOTSUP);
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        let capacity = self.store.capacity() as u64;
        let used = self.store.len() as u64;
        reply.statfs(
            0,
            0,
            0,
            capacity,
            capacity.saturating_sub(used),
            512,
            NAME_MAX,
            512,
        );
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        let ino = u64::from(ino);
        debug!("access(ino={}, mask={:?})", ino, mask);

        // Modes are fixed, so anything that exists is accessible.
        match self.path_of(ino) {
            Ok(p) if self.store.exists(&p) => reply.ok(),
            Ok(_) => reply.error(Errno::ENOENT),
            Err(e) => reply.error(e),
        }
    }
}
