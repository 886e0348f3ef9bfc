/// Conversions between store attributes and fuser types.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType, INodeNo, TimeOrNow};

use crate::state::{Attributes, EntryKind, Timestamp};

pub const FILE_PERM: u16 = 0o777;
pub const DIR_PERM: u16 = 0o755;
const BLOCK_SIZE: u32 = 512;

pub fn kind_to_filetype(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
    }
}

/// Build the kernel attribute structure for an entry. Permissions are fixed
/// per kind; the mounting user owns everything.
pub fn to_file_attr(ino: u64, attrs: &Attributes) -> FileAttr {
    let (perm, nlink) = match attrs.kind {
        EntryKind::File => (FILE_PERM, 1),
        EntryKind::Directory => (DIR_PERM, 2),
    };
    FileAttr {
        ino: INodeNo(ino),
        size: attrs.size,
        blocks: attrs.size.div_ceil(BLOCK_SIZE as u64),
        atime: system_time_from_secs(attrs.atime),
        mtime: system_time_from_secs(attrs.mtime),
        ctime: system_time_from_secs(attrs.ctime),
        crtime: system_time_from_secs(attrs.ctime),
        kind: kind_to_filetype(attrs.kind),
        perm,
        nlink,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

pub fn system_time_from_secs(secs: Timestamp) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

pub fn secs_from_system_time(t: SystemTime) -> Timestamp {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as Timestamp,
        Err(e) => -(e.duration().as_secs() as Timestamp),
    }
}

/// Resolve a setattr time argument against the current clock.
pub fn resolve_time(t: TimeOrNow, now: Timestamp) -> Timestamp {
    match t {
        TimeOrNow::SpecificTime(st) => secs_from_system_time(st),
        TimeOrNow::Now => now,
    }
}
