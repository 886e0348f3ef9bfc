use chrono::Utc;
use serde::Serialize;

use super::path;
use crate::error::{Result, SnapfsError};

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time at seconds resolution.
pub fn now() -> Timestamp {
    Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One file or directory record.
///
/// Identity fields are private so `parent_path` and `name` always match what
/// [`path::split`] derives from `full_path`, and a file's size is always the
/// length of its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    full_path: String,
    parent_path: String,
    name: String,
    kind: EntryKind,
    content: Vec<u8>,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl Entry {
    /// A new empty entry with all three timestamps set to `at`.
    pub fn new(full_path: &str, kind: EntryKind, at: Timestamp) -> Result<Self> {
        if !path::is_entry_key(full_path) {
            return Err(SnapfsError::InvalidPath(full_path.to_string()));
        }
        let (parent, name) = path::split(full_path);
        Ok(Self {
            full_path: full_path.to_string(),
            parent_path: parent.to_string(),
            name: name.to_string(),
            kind,
            content: Vec::new(),
            atime: at,
            mtime: at,
            ctime: at,
        })
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Always 0 for directories.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the content buffer. Directories never carry content.
    pub fn set_content(&mut self, content: Vec<u8>) -> Result<()> {
        if self.is_dir() {
            return Err(SnapfsError::IsDirectory(self.full_path.clone()));
        }
        self.content = content;
        Ok(())
    }

    /// Re-derive identity fields from a new key.
    pub fn rekey(&mut self, full_path: &str) -> Result<()> {
        if !path::is_entry_key(full_path) {
            return Err(SnapfsError::InvalidPath(full_path.to_string()));
        }
        let (parent, name) = path::split(full_path);
        self.parent_path = parent.to_string();
        self.name = name.to_string();
        self.full_path = full_path.to_string();
        Ok(())
    }

    pub fn attributes(&self) -> Attributes {
        Attributes {
            kind: self.kind,
            size: self.size(),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}

/// What `stat` reports about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub kind: EntryKind,
    pub size: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl Attributes {
    /// The fixed descriptor reported for `/`.
    pub fn root(at: Timestamp) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            atime: at,
            mtime: at,
            ctime: at,
        }
    }
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Allocate a zeroed buffer of `len` bytes, reporting failure instead of aborting.
pub fn alloc_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| SnapfsError::OutOfMemory { requested: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Copy `bytes` into a freshly allocated buffer.
pub fn alloc_copy(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes.len())
        .map_err(|_| SnapfsError::OutOfMemory {
            requested: bytes.len(),
        })?;
    buf.extend_from_slice(bytes);
    Ok(buf)
}
