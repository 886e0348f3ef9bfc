use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// An open file or directory. Holds only the inode number: every access
/// re-resolves the entry, so a handle never outlives what it points at.
#[derive(Debug, Clone)]
pub struct HandleState {
    pub fh: u64,
    pub ino: u64,
    pub is_dir: bool,
}

/// Why a handle was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// Not open, or open on a different inode.
    Unknown,
    /// A directory handle used for file I/O.
    IsDirectory,
    /// A file handle used for a directory listing.
    NotDirectory,
}

pub struct HandleTable {
    handles: DashMap<u64, HandleState>,
    next_fh: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self, ino: u64, is_dir: bool) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, HandleState { fh, ino, is_dir });
        fh
    }

    /// The handle `fh`, if it is open on `ino` and was opened as a directory
    /// exactly when `want_dir` is set.
    pub fn validate(&self, fh: u64, ino: u64, want_dir: bool) -> Result<HandleState, HandleError> {
        let handle = self
            .handles
            .get(&fh)
            .filter(|h| h.ino == ino)
            .map(|h| h.value().clone())
            .ok_or(HandleError::Unknown)?;
        match (handle.is_dir, want_dir) {
            (true, false) => Err(HandleError::IsDirectory),
            (false, true) => Err(HandleError::NotDirectory),
            _ => Ok(handle),
        }
    }

    pub fn remove(&self, fh: u64) -> Option<HandleState> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }

    /// Every open handle, for reporting a busy mount.
    pub fn list_open(&self) -> Vec<HandleState> {
        let mut open: Vec<HandleState> = self.handles.iter().map(|h| h.value().clone()).collect();
        open.sort_by_key(|h| h.fh);
        open
    }
}
