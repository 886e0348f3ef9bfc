use std::num::NonZeroUsize;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::entry::{self, Attributes, DirEntry, Entry, EntryKind, Timestamp};
use super::path;
use super::snapshot;
use super::table::EntryTable;
use crate::error::{Result, SnapfsError};

/// The entry table behind a single lock, with the filesystem operations on top.
///
/// Every public method takes the lock exactly once, so each operation is one
/// atomic critical section and no caller observes another's partial effect.
/// Preconditions are checked before any mutation: a failing operation leaves
/// the table as it found it.
pub struct Store {
    table: Mutex<EntryTable>,
    root_time: Timestamp,
    clock: fn() -> Timestamp,
}

impl Store {
    pub fn new(table: EntryTable) -> Self {
        Self::with_clock(table, entry::now)
    }

    /// Build a store that reads time from `clock` instead of the wall clock.
    pub fn with_clock(table: EntryTable, clock: fn() -> Timestamp) -> Self {
        Self {
            table: Mutex::new(table),
            root_time: clock(),
            clock,
        }
    }

    pub fn empty(capacity: NonZeroUsize) -> Self {
        Self::new(EntryTable::new(capacity))
    }

    fn now(&self) -> Timestamp {
        (self.clock)()
    }

    pub fn create(&self, full_path: &str, kind: EntryKind) -> Result<()> {
        let now = self.now();
        let mut table = self.table.lock();
        if table.exists(full_path) {
            return Err(SnapfsError::AlreadyExists(full_path.to_string()));
        }
        let entry = Entry::new(full_path, kind, now)?;
        table.insert(entry)?;
        debug!("create {} ({:?})", full_path, kind);
        Ok(())
    }

    /// Remove an entry and release its content. A missing path is success, so
    /// cleanup can be repeated safely.
    pub fn delete(&self, full_path: &str) -> Result<()> {
        let mut table = self.table.lock();
        if table.remove(full_path).is_some() {
            debug!("delete {}", full_path);
        }
        Ok(())
    }

    /// Like [`Store::delete`], but only for directories, and refuses one that
    /// still has children.
    pub fn remove_dir(&self, full_path: &str) -> Result<()> {
        let mut table = self.table.lock();
        match table.lookup(full_path) {
            None => return Ok(()),
            Some(entry) if !entry.is_dir() => {
                return Err(SnapfsError::NotADirectory(full_path.to_string()));
            }
            Some(_) => {}
        }
        if table.children_of(full_path).next().is_some() {
            return Err(SnapfsError::NotEmpty(full_path.to_string()));
        }
        table.remove(full_path);
        debug!("remove_dir {}", full_path);
        Ok(())
    }

    /// The first `min(len, size)` bytes of content. Always reads from byte 0.
    pub fn read(&self, full_path: &str, len: usize) -> Result<Vec<u8>> {
        let now = self.now();
        let mut table = self.table.lock();
        let entry = table
            .lookup_mut(full_path)
            .ok_or_else(|| SnapfsError::NotFound(full_path.to_string()))?;
        if entry.is_dir() {
            return Err(SnapfsError::IsDirectory(full_path.to_string()));
        }
        let n = len.min(entry.content().len());
        let data = entry::alloc_copy(&entry.content()[..n])?;
        entry.atime = now;
        Ok(data)
    }

    /// Replace the whole content buffer with `bytes`.
    pub fn write(&self, full_path: &str, bytes: &[u8]) -> Result<usize> {
        let now = self.now();
        let mut table = self.table.lock();
        let entry = table
            .lookup_mut(full_path)
            .ok_or_else(|| SnapfsError::NotFound(full_path.to_string()))?;
        if entry.is_dir() {
            return Err(SnapfsError::IsDirectory(full_path.to_string()));
        }
        let content = entry::alloc_copy(bytes)?;
        entry.set_content(content)?;
        entry.mtime = now;
        entry.atime = now;
        debug!("write {} ({} bytes)", full_path, bytes.len());
        Ok(bytes.len())
    }

    /// Resize content to `new_size`, keeping the common prefix and zero-filling
    /// any new tail.
    pub fn truncate(&self, full_path: &str, new_size: u64) -> Result<()> {
        let now = self.now();
        let new_len = usize::try_from(new_size).map_err(|_| SnapfsError::OutOfMemory {
            requested: usize::MAX,
        })?;
        let mut table = self.table.lock();
        let entry = table
            .lookup_mut(full_path)
            .ok_or_else(|| SnapfsError::NotFound(full_path.to_string()))?;
        if entry.is_dir() {
            return Err(SnapfsError::IsDirectory(full_path.to_string()));
        }
        let mut content = entry::alloc_zeroed(new_len)?;
        let keep = new_len.min(entry.content().len());
        content[..keep].copy_from_slice(&entry.content()[..keep]);
        entry.set_content(content)?;
        entry.mtime = now;
        entry.atime = now;
        debug!("truncate {} to {}", full_path, new_size);
        Ok(())
    }

    /// Move `from` to `to`, destroying whatever lived at `to`.
    ///
    /// A directory takes its descendants along, and any subtree previously
    /// under `to` is destroyed with it.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let now = self.now();
        let mut table = self.table.lock();
        if table.lookup(from).is_none() {
            return Err(SnapfsError::NotFound(from.to_string()));
        }
        if from == to {
            return Ok(());
        }
        if !path::is_entry_key(to) || path::is_within(to, from) || path::is_within(from, to) {
            return Err(SnapfsError::InvalidPath(to.to_string()));
        }

        let mut moved: Vec<(String, String)> = vec![(from.to_string(), to.to_string())];
        moved.extend(
            table
                .descendant_keys(from)
                .into_iter()
                .map(|key| {
                    let new_key = path::rebase(&key, from, to);
                    (key, new_key)
                }),
        );

        let mut replaced = table.descendant_keys(to);
        replaced.push(to.to_string());
        for key in &replaced {
            if table.remove(key).is_some() {
                debug!("rename {} -> {}: replaced {}", from, to, key);
            }
        }

        let mut entries = Vec::with_capacity(moved.len());
        for (old_key, new_key) in &moved {
            if let Some(mut entry) = table.remove(old_key) {
                entry.rekey(new_key)?;
                if old_key == from {
                    entry.mtime = now;
                    entry.atime = now;
                }
                entries.push(entry);
            }
        }
        for entry in entries {
            table.reinsert(entry);
        }
        debug!("rename {} -> {} ({} entries moved)", from, to, moved.len());
        Ok(())
    }

    /// Set both timestamps verbatim.
    pub fn touch(&self, full_path: &str, atime: Timestamp, mtime: Timestamp) -> Result<()> {
        let mut table = self.table.lock();
        let entry = table
            .lookup_mut(full_path)
            .ok_or_else(|| SnapfsError::NotFound(full_path.to_string()))?;
        entry.atime = atime;
        entry.mtime = mtime;
        Ok(())
    }

    /// `"."`, `".."`, then the name of every child of `dir_path`.
    pub fn list(&self, dir_path: &str) -> Result<Vec<String>> {
        let children = self.read_dir(dir_path)?;
        let mut names = Vec::with_capacity(children.len() + 2);
        names.push(".".to_string());
        names.push("..".to_string());
        names.extend(children.into_iter().map(|c| c.name));
        Ok(names)
    }

    /// Children of `dir_path` with their kinds, without the dot entries.
    pub fn read_dir(&self, dir_path: &str) -> Result<Vec<DirEntry>> {
        let table = self.table.lock();
        if !table.exists(dir_path) {
            return Err(SnapfsError::NotFound(dir_path.to_string()));
        }
        Ok(table
            .children_of(dir_path)
            .map(|e| DirEntry {
                name: e.name().to_string(),
                kind: e.kind(),
            })
            .collect())
    }

    pub fn stat(&self, full_path: &str) -> Result<Attributes> {
        if full_path == path::ROOT {
            return Ok(Attributes::root(self.root_time));
        }
        let table = self.table.lock();
        table
            .lookup(full_path)
            .map(Entry::attributes)
            .ok_or_else(|| SnapfsError::NotFound(full_path.to_string()))
    }

    pub fn exists(&self, full_path: &str) -> bool {
        self.table.lock().exists(full_path)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().capacity()
    }

    /// Encode the whole table in snapshot format while holding the lock.
    pub fn encode_snapshot(&self) -> Result<Vec<u8>> {
        self.encode_counted().map(|(buf, _)| buf)
    }

    fn encode_counted(&self) -> Result<(Vec<u8>, usize)> {
        let table = self.table.lock();
        let mut buf = Vec::new();
        snapshot::encode(&table, &mut buf)?;
        Ok((buf, table.len()))
    }

    /// Write the current table to `path` and return how many entries were
    /// written. The lock is held while encoding and released before any file
    /// I/O.
    pub fn save_to(&self, path: &Path) -> Result<usize> {
        let (bytes, count) = self.encode_counted()?;
        snapshot::write_atomic(path, &bytes)?;
        info!("Saved {} entries to {}", count, path.display());
        Ok(count)
    }

    /// A copy of the current table.
    pub fn table(&self) -> EntryTable {
        self.table.lock().clone()
    }

    pub fn into_table(self) -> EntryTable {
        self.table.into_inner()
    }
}
