use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::DateTime;
use serde::Serialize;

use super::entry::{Entry, EntryKind, Timestamp};
use super::path;
use crate::error::{Result, SnapfsError};

/// Serializable view of an entry, used by `snapfs inspect`.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub atime: String,
    pub mtime: String,
    pub ctime: String,
}

fn rfc3339(ts: Timestamp) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// The authoritative keyed store of every entry except the implicit root.
#[derive(Debug, Clone)]
pub struct EntryTable {
    entries: HashMap<String, Entry>,
    capacity: usize,
}

impl EntryTable {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.get(),
        }
    }

    /// Pure read: never touches timestamps.
    pub fn lookup(&self, full_path: &str) -> Option<&Entry> {
        self.entries.get(full_path)
    }

    pub fn lookup_mut(&mut self, full_path: &str) -> Option<&mut Entry> {
        self.entries.get_mut(full_path)
    }

    /// Add a new entry. Never overwrites; delete first for replace semantics.
    pub fn insert(&mut self, entry: Entry) -> Result<()> {
        if self.entries.contains_key(entry.full_path()) {
            return Err(SnapfsError::AlreadyExists(entry.full_path().to_string()));
        }
        if self.is_full() {
            return Err(SnapfsError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.entries.insert(entry.full_path().to_string(), entry);
        Ok(())
    }

    /// Insert into a slot the caller has just vacated. The caller guarantees the
    /// key is free and that the entry count does not grow past its value before
    /// the vacating removal.
    pub(crate) fn reinsert(&mut self, entry: Entry) {
        debug_assert!(!self.entries.contains_key(entry.full_path()));
        debug_assert!(self.entries.len() < self.capacity);
        self.entries.insert(entry.full_path().to_string(), entry);
    }

    /// Absent keys are not an error.
    pub fn remove(&mut self, full_path: &str) -> Option<Entry> {
        self.entries.remove(full_path)
    }

    /// Direct children of `parent_path`, in no particular order.
    pub fn children_of<'a>(&'a self, parent_path: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries
            .values()
            .filter(move |e| e.parent_path() == parent_path)
    }

    /// Keys of every entry strictly below `ancestor`.
    pub fn descendant_keys(&self, ancestor: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|k| path::is_within(k, ancestor))
            .cloned()
            .collect()
    }

    /// Includes the implicit root.
    pub fn exists(&self, full_path: &str) -> bool {
        full_path == path::ROOT || self.entries.contains_key(full_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// All entries sorted by path, for reporting.
    pub fn describe(&self) -> Vec<EntryInfo> {
        let mut infos: Vec<EntryInfo> = self
            .entries
            .values()
            .map(|e| EntryInfo {
                path: e.full_path().to_string(),
                kind: e.kind(),
                size: e.size(),
                atime: rfc3339(e.atime),
                mtime: rfc3339(e.mtime),
                ctime: rfc3339(e.ctime),
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }
}

impl PartialEq for EntryTable {
    /// Entry-set equality; capacity is configuration, not state.
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}
