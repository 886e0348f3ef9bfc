use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::path;

pub const ROOT_INO: u64 = 1;

/// Kernel inode numbers for entry keys. Entries have no inode of their own,
/// so numbers are handed out on first sight of a path and follow it through
/// renames.
pub struct InodeTable {
    ino_to_path: DashMap<u64, String>,
    path_to_ino: DashMap<String, u64>,
    next_ino: AtomicU64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            ino_to_path: DashMap::new(),
            path_to_ino: DashMap::new(),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        };
        table.ino_to_path.insert(ROOT_INO, path::ROOT.to_string());
        table.path_to_ino.insert(path::ROOT.to_string(), ROOT_INO);
        table
    }

    /// The inode for `path`, allocating one if the path is new.
    pub fn get_or_alloc(&self, path: &str) -> u64 {
        *self
            .path_to_ino
            .entry(path.to_string())
            .or_insert_with(|| {
                let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
                self.ino_to_path.insert(ino, path.to_string());
                ino
            })
            .value()
    }

    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.ino_to_path.get(&ino).map(|r| r.value().clone())
    }

    pub fn get_ino(&self, path: &str) -> Option<u64> {
        self.path_to_ino.get(path).map(|r| *r.value())
    }

    pub fn remove_by_path(&self, path: &str) {
        if path == path::ROOT {
            return;
        }
        if let Some((_, ino)) = self.path_to_ino.remove(path) {
            self.ino_to_path.remove(&ino);
        }
    }

    /// Drop `path` and every path below it.
    pub fn remove_tree(&self, root: &str) {
        self.remove_by_path(root);
        for path in self.paths_within(root) {
            self.remove_by_path(&path);
        }
    }

    /// Move `old_path` and everything below it to `new_path`, dropping whatever
    /// was mapped at or below `new_path`.
    pub fn rename_tree(&self, old_path: &str, new_path: &str) {
        self.remove_tree(new_path);
        let mut moving = self.paths_within(old_path);
        moving.push(old_path.to_string());
        for path in moving {
            if let Some((_, ino)) = self.path_to_ino.remove(&path) {
                let renamed = path::rebase(&path, old_path, new_path);
                self.ino_to_path.insert(ino, renamed.clone());
                self.path_to_ino.insert(renamed, ino);
            }
        }
    }

    fn paths_within(&self, ancestor: &str) -> Vec<String> {
        self.path_to_ino
            .iter()
            .filter(|r| path::is_within(r.key(), ancestor))
            .map(|r| r.key().clone())
            .collect()
    }
}
