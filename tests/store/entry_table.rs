use snapfs::error::SnapfsError;
use snapfs::state::{Entry, EntryKind, EntryTable};

use crate::common::cap;

fn file(path: &str) -> Entry {
    Entry::new(path, EntryKind::File, 10).unwrap()
}

fn dir(path: &str) -> Entry {
    Entry::new(path, EntryKind::Directory, 10).unwrap()
}

#[test]
fn test_entry_derives_identity_fields() {
    let e = file("/docs/readme.md");
    assert_eq!(e.full_path(), "/docs/readme.md");
    assert_eq!(e.parent_path(), "/docs");
    assert_eq!(e.name(), "readme.md");
    assert_eq!(e.size(), 0);
    assert_eq!((e.atime, e.mtime, e.ctime), (10, 10, 10));
}

#[test]
fn test_entry_rejects_root_and_relative_keys() {
    assert!(matches!(
        Entry::new("/", EntryKind::Directory, 0),
        Err(SnapfsError::InvalidPath(_))
    ));
    assert!(matches!(
        Entry::new("relative", EntryKind::File, 0),
        Err(SnapfsError::InvalidPath(_))
    ));
}

#[test]
fn test_directory_never_carries_content() {
    let mut d = dir("/d");
    assert!(matches!(
        d.set_content(b"x".to_vec()),
        Err(SnapfsError::IsDirectory(_))
    ));
    assert_eq!(d.size(), 0);
}

#[test]
fn test_rekey_updates_all_identity_fields() {
    let mut e = file("/a");
    e.rekey("/dir/b").unwrap();
    assert_eq!(e.full_path(), "/dir/b");
    assert_eq!(e.parent_path(), "/dir");
    assert_eq!(e.name(), "b");
}

#[test]
fn test_insert_and_lookup() {
    let mut t = EntryTable::new(cap(4));
    t.insert(file("/a")).unwrap();
    assert_eq!(t.lookup("/a").unwrap().name(), "a");
    assert!(t.lookup("/b").is_none());
    assert_eq!(t.len(), 1);
}

#[test]
fn test_insert_rejects_duplicate_key() {
    let mut t = EntryTable::new(cap(4));
    t.insert(file("/a")).unwrap();
    let err = t.insert(dir("/a")).unwrap_err();
    assert!(matches!(err, SnapfsError::AlreadyExists(p) if p == "/a"));
    assert_eq!(t.len(), 1);
    assert_eq!(t.lookup("/a").unwrap().kind(), EntryKind::File);
}

#[test]
fn test_insert_rejects_when_full() {
    let mut t = EntryTable::new(cap(2));
    t.insert(file("/a")).unwrap();
    t.insert(file("/b")).unwrap();
    assert!(t.is_full());
    let err = t.insert(file("/c")).unwrap_err();
    assert!(matches!(err, SnapfsError::CapacityExceeded { capacity: 2 }));
    assert_eq!(t.len(), 2);
}

#[test]
fn test_remove_absent_is_noop() {
    let mut t = EntryTable::new(cap(2));
    assert!(t.remove("/nothing").is_none());
    t.insert(file("/a")).unwrap();
    assert_eq!(t.remove("/a").unwrap().full_path(), "/a");
    assert!(t.remove("/a").is_none());
    assert!(t.is_empty());
}

#[test]
fn test_children_of() {
    let mut t = EntryTable::new(cap(8));
    t.insert(dir("/d")).unwrap();
    t.insert(file("/d/x")).unwrap();
    t.insert(file("/d/y")).unwrap();
    t.insert(file("/d/sub")).unwrap();
    t.insert(file("/top")).unwrap();

    let mut names: Vec<&str> = t.children_of("/d").map(|e| e.name()).collect();
    names.sort();
    assert_eq!(names, vec!["sub", "x", "y"]);

    let mut root: Vec<&str> = t.children_of("/").map(|e| e.name()).collect();
    root.sort();
    assert_eq!(root, vec!["d", "top"]);
}

#[test]
fn test_exists_includes_root() {
    let t = EntryTable::new(cap(1));
    assert!(t.exists("/"));
    assert!(!t.exists("/a"));
    assert!(t.lookup("/").is_none());
}

#[test]
fn test_descendant_keys() {
    let mut t = EntryTable::new(cap(8));
    t.insert(dir("/a")).unwrap();
    t.insert(file("/a/b")).unwrap();
    t.insert(dir("/a/c")).unwrap();
    t.insert(file("/a/c/d")).unwrap();
    t.insert(file("/ab")).unwrap();

    let mut keys = t.descendant_keys("/a");
    keys.sort();
    assert_eq!(keys, vec!["/a/b", "/a/c", "/a/c/d"]);
}

#[test]
fn test_describe_is_sorted_and_serializable() {
    let mut t = EntryTable::new(cap(4));
    t.insert(file("/b")).unwrap();
    t.insert(dir("/a")).unwrap();
    let infos = t.describe();
    assert_eq!(infos[0].path, "/a");
    assert_eq!(infos[1].path, "/b");

    let json = serde_json::to_value(&infos).unwrap();
    assert_eq!(json[0]["kind"], "directory");
    assert_eq!(json[1]["kind"], "file");
    assert_eq!(json[1]["mtime"], "1970-01-01T00:00:10+00:00");
}
