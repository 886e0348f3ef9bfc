use std::fs;
use std::io::{ErrorKind, Read};

use crate::helpers::TestMount;

fn names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
#[ignore]
fn test_write_then_read_back() {
    let mount = TestMount::new();
    let file = mount.mount_path().join("hello.txt");

    fs::write(&file, "hello world").unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "hello world");
    assert_eq!(fs::metadata(&file).unwrap().len(), 11);

    // A second write replaces the whole body.
    fs::write(&file, "bye").unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "bye");
}

#[test]
#[ignore]
fn test_partial_reads_follow_offset() {
    let mount = TestMount::new();
    let file = mount.mount_path().join("data.bin");
    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    fs::write(&file, &body).unwrap();

    let mut handle = fs::File::open(&file).unwrap();
    let mut first = [0u8; 100];
    handle.read_exact(&mut first).unwrap();
    assert_eq!(&first[..], &body[..100]);
    let mut rest = Vec::new();
    handle.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, &body[100..]);
}

#[test]
#[ignore]
fn test_directories_and_listing() {
    let mount = TestMount::new();
    let mp = mount.mount_path();

    fs::create_dir(mp.join("docs")).unwrap();
    fs::write(mp.join("docs/a.txt"), "a").unwrap();
    fs::write(mp.join("docs/b.txt"), "b").unwrap();
    fs::write(mp.join("top.txt"), "top").unwrap();

    assert_eq!(names(mp), vec!["docs", "top.txt"]);
    assert_eq!(names(&mp.join("docs")), vec!["a.txt", "b.txt"]);
    assert!(fs::metadata(mp.join("docs")).unwrap().is_dir());
    assert!(fs::metadata(mp.join("top.txt")).unwrap().is_file());
}

#[test]
#[ignore]
fn test_create_existing_directory_fails() {
    let mount = TestMount::new();
    let dir = mount.mount_path().join("d");
    fs::create_dir(&dir).unwrap();
    let err = fs::create_dir(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
#[ignore]
fn test_rename_and_overwrite() {
    let mount = TestMount::new();
    let mp = mount.mount_path();
    fs::write(mp.join("a"), "from a").unwrap();
    fs::write(mp.join("b"), "from b").unwrap();

    fs::rename(mp.join("a"), mp.join("b")).unwrap();
    assert!(!mp.join("a").exists());
    assert_eq!(fs::read_to_string(mp.join("b")).unwrap(), "from a");
}

#[test]
#[ignore]
fn test_rename_directory_moves_children() {
    let mount = TestMount::new();
    let mp = mount.mount_path();
    fs::create_dir(mp.join("src")).unwrap();
    fs::write(mp.join("src/inner.txt"), "inner").unwrap();

    fs::rename(mp.join("src"), mp.join("dst")).unwrap();
    assert!(!mp.join("src").exists());
    assert_eq!(fs::read_to_string(mp.join("dst/inner.txt")).unwrap(), "inner");
}

#[test]
#[ignore]
fn test_remove_file_and_directory() {
    let mount = TestMount::new();
    let mp = mount.mount_path();
    fs::create_dir(mp.join("d")).unwrap();
    fs::write(mp.join("d/f"), "x").unwrap();

    assert!(fs::remove_dir(mp.join("d")).is_err());
    fs::remove_file(mp.join("d/f")).unwrap();
    fs::remove_dir(mp.join("d")).unwrap();
    assert!(names(mp).is_empty());
}

#[test]
#[ignore]
fn test_truncate_extends_with_zeros() {
    let mount = TestMount::new();
    let file = mount.mount_path().join("t");
    fs::write(&file, "hi").unwrap();

    let handle = fs::OpenOptions::new().write(true).open(&file).unwrap();
    handle.set_len(5).unwrap();
    drop(handle);
    assert_eq!(fs::read(&file).unwrap(), b"hi\0\0\0");

    let handle = fs::OpenOptions::new().write(true).open(&file).unwrap();
    handle.set_len(1).unwrap();
    drop(handle);
    assert_eq!(fs::read(&file).unwrap(), b"h");
}

#[test]
#[ignore]
fn test_capacity_limit_reports_no_space() {
    let state = tempfile::tempdir().unwrap();
    let mount = TestMount::with_args(state, &["--capacity", "2"]);
    let mp = mount.mount_path();
    fs::write(mp.join("one"), "1").unwrap();
    fs::write(mp.join("two"), "2").unwrap();
    let err = fs::write(mp.join("three"), "3").unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
}
