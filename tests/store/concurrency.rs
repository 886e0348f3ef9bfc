use std::sync::Arc;
use std::thread;

use snapfs::error::SnapfsError;
use snapfs::state::EntryKind;

use crate::common::store;

#[test]
fn test_parallel_creates_respect_capacity() {
    let s = Arc::new(store(50));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                let mut created = 0usize;
                for i in 0..20 {
                    match s.create(&format!("/t{}-{}", t, i), EntryKind::File) {
                        Ok(()) => created += 1,
                        Err(SnapfsError::CapacityExceeded { .. }) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                created
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 50);
    assert_eq!(s.len(), 50);
}

#[test]
fn test_racing_creates_of_same_path_admit_one() {
    let s = Arc::new(store(4));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = Arc::clone(&s);
            thread::spawn(move || s.create("/contended", EntryKind::File).is_ok())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(s.len(), 1);
}

#[test]
fn test_writers_never_interleave() {
    let s = Arc::new(store(4));
    s.create("/shared", EntryKind::File).unwrap();

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                let body = vec![b'a' + t; 4096];
                for _ in 0..200 {
                    s.write("/shared", &body).unwrap();
                    let seen = s.read("/shared", 8192).unwrap();
                    assert_eq!(seen.len(), 4096);
                    assert!(seen.iter().all(|b| *b == seen[0]));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(s.stat("/shared").unwrap().size, 4096);
}

#[test]
fn test_snapshot_while_mutating_is_consistent() {
    let s = Arc::new(store(64));
    let writer = {
        let s = Arc::clone(&s);
        thread::spawn(move || {
            for i in 0..64 {
                let path = format!("/f{}", i);
                s.create(&path, EntryKind::File).unwrap();
                s.write(&path, path.as_bytes()).unwrap();
            }
        })
    };

    for _ in 0..20 {
        let bytes = s.encode_snapshot().unwrap();
        let count = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert!((0..=64).contains(&count));
        let table = snapfs::state::snapshot::decode(
            &mut std::io::Cursor::new(&bytes),
            crate::common::cap(64),
        )
        .unwrap();
        assert_eq!(table.len(), count as usize);
    }
    writer.join().unwrap();
    assert_eq!(s.len(), 64);
}

#[test]
fn test_save_reports_count_it_wrote() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("fs.snap");
    let s = Arc::new(store(128));

    let writer = {
        let s = Arc::clone(&s);
        thread::spawn(move || {
            for i in 0..128 {
                s.create(&format!("/f{}", i), EntryKind::File).unwrap();
            }
        })
    };

    for _ in 0..10 {
        let saved = s.save_to(&snap).unwrap();
        let table = snapfs::state::snapshot::load(&snap, crate::common::cap(128))
            .unwrap()
            .unwrap();
        assert_eq!(table.len(), saved);
    }
    writer.join().unwrap();
    assert_eq!(s.save_to(&snap).unwrap(), 128);
}
