//! Randomized operation sequences checked against table-wide invariants.

use std::collections::HashSet;
use std::io::Cursor;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snapfs::state::snapshot::{decode, encode};
use snapfs::state::{path, EntryKind, Store};

use crate::common::{cap, store};

const CAPACITY: usize = 24;
const NAMES: &[&str] = &["a", "b", "c", "d"];

fn random_path(rng: &mut StdRng) -> String {
    let depth = rng.gen_range(1..=3);
    let mut p = String::new();
    for _ in 0..depth {
        p.push('/');
        p.push_str(NAMES[rng.gen_range(0..NAMES.len())]);
    }
    p
}

fn random_step(s: &Store, rng: &mut StdRng) {
    let target = random_path(rng);
    match rng.gen_range(0..7) {
        0 => {
            let _ = s.create(&target, EntryKind::File);
        }
        1 => {
            let _ = s.create(&target, EntryKind::Directory);
        }
        2 => {
            let len = rng.gen_range(0..64);
            let body: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let _ = s.write(&target, &body);
        }
        3 => {
            let _ = s.truncate(&target, rng.gen_range(0..128));
        }
        4 => {
            let _ = s.rename(&target, &random_path(rng));
        }
        5 => {
            let _ = s.delete(&target);
        }
        _ => {
            let _ = s.touch(&target, rng.gen_range(-100..100), rng.gen_range(-100..100));
        }
    }
}

fn check_invariants(s: &Store) {
    let table = s.table();
    assert!(table.len() <= CAPACITY);

    let mut seen = HashSet::new();
    for entry in table.iter() {
        assert!(seen.insert(entry.full_path().to_string()), "duplicate key");
        let (parent, name) = path::split(entry.full_path());
        assert_eq!(entry.parent_path(), parent);
        assert_eq!(entry.name(), name);
        if entry.kind() == EntryKind::Directory {
            assert_eq!(entry.size(), 0);
        }
        assert_eq!(entry.size(), entry.content().len() as u64);
    }
}

#[test]
fn test_random_sequences_keep_invariants() {
    for seed in 0..16u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let s = store(CAPACITY);
        for _ in 0..400 {
            random_step(&s, &mut rng);
        }
        check_invariants(&s);
    }
}

#[test]
fn test_random_tables_survive_snapshot() {
    for seed in 100..108u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let s = store(CAPACITY);
        for _ in 0..200 {
            random_step(&s, &mut rng);
        }
        let table = s.table();
        let mut buf = Vec::new();
        encode(&table, &mut buf).unwrap();
        let restored = decode(&mut Cursor::new(&buf), cap(CAPACITY)).unwrap();
        assert_eq!(restored, table, "seed {}", seed);
    }
}

#[test]
fn test_listing_matches_table() {
    let mut rng = StdRng::seed_from_u64(7);
    let s = store(CAPACITY);
    for _ in 0..300 {
        random_step(&s, &mut rng);
    }
    let table = s.table();
    let listed = s.list("/").unwrap();
    let expected = table
        .iter()
        .filter(|e| e.parent_path() == "/")
        .count();
    assert_eq!(listed.len(), expected + 2);
}
