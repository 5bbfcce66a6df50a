//! Integration tests for compaction

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sepkv::{FileMetaData, Options, DB};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn small_levels() -> Options {
    Options::default()
        .background_threads(false)
        .memtable_size(16 * 1024)
        .sstable_max_size(8 * 1024)
        .base_level_size(32 * 1024)
        .block_size(1024)
}

/// Runs compactions until the picker has nothing left, with a cap.
fn compact_all(db: &DB) -> usize {
    let mut runs = 0;
    while runs < 200 && db.compact_once().unwrap() {
        runs += 1;
    }
    runs
}

fn assert_levels_disjoint(db: &DB) {
    for level in 1..7 {
        let mut files: Vec<FileMetaData> = db.level_files(level);
        files.sort_by(|a, b| a.smallest.cmp(&b.smallest));
        for pair in files.windows(2) {
            assert!(
                pair[0].largest < pair[1].smallest,
                "L{} tables {} and {} overlap",
                level,
                pair[0].fid,
                pair[1].fid
            );
        }
    }
}

#[test]
fn test_level_invariant_after_compaction() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), small_levels()).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let mut model = BTreeMap::new();

    for round in 0..12 {
        for _ in 0..300 {
            let key = format!("key_{:05}", rng.random_range(0..3000));
            let value = format!("value_{}_{}", round, rng.random_range(0..1_000_000));
            db.set(key.as_bytes(), value.as_bytes()).unwrap();
            model.insert(key, value);
        }
        db.flush().unwrap();
        db.compact_once().unwrap();
        assert_levels_disjoint(&db);
    }
    assert!(compact_all(&db) < 200, "compaction settles");
    assert_levels_disjoint(&db);

    for (key, value) in &model {
        assert_eq!(db.get(key.as_bytes()).unwrap(), Some(value.as_bytes().to_vec()), "{}", key);
    }
}

#[test]
fn test_compaction_keeps_newest_version() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), small_levels()).unwrap();

    for version in 0..6 {
        for i in 0..200 {
            db.set(format!("key_{:04}", i).as_bytes(), format!("v{}", version).as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }
    assert!(db.num_files_at_level(0) > 1);
    assert!(compact_all(&db) > 0);

    for i in 0..200 {
        assert_eq!(db.get(format!("key_{:04}", i).as_bytes()).unwrap(), Some(b"v5".to_vec()));
    }
}

#[test]
fn test_bottom_level_drops_tombstones() {
    let dir = TempDir::new().unwrap();
    let mut options = Options::default().background_threads(false);
    options.max_levels = 2;
    let db = DB::open(dir.path(), options).unwrap();

    for i in 0..100 {
        db.set(format!("key_{:03}", i).as_bytes(), b"value").unwrap();
    }
    db.flush().unwrap();
    for i in 0..100 {
        db.delete(format!("key_{:03}", i).as_bytes()).unwrap();
    }
    db.flush().unwrap();
    assert_eq!(db.num_files_at_level(0), 2, "two levels leave no room to push flushes down");

    assert!(db.compact_once().unwrap());
    assert_eq!(db.num_files_at_level(0), 0);
    assert_eq!(db.num_files_at_level(1), 0, "every entry was deleted");
    assert_eq!(db.get(b"key_050").unwrap(), None);
}

#[test]
fn test_deletes_survive_intermediate_compaction() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), small_levels()).unwrap();

    for i in 0..500 {
        db.set(format!("key_{:04}", i).as_bytes(), &[b'x'; 40]).unwrap();
    }
    db.flush().unwrap();
    for i in (0..500).step_by(2) {
        db.delete(format!("key_{:04}", i).as_bytes()).unwrap();
    }
    db.flush().unwrap();
    compact_all(&db);

    for i in 0..500 {
        let value = db.get(format!("key_{:04}", i).as_bytes()).unwrap();
        assert_eq!(value.is_some(), i % 2 == 1, "key_{:04}", i);
    }
}

#[test]
fn test_compaction_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), small_levels()).unwrap();
        for round in 0..8 {
            for i in 0..300 {
                db.set(format!("key_{:04}", (i * 7 + round) % 1000).as_bytes(), format!("r{}", round).as_bytes())
                    .unwrap();
            }
            db.flush().unwrap();
        }
        compact_all(&db);
        db.close().unwrap();
    }

    let db = DB::open(dir.path(), small_levels()).unwrap();
    assert_levels_disjoint(&db);
    let mut expected = BTreeMap::new();
    for round in 0..8 {
        for i in 0..300 {
            expected.insert(format!("key_{:04}", (i * 7 + round) % 1000), format!("r{}", round));
        }
    }
    for (key, value) in &expected {
        assert_eq!(db.get(key.as_bytes()).unwrap(), Some(value.as_bytes().to_vec()));
    }
}

#[test]
fn test_background_compaction_drains_level0() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let mut options = small_levels()
        .background_threads(true)
        .intervals(Duration::from_millis(20), Duration::from_secs(60));
    options.startup_jitter = Duration::ZERO;
    let db = DB::open(dir.path(), options).unwrap();

    for round in 0..4 {
        for i in 0..100 {
            db.set(format!("key_{:04}", i).as_bytes(), format!("r{}", round).as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }
    for _ in 0..250 {
        if db.num_files_at_level(0) == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(db.num_files_at_level(0), 0, "the worker compacted level 0");
    assert_eq!(db.get(b"key_0042").unwrap(), Some(b"r3".to_vec()));
    db.close().unwrap();
}
