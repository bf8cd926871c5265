/// Concurrent access tests
///
/// Many threads appending to the same entity within one second must still
/// produce distinct, strictly increasing identifiers.
/// Run with: cargo test --test concurrent_access_tests

use chrono::{TimeZone, Utc};
use config_history::{Actor, Operation, RevisionStore};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

#[test]
fn test_concurrent_appends_same_entity() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(RevisionStore::open(temp_dir.path()).unwrap());
    let now = Utc.with_ymd_and_hms(2012, 11, 21, 10, 0, 0).unwrap();

    let num_threads = 8;
    let appends_per_thread = 10;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..appends_per_thread)
                    .map(|i| {
                        store
                            .append_at(
                                "Test1",
                                Operation::Changed,
                                &Actor::new(format!("worker {}", thread_id), format!("w{}", thread_id)),
                                format!("{}-{}", thread_id, i).as_bytes(),
                                None,
                                now,
                            )
                            .unwrap()
                            .identifier
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(unique.len(), num_threads * appends_per_thread);

    let listed = store.list("Test1").unwrap();
    assert_eq!(listed.len(), num_threads * appends_per_thread);
    for pair in listed.windows(2) {
        assert!(pair[0].identifier < pair[1].identifier);
    }
}

#[test]
fn test_concurrent_appends_different_entities() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(RevisionStore::open(temp_dir.path()).unwrap());

    let handles: Vec<_> = (0..6)
        .map(|task_id| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let entity = format!("job-{}", task_id);
                for _ in 0..5 {
                    store
                        .append(&entity, Operation::Changed, &Actor::anonymous(), b"x", None)
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.entities().unwrap().len(), 6);
    for task_id in 0..6 {
        assert_eq!(store.list(&format!("job-{}", task_id)).unwrap().len(), 5);
    }
}

#[test]
fn test_reads_during_writes_see_only_complete_revisions() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(RevisionStore::open(temp_dir.path()).unwrap());

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..30 {
                store
                    .append("Test1", Operation::Changed, &Actor::anonymous(), format!("payload {}", i).as_bytes(), None)
                    .unwrap();
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..30 {
                for info in store.list("Test1").unwrap() {
                    let revision = store.read("Test1", &info.identifier).unwrap();
                    assert!(revision.snapshot_text().starts_with("payload "));
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(store.list("Test1").unwrap().len(), 30);
}
