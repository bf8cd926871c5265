//! End-to-end tests through the host-facing recorder

use config_history::{
    Actor, ConfigEvent, HistoryConfig, HistoryError, HistoryListener, HistoryRecorder, Operation,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open(temp_dir: &TempDir) -> HistoryRecorder {
    HistoryRecorder::open(&HistoryConfig::new(temp_dir.path())).unwrap()
}

#[test]
fn test_full_job_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let recorder = open(&temp_dir);
    let alice = Actor::new("Alice", "alice");

    recorder.on_created("jobA", &alice, b"<project>1</project>").unwrap();
    recorder.on_changed("jobA", &alice, b"<project>2</project>").unwrap();
    recorder
        .on_renamed("jobA", "jobB", &Actor::anonymous(), b"<project>2</project>")
        .unwrap();
    recorder.on_deleted("jobB", &alice, b"<project>2</project>").unwrap();

    let store = recorder.store();
    assert!(store.list("jobA").unwrap().is_empty());

    let history = store.list("jobB").unwrap();
    let operations: Vec<_> = history.iter().map(|info| info.operation).collect();
    assert_eq!(
        operations,
        vec![
            Operation::Created,
            Operation::Changed,
            Operation::Renamed,
            Operation::Deleted
        ]
    );
    assert_eq!(history[2].old_name.as_deref(), Some("jobA"));
    assert!(history[2].actor.is_anonymous());

    let second = store.read("jobB", &history[1].identifier).unwrap();
    assert_eq!(second.snapshot_text(), "<project>2</project>");
}

#[test]
fn test_change_after_delete_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let recorder = open(&temp_dir);
    let actor = Actor::anonymous();

    recorder.on_created("job", &actor, b"a").unwrap();
    recorder.on_deleted("job", &actor, b"a").unwrap();

    assert!(matches!(
        recorder.on_changed("job", &actor, b"b"),
        Err(HistoryError::EntityDeleted(_))
    ));
    assert!(recorder.on_created("job", &actor, b"c").unwrap().is_some());
}

#[test]
fn test_rename_without_history_still_records() {
    let temp_dir = TempDir::new().unwrap();
    let recorder = open(&temp_dir);

    let info = recorder
        .on_renamed("never-seen", "fresh", &Actor::anonymous(), b"x")
        .unwrap()
        .unwrap();
    assert_eq!(info.operation, Operation::Renamed);
    assert_eq!(recorder.store().list("fresh").unwrap().len(), 1);
}

#[test]
fn test_listener_shared_across_threads() {
    let temp_dir = TempDir::new().unwrap();
    let listener: Arc<dyn HistoryListener> = Arc::new(open(&temp_dir));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let listener = Arc::clone(&listener);
            thread::spawn(move || {
                let entity = format!("job-{}", worker);
                listener
                    .on_config_event(&ConfigEvent::Created {
                        entity: entity.clone(),
                        actor: Actor::anonymous(),
                        config: b"a".to_vec(),
                    })
                    .unwrap();
                for i in 0..5 {
                    listener
                        .on_config_event(&ConfigEvent::Changed {
                            entity: entity.clone(),
                            actor: Actor::anonymous(),
                            config: format!("{}", i).into_bytes(),
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let recorder = HistoryRecorder::open(&HistoryConfig::new(temp_dir.path())).unwrap();
    let mut entities = recorder.store().entities().unwrap();
    entities.sort();
    assert_eq!(entities, vec!["job-0", "job-1", "job-2", "job-3"]);
    for entity in entities {
        assert_eq!(recorder.store().list(&entity).unwrap().len(), 6);
    }
}
