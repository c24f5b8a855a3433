//! Concurrent appends from many writers never lose or merge lines.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use reelkeeper::manifest::ManifestStore;
use reelkeeper::record::{ExecutionRecord, VideoAction};

const WRITERS: usize = 16;
const RECORDS_PER_WRITER: usize = 40;

#[test]
fn concurrent_writers_produce_exactly_n_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cleanup_manifest.jsonl");
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|worker| {
            // Each writer opens the file independently, like a separate process.
            let store = ManifestStore::new(path.clone());
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for n in 0..RECORDS_PER_WRITER {
                    let record = ExecutionRecord {
                        node_id: format!("tests/test_grid.py::test_w{worker}_n{n}"),
                        test_name: format!("test_w{worker}_n{n}"),
                        session_id: Some("s".repeat(512)),
                        container_id: Some(format!("{worker:064x}")),
                        video: Some(format!("test_w{worker}_n{n}.mp4")),
                        action: if n % 2 == 0 {
                            VideoAction::Keep
                        } else {
                            VideoAction::Delete
                        },
                    };
                    store.append(&record).expect("append");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread");
    }

    let store = ManifestStore::new(path.clone());
    let records = store.read_all().expect("read");
    assert_eq!(records.len(), WRITERS * RECORDS_PER_WRITER);

    let unique: HashSet<&str> = records.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(unique.len(), WRITERS * RECORDS_PER_WRITER);

    let raw = std::fs::read_to_string(&path).expect("raw read");
    assert_eq!(raw.lines().count(), WRITERS * RECORDS_PER_WRITER);
}
