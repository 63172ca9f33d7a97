//! Concurrent access to the node store from a local writer and the inbound sync path

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use common::store::{NodeKind, NodeStore};
use common::sync::{apply_message, TopicMapper};

#[test]
fn test_size_always_matches_content() {
    let store = NodeStore::new();
    let topics = TopicMapper::default();
    let id = store.create_file("/shared", 0o644).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..500u64 {
                store.write(id, i % 7, b"local bytes").unwrap();
                store.truncate(id, i % 13).unwrap();
            }
        })
    };

    let inbound = {
        let store = store.clone();
        let topics = topics.clone();
        thread::spawn(move || {
            for i in 0..500usize {
                let payload = vec![b'r'; i % 17];
                apply_message(&store, &topics, "fs/shared", &payload);
                apply_message(&store, &topics, "fs/dir/nested", &payload);
            }
        })
    };

    let checker = {
        let store = store.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                store.view(|tree| {
                    let node = tree.get(id).unwrap();
                    let attr = node.attr();
                    assert_eq!(attr.size, tree.contents(id).unwrap().len() as u64);
                });
            }
        })
    };

    writer.join().unwrap();
    inbound.join().unwrap();
    done.store(true, Ordering::Relaxed);
    checker.join().unwrap();

    // The local file was only ever overwritten in place
    assert_eq!(store.resolve("/shared"), Some(id));
    let dir = store.resolve("/dir").unwrap();
    assert_eq!(store.attr(dir).unwrap().kind, NodeKind::Directory);
}

#[test]
fn test_concurrent_creates_never_duplicate_names() {
    let store = NodeStore::new();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                (0..50)
                    .filter(|i| store.create_file(&format!("/f{}", i), 0o644).is_ok())
                    .count()
            })
        })
        .collect();

    let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(created, 50);
    assert_eq!(store.list_children("/").unwrap().len(), 52);
}
