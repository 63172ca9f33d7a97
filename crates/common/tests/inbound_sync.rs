#![cfg(feature = "testkit")]
//! Broker messages and local publishes meeting in one store

use common::store::{NodeKind, NodeStore, DEFAULT_FILE_MODE};
use common::sync::{apply_message, receive_message, EchoFilter, Publisher, TopicMapper};
use common::testkit::RecordingPublisher;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[test]
fn test_remote_message_materializes_path() {
    init_tracing();
    let store = NodeStore::new();
    let topics = TopicMapper::default();

    apply_message(&store, &topics, "fs/sensors/room1/temp", b"21.5");

    let mut root = store.list_children("/").unwrap();
    root.sort();
    assert_eq!(root, vec![".", "..", "sensors"]);

    let id = store.resolve("/sensors/room1/temp").unwrap();
    let attr = store.attr(id).unwrap();
    assert_eq!(attr.kind, NodeKind::File);
    assert_eq!(attr.perm as u32, DEFAULT_FILE_MODE);
    assert_eq!(store.read(id, 0, 64).unwrap(), b"21.5");
}

#[test]
fn test_remote_message_overwrites_local_content() {
    init_tracing();
    let store = NodeStore::new();
    let topics = TopicMapper::default();
    let publisher = RecordingPublisher::new();

    let id = store.create_file("/note", 0o600).unwrap();
    store.write(id, 0, b"written locally").unwrap();
    publisher
        .publish(&topics.path_to_topic("/note"), store.contents(id).unwrap())
        .unwrap();

    apply_message(&store, &topics, "fs/note", b"remote");

    assert_eq!(store.contents(id).unwrap(), b"remote");
    assert_eq!(store.attr(id).unwrap().size, 6);
    assert_eq!(
        publisher.last_payload("fs/note").unwrap(),
        b"written locally"
    );
}

#[test]
fn test_own_echo_is_dropped() {
    init_tracing();
    let store = NodeStore::new();
    let topics = TopicMapper::new("team/fs");
    let publisher = RecordingPublisher::new();
    let echoes = EchoFilter::new();

    store.create_directory("/d", 0o755).unwrap();
    let id = store.create_file("/d/f", 0o644).unwrap();
    store.write(id, 0, b"payload").unwrap();
    let topic = topics.path_to_topic("/d/f");
    let content = store.contents(id).unwrap();
    echoes.record(&topic, &content);
    publisher.publish(&topic, content).unwrap();

    // The broker delivers our own retained publish back to us
    for message in publisher.published() {
        let applied = receive_message(&store, &topics, &echoes, &message.topic, &message.payload);
        assert_eq!(applied, None);
    }

    assert_eq!(store.contents(id).unwrap(), b"payload");
    assert_eq!(echoes.pending(&topic), 0);
    assert_eq!(store.view(|tree| tree.len()), 3);
}
