//! Integration tests for the MQTT-backed filesystem
//!
//! These tests drive `MqttFs` through its path-level operations and the
//! inbound sync path without requiring an actual FUSE mount (which requires
//! privileges) or a reachable broker.

#![cfg(feature = "fuse")]

use std::net::TcpListener;
use std::sync::Arc;

use common::store::{NodeKind, NodeStore};
use common::sync::{apply_message, BrokerConfig, TopicMapper};
use common::testkit::RecordingPublisher;
use mqttfs_daemon::fuse::MqttFs;
use mqttfs_daemon::MountConfig;

fn setup() -> (MqttFs, Arc<RecordingPublisher>) {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let publisher = Arc::new(RecordingPublisher::new());
    let fs = MqttFs::new(NodeStore::new(), TopicMapper::default(), publisher.clone());
    (fs, publisher)
}

#[test]
fn test_local_edit_then_remote_update() {
    let (fs, publisher) = setup();

    fs.mkdir("/notes", 0o755).unwrap();
    fs.create("/notes/todo", 0o644).unwrap();
    fs.write("/notes/todo", 0, b"buy milk").unwrap();
    assert_eq!(publisher.last_payload("fs/notes/todo").unwrap(), b"buy milk");

    apply_message(fs.store(), fs.topics(), "fs/notes/todo", b"buy bread");

    assert_eq!(fs.read("/notes/todo", 0, 64).unwrap(), b"buy bread");
    assert_eq!(fs.getattr("/notes/todo").unwrap().size, 9);
}

#[test]
fn test_remote_tree_is_listed() {
    let (fs, _) = setup();

    apply_message(fs.store(), fs.topics(), "fs/home/kitchen/light", b"on");
    apply_message(fs.store(), fs.topics(), "fs/home/hall/light", b"off");

    let mut names: Vec<_> = fs
        .readdir("/home")
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort();
    assert_eq!(names, vec![".", "..", "hall", "kitchen"]);

    let attr = fs.getattr("/home/kitchen").unwrap();
    assert_eq!(attr.kind, NodeKind::Directory);
    assert_eq!(attr.perm, 0o755);
}

#[test]
fn test_rename_keeps_content_and_moves_topic() {
    let (fs, publisher) = setup();

    fs.mkdir("/a", 0o755).unwrap();
    fs.mkdir("/b", 0o755).unwrap();
    fs.create("/a/f", 0o644).unwrap();
    fs.write("/a/f", 0, b"data").unwrap();

    fs.rename("/a/f", "/b/g").unwrap();
    assert!(fs.getattr("/a/f").is_err());
    assert_eq!(fs.read("/b/g", 0, 16).unwrap(), b"data");

    fs.write("/b/g", 4, b"!").unwrap();
    assert_eq!(publisher.last_payload("fs/b/g").unwrap(), b"data!");
}

#[test]
fn test_sync_engine_stops_after_connection_failure() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    // Reserve a port, then free it so the connection is refused
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let config = MountConfig {
        broker: BrokerConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        },
        ..Default::default()
    };

    let mut fs = MqttFs::from_config(&config, "token");
    fs.start_sync().unwrap();
    fs.stop_sync();

    // Local operations keep working against the in-memory tree
    fs.create("/still-works", 0o644).unwrap();
    assert!(fs.getattr("/still-works").is_ok());
}
