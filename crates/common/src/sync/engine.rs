//! Broker event loop and inbound message application
//!
//! The engine owns the rumqttc event loop. It runs on its own thread with a
//! current-thread tokio runtime, independent of the FUSE callback thread; the
//! two only meet in the [`NodeStore`].

use std::thread::JoinHandle;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use tokio::sync::watch;

use super::broker::BrokerConnection;
use super::echo::EchoFilter;
use super::topic::TopicMapper;
use super::{SyncError, SyncStatus};
use crate::store::{NodeId, NodeStore, StoreError};

/// Apply one broker message to the tree
///
/// Broker state wins: whatever sits at the message's path is overwritten.
/// Returns the id of the file that now holds the payload, or `None` when the
/// topic is outside the namespace.
pub fn apply_message(
    store: &NodeStore,
    topics: &TopicMapper,
    topic: &str,
    payload: &[u8],
) -> Option<NodeId> {
    let Some(segments) = topics.topic_to_segments(topic) else {
        tracing::warn!(topic, "ignoring message outside the filesystem namespace");
        return None;
    };

    tracing::debug!(topic, bytes = payload.len(), "applying inbound message");
    match store.apply_inbound(&segments, payload) {
        Ok(id) => Some(id),
        Err(e @ (StoreError::InvalidPath(_) | StoreError::FileTooLarge(_))) => {
            tracing::warn!(topic, error = %e, "skipping inbound message");
            None
        }
        Err(e) => {
            tracing::error!(topic, error = %e, "failed to apply inbound message");
            None
        }
    }
}

/// Apply a broker message unless it is the echo of our own publish
pub fn receive_message(
    store: &NodeStore,
    topics: &TopicMapper,
    echoes: &EchoFilter,
    topic: &str,
    payload: &[u8],
) -> Option<NodeId> {
    if echoes.take_echo(topic, payload) {
        tracing::trace!(topic, "dropping echo of own publish");
        return None;
    }
    apply_message(store, topics, topic, payload)
}

/// Inbound half of the broker synchronization
pub struct SyncEngine {
    store: NodeStore,
    topics: TopicMapper,
    echoes: EchoFilter,
    client: AsyncClient,
    eventloop: EventLoop,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(store: NodeStore, topics: TopicMapper, connection: BrokerConnection) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            topics,
            echoes: connection.echoes,
            client: connection.client,
            eventloop: connection.eventloop,
            status,
        }
    }


    /// Watch the engine's connection status
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: SyncStatus) {
        tracing::debug!(%status, "sync status changed");
        self.status.send_replace(status);
    }

    /// Drive the connection until it is closed or lost
    ///
    /// Connects, subscribes to the namespace wildcard once the broker
    /// acknowledges the connection, and applies every incoming publish. Ends
    /// with `Ok` after a requested disconnect and with an error when the
    /// connection fails. There is no reconnect.
    pub async fn run(self) -> Result<(), SyncError> {
        let (_stop, stop) = watch::channel(false);
        self.run_until(stop).await
    }

    /// [`Self::run`], also ending with `Ok` once `stop` changes or its sender
    /// is dropped
    pub async fn run_until(mut self, mut stop: watch::Receiver<bool>) -> Result<(), SyncError> {
        let subscription = self.topics.subscription();
        self.set_status(SyncStatus::Connecting);

        loop {
            let polled = tokio::select! {
                polled = self.eventloop.poll() => Some(polled),
                _ = stop.changed() => None,
            };

            let event = match polled {
                Some(Ok(event)) => event,
                None => {
                    tracing::info!("sync engine stopped without broker disconnect");
                    self.set_status(SyncStatus::Disconnected);
                    return Ok(());
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "broker connection lost");
                    self.set_status(SyncStatus::Failed);
                    return Err(SyncError::Connection(e));
                }
            };

            match event {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    tracing::info!(code = ?ack.code, %subscription, "connected to broker");
                    if let Err(e) = self.client.try_subscribe(subscription.clone(), QoS::AtMostOnce) {
                        self.set_status(SyncStatus::Failed);
                        return Err(SyncError::Client(e));
                    }
                    self.set_status(SyncStatus::Connected);
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    receive_message(
                        &self.store,
                        &self.topics,
                        &self.echoes,
                        &publish.topic,
                        &publish.payload,
                    );
                }
                Event::Incoming(Packet::Disconnect) => {
                    tracing::warn!("broker closed the connection");
                    self.set_status(SyncStatus::Disconnected);
                    return Ok(());
                }
                Event::Outgoing(Outgoing::Disconnect) => {
                    tracing::info!("disconnected from broker");
                    self.set_status(SyncStatus::Disconnected);
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    /// Run the engine on a dedicated thread
    pub fn spawn(self) -> Result<SyncHandle, SyncError> {
        let client = self.client.clone();
        let status = self.status();
        let (stop, stop_rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name("mqttfs-sync".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(SyncError::Runtime)?;
                runtime.block_on(self.run_until(stop_rx))
            })
            .map_err(SyncError::Runtime)?;

        Ok(SyncHandle {
            client,
            status,
            stop,
            thread,
        })
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("topics", &self.topics)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

/// Handle to a running engine thread
#[derive(Debug)]
pub struct SyncHandle {
    client: AsyncClient,
    status: watch::Receiver<SyncStatus>,
    stop: watch::Sender<bool>,
    thread: JoinHandle<Result<(), SyncError>>,
}

impl SyncHandle {
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Request disconnect and block until the engine thread has exited
    ///
    /// The disconnect is queued behind any pending publishes, which are sent
    /// first. When it cannot be queued (the request channel is full, or the
    /// loop already ended) the engine is stopped directly and pending
    /// publishes are dropped.
    pub fn shutdown(self) -> Result<(), SyncError> {
        if let Err(e) = self.client.try_disconnect() {
            if !self.thread.is_finished() {
                tracing::warn!(error = %e, "disconnect not queued, stopping sync engine");
            }
            self.stop.send_replace(true);
        }

        self.thread.join().map_err(|_| SyncError::Panicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_message_builds_tree() {
        let store = NodeStore::new();
        let topics = TopicMapper::default();

        let id = apply_message(&store, &topics, "fs/a/b/c", b"X").unwrap();

        assert_eq!(store.resolve("/a/b/c"), Some(id));
        assert_eq!(store.contents(id).unwrap(), b"X");
    }

    #[test]
    fn test_apply_message_ignores_foreign_topics() {
        let store = NodeStore::new();
        let topics = TopicMapper::default();

        assert!(apply_message(&store, &topics, "other/a", b"X").is_none());
        assert!(apply_message(&store, &topics, "fs", b"X").is_none());
        assert_eq!(store.list_children("/").unwrap(), vec![".", ".."]);
    }

    #[test]
    fn test_receive_message_drops_own_echo() {
        let store = NodeStore::new();
        let topics = TopicMapper::default();
        let echoes = EchoFilter::new();
        let id = store.create_file("/f", 0o644).unwrap();
        store.write(id, 0, b"newer").unwrap();
        echoes.record("fs/f", b"older");

        assert!(receive_message(&store, &topics, &echoes, "fs/f", b"older").is_none());
        assert_eq!(store.contents(id).unwrap(), b"newer");

        let applied = receive_message(&store, &topics, &echoes, "fs/f", b"remote");
        assert_eq!(applied, Some(id));
        assert_eq!(store.contents(id).unwrap(), b"remote");
    }

    #[test]
    fn test_apply_message_skips_dot_segments() {
        let store = NodeStore::new();
        let topics = TopicMapper::default();

        assert!(apply_message(&store, &topics, "fs/a/../b", b"X").is_none());
        assert!(apply_message(&store, &topics, "fs/./b", b"X").is_none());
        assert_eq!(store.list_children("/").unwrap(), vec![".", ".."]);
    }

    #[test]
    fn test_engine_starts_idle() {
        let store = NodeStore::new();
        let connection = BrokerConnection::new(&Default::default(), "token");
        let engine = SyncEngine::new(store, TopicMapper::default(), connection);

        assert_eq!(*engine.status().borrow(), SyncStatus::Idle);
    }
}
