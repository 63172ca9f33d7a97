//! Store ↔ broker synchronization
//!
//! # Outbound
//!
//! The filesystem adapter publishes a file's full content, retained, to the
//! file's topic after every local content change (see [`Publisher`]).
//!
//! # Inbound
//!
//! The [`SyncEngine`] subscribes to the namespace wildcard and writes every
//! received payload into the tree with [`apply_message`], creating missing
//! directories and overwriting whatever was at the target path. Echoes of
//! this process's own publishes are recognized by the shared [`EchoFilter`]
//! and dropped (see [`receive_message`]).
//!
//! # Lifecycle
//!
//! `SyncEngine::spawn` connects from a dedicated thread. Unmount calls
//! [`SyncHandle::shutdown`], which requests disconnect and waits for that
//! thread to finish, stopping the loop directly if the request cannot be
//! queued. A lost connection ends the engine for good.

mod broker;
mod echo;
mod engine;
mod topic;

use std::fmt;

pub use broker::{BrokerConfig, BrokerConnection, BrokerError, MqttPublisher, Publisher};
pub use echo::{EchoFilter, Fingerprint};
pub use engine::{apply_message, receive_message, SyncEngine, SyncHandle};
pub use topic::{TopicMapper, DEFAULT_TOPIC_PREFIX};

/// Connection state of the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Created, not started
    Idle,
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Closed after a disconnect
    Disconnected,
    /// Connection failed or was lost
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Connecting => "connecting",
            SyncStatus::Connected => "connected",
            SyncStatus::Disconnected => "disconnected",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("broker connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("broker client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to start sync runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("sync thread panicked")]
    Panicked,
}
