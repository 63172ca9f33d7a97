//! Test doubles for code that publishes to the broker

use parking_lot::Mutex;

use crate::sync::{BrokerError, Publisher};

/// One recorded publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// [`Publisher`] that keeps every message in memory instead of sending it
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message so far, in publish order
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    /// Most recent payload sent to `topic`
    pub fn last_payload(&self, topic: &str) -> Option<Vec<u8>> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .map(|p| p.payload.clone())
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
